pub mod abort;
pub mod context;
pub mod download;
pub mod error;
pub mod events;
pub mod fs_ops;
pub mod jobs;
pub mod launch;
pub mod logging;
pub mod process;
pub mod progress;
pub mod settings;
pub mod steam;
pub mod wine;
pub mod wine_manager;

pub use abort::{AbortRegistry, AbortToken};
pub use context::LauncherContext;
pub use download::{download_file, plan_segments, Segment};
pub use error::{classify_tool_error, Dialog, DialogKind, LauncherError, NetworkStage, Result};
pub use events::{EventBus, GameStatus, Runner, Status, Subscription};
pub use fs_ops::{dir_size, extract_files, move_install, ExtractBackend, ExtractOptions, InstalledGame, MoveResult};
pub use jobs::{status_label, Job, JobGuard, JobRegistry};
pub use launch::{launch_game, split_args_quoted, LaunchRequest};
pub use logging::{append_game_log, init_logging, GameLog};
pub use process::{command_exists, kill_pattern, run, run_quiet, MemoryLog, ProcessOutput, RunOptions};
pub use progress::{bytes_to_size, calculate_eta, format_time, OutputParser, ParserKind, ProgressSnapshot, Throttle};
pub use settings::{AppDirs, GameSettings, GlobalSettings, SettingsStore};
pub use steam::{get_steam_runtime, list_proton_builds, RuntimeKind, SteamRuntime};
pub use wine::{
    check_wine_before_launch, get_wine_from_proton, list_alternative_wines, shutdown_wine, ProbeValidator, WineBinary, WineCatalog,
    WineInstallation, WineKind, WinePrompt, WineResolution, WineSettings, WineValidator,
};
pub use wine_manager::{GithubWineCatalog, WineRelease};
