use chrono::Local;
use once_cell::sync::OnceCell;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: OnceCell<()> = OnceCell::new();
static FILE_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

/// Console plus daily rolling file output. Safe to call more than once.
pub fn init_logging(log_dir: &Path) {
    let _ = INIT.get_or_init(|| {
        let _ = fs::create_dir_all(log_dir);
        let file_appender = rolling::daily(log_dir, "playhub.log");
        let (nb_file, guard) = tracing_appender::non_blocking(file_appender);
        let _ = FILE_GUARD.set(guard); // flushed on drop, so keep it for the program lifetime

        let console_layer = fmt::layer().with_target(false).with_writer(std::io::stderr);
        let file_layer = fmt::layer().with_writer(nb_file).with_target(false).with_ansi(false);

        let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::registry()
            .with(env)
            .with(console_layer)
            .with(file_layer)
            .try_init();
    });
}

pub fn game_log_path(log_dir: &Path, app_name: &str) -> PathBuf {
    log_dir.join("games").join(format!("{app_name}.log"))
}

fn write_stamped(out: &mut impl Write, line: &str) -> io::Result<()> {
    writeln!(out, "({}) {}", Local::now().format("%Y-%m-%d %H:%M:%S"), line.trim_end())
}

fn open_append(log_dir: &Path, app_name: &str) -> io::Result<File> {
    let path = game_log_path(log_dir, app_name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Appends a timestamped line to the game's own log file.
pub fn append_game_log(log_dir: &Path, app_name: &str, line: &str) -> io::Result<()> {
    write_stamped(&mut open_append(log_dir, app_name)?, line)
}

/// A game log kept open for the length of one run. Buffered; flushed on drop.
pub struct GameLog {
    out: Option<BufWriter<File>>,
}

impl GameLog {
    pub fn open(log_dir: &Path, app_name: &str) -> io::Result<Self> {
        Ok(Self { out: Some(BufWriter::new(open_append(log_dir, app_name)?)) })
    }

    /// Swallows every line.
    pub fn disabled() -> Self { Self { out: None } }

    pub fn is_enabled(&self) -> bool { self.out.is_some() }

    pub fn line(&mut self, line: &str) {
        let Some(out) = self.out.as_mut() else { return };
        if let Err(e) = write_stamped(out, line) {
            tracing::warn!("game log write failed, closing it: {}", e);
            self.out = None;
        }
    }
}
