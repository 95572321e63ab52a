use tracing::{info, warn};

use crate::abort::AbortRegistry;
use crate::error::Result;
use crate::events::EventBus;
use crate::jobs::JobRegistry;
use crate::logging::{append_game_log, GameLog};
use crate::process::kill_pattern;
use crate::settings::{AppDirs, GameSettings, SettingsStore};
use crate::wine::{check_wine_before_launch, WineCatalog, WinePrompt, WineResolution, WineValidator};

/// Everything long-lived the launcher needs, passed explicitly to each operation.
pub struct LauncherContext {
    pub dirs: AppDirs,
    pub aborts: AbortRegistry,
    pub events: EventBus,
    pub jobs: JobRegistry,
    pub settings: SettingsStore,
}

impl LauncherContext {
    pub fn new(dirs: AppDirs) -> Result<Self> {
        let events = EventBus::new();
        Ok(Self {
            settings: SettingsStore::new(&dirs)?,
            jobs: JobRegistry::new(events.clone()),
            aborts: AbortRegistry::new(),
            events,
            dirs,
        })
    }

    fn logs_disabled(&self) -> bool {
        self.settings.load_global().map(|g| g.disable_logs).unwrap_or(false)
    }

    /// Writes one line to the game's own log unless logging is disabled in the global settings.
    pub fn game_log(&self, app_name: &str, line: &str) {
        if self.logs_disabled() {
            return;
        }
        if let Err(e) = append_game_log(&self.dirs.logs, app_name, line) {
            warn!("could not write game log for {}: {}", app_name, e);
        }
    }

    /// The game's log held open for a whole run, for high-volume writers like child output.
    /// Settings are read once here, not per line.
    pub fn open_game_log(&self, app_name: &str) -> GameLog {
        if self.logs_disabled() {
            return GameLog::disabled();
        }
        GameLog::open(&self.dirs.logs, app_name).unwrap_or_else(|e| {
            warn!("could not open game log for {}: {}", app_name, e);
            GameLog::disabled()
        })
    }

    /// [`check_wine_before_launch`] against the stored settings, mirrored to the game log.
    pub async fn check_wine<V, P, C>(&self, app_name: &str, game: &mut GameSettings, validator: &V, prompt: &P, catalog: &C) -> Result<WineResolution>
    where
        V: WineValidator,
        P: WinePrompt,
        C: WineCatalog,
    {
        let before = game.wine_version.name.clone();
        let resolution = check_wine_before_launch(app_name, game, validator, prompt, &self.settings, catalog).await?;
        let line = match &resolution {
            WineResolution::AlreadyValid => format!("Using wine {before}"),
            WineResolution::Adopted(w) => format!("Wine version {before} is not valid, changed to {}", w.name),
            WineResolution::DownloadedFallback(w) => format!("Wine version {before} is not valid, downloaded {}", w.name),
            WineResolution::Aborted => format!("Wine version {before} is not valid, launch aborted"),
        };
        self.game_log(app_name, &line);
        Ok(resolution)
    }

    /// Kills lingering store tools and aborts every running operation. Returns how many were aborted.
    pub async fn handle_exit(&self) -> usize {
        for tool in ["legendary", "gogdl", "nile"] {
            if let Err(e) = kill_pattern(tool).await {
                warn!("could not stop {}: {}", tool, e);
            }
        }
        let n = self.aborts.cancel_all();
        info!("Shutting down, {} operation(s) aborted", n);
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::game_log_path;
    use crate::settings::GlobalSettings;

    #[test]
    fn game_log_respects_disable_logs() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = LauncherContext::new(AppDirs::under(tmp.path())).unwrap();
        ctx.game_log("sable", "first");
        ctx.settings.save_global(&GlobalSettings { disable_logs: true, ..Default::default() }).unwrap();
        ctx.game_log("sable", "second");
        let text = std::fs::read_to_string(game_log_path(&ctx.dirs.logs, "sable")).unwrap();
        assert!(text.contains("first"));
        assert!(!text.contains("second"));
        assert!(!ctx.open_game_log("sable").is_enabled());
    }
}
