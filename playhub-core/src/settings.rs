use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{LauncherError, Result};
use crate::events::Runner;
use crate::wine::{WineInstallation, WineSettings};

/// Where the launcher keeps its config, cache, logs and downloaded tools.
#[derive(Debug, Clone)]
pub struct AppDirs {
    pub config: PathBuf,
    pub cache: PathBuf,
    pub logs: PathBuf,
    pub tools: PathBuf,
}

impl AppDirs {
    pub fn new() -> Result<Self> {
        let dirs = ProjectDirs::from("com", "playhub", "playhub")
            .ok_or_else(|| LauncherError::Config("failed to resolve project directories".into()))?;
        Ok(Self {
            config: dirs.config_dir().to_path_buf(),
            cache: dirs.cache_dir().to_path_buf(),
            logs: dirs.data_dir().join("logs"),
            tools: dirs.data_dir().join("tools"),
        })
    }

    /// Everything under one root; used by tests and portable installs.
    pub fn under(root: &Path) -> Self {
        Self {
            config: root.join("config"),
            cache: root.join("cache"),
            logs: root.join("logs"),
            tools: root.join("tools"),
        }
    }

    pub fn wine_tools(&self) -> PathBuf { self.tools.join("wine") }

    pub fn proton_tools(&self) -> PathBuf { self.tools.join("proton") }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalSettings {
    pub default_install_path: String,
    pub wine_version: WineInstallation,
    pub wine_prefix: String,
    pub alt_legendary_bin: Option<String>,
    pub alt_gogdl_bin: Option<String>,
    pub alt_nile_bin: Option<String>,
    pub disable_logs: bool,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            default_install_path: "~/Games/Playhub".into(),
            wine_version: WineInstallation::default(),
            wine_prefix: "~/Games/Playhub/Prefixes".into(),
            alt_legendary_bin: None,
            alt_gogdl_bin: None,
            alt_nile_bin: None,
            disable_logs: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameSettings {
    pub wine_version: WineInstallation,
    pub wine_prefix: String,
    pub launcher_args: Option<String>,
    pub target_exe: Option<String>,
    pub use_steam_runtime: bool,
    pub env: BTreeMap<String, String>,
}

impl Default for GameSettings {
    fn default() -> Self { Self::from_global(&GlobalSettings::default(), "default") }
}

impl GameSettings {
    /// Settings a game starts with before it has its own config file.
    pub fn from_global(global: &GlobalSettings, app_name: &str) -> Self {
        let prefix = Path::new(&global.wine_prefix).join(app_name);
        Self {
            wine_version: global.wine_version.clone(),
            wine_prefix: prefix.to_string_lossy().into_owned(),
            launcher_args: None,
            target_exe: None,
            use_steam_runtime: false,
            env: BTreeMap::new(),
        }
    }
}

/// Expands `~` and environment variables in a user supplied path.
pub fn expand_user_path(raw: &str) -> PathBuf {
    #[cfg(unix)]
    {
        match shellexpand::full(raw) {
            Ok(s) => PathBuf::from(s.into_owned()),
            Err(_) => PathBuf::from(raw),
        }
    }
    #[cfg(not(unix))]
    {
        PathBuf::from(raw)
    }
}

/// True on restricted (snap/flatpak) builds where native tools may be unavailable.
pub fn is_sandboxed() -> bool {
    std::env::var_os("SNAP").is_some() || std::env::var_os("FLATPAK_ID").is_some()
}

/// Location of a store's command line tool, split into working directory and invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolBin {
    pub dir: PathBuf,
    pub bin: String,
}

impl ToolBin {
    pub fn path(&self) -> PathBuf { self.dir.join(self.bin.trim_start_matches("./")) }
}

pub fn split_path_and_name(full: &Path) -> ToolBin {
    let dir = full.parent().map(Path::to_path_buf).unwrap_or_default();
    let name = full.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    // executables in the working directory need an explicit ./ outside Windows
    let bin = if cfg!(windows) { name } else { format!("./{name}") };
    ToolBin { dir, bin }
}

fn platform_dir() -> &'static str {
    if cfg!(windows) { "win32" } else if cfg!(target_os = "macos") { "darwin" } else { "linux" }
}

/// Store tool for `runner`, honoring the user's alternative binary if one is set.
pub fn tool_bin(runner: Runner, settings: &GlobalSettings, resources: &Path) -> Option<ToolBin> {
    let (alt, name) = match runner {
        Runner::Legendary => (&settings.alt_legendary_bin, "legendary"),
        Runner::Gog => (&settings.alt_gogdl_bin, "gogdl"),
        Runner::Nile => (&settings.alt_nile_bin, "nile"),
        Runner::Sideload => return None,
    };
    if let Some(alt) = alt.as_deref().filter(|s| !s.is_empty()) {
        return Some(split_path_and_name(&expand_user_path(alt)));
    }
    Some(split_path_and_name(&resources.join("bin").join(platform_dir()).join(name)))
}

/// TOML backed global and per-game settings.
pub struct SettingsStore {
    root: PathBuf,
}

impl SettingsStore {
    pub fn new(dirs: &AppDirs) -> Result<Self> {
        fs::create_dir_all(&dirs.config)?;
        Ok(Self { root: dirs.config.clone() })
    }

    fn global_path(&self) -> PathBuf { self.root.join("config.toml") }

    fn game_path(&self, app_name: &str) -> PathBuf { self.root.join("games").join(format!("{app_name}.toml")) }

    pub fn load_global(&self) -> Result<GlobalSettings> {
        let path = self.global_path();
        if !path.exists() {
            return Ok(GlobalSettings::default());
        }
        let text = fs::read_to_string(&path)?;
        Ok(toml::from_str(&text)?)
    }

    pub fn save_global(&self, settings: &GlobalSettings) -> Result<()> {
        let text = toml::to_string_pretty(settings)?;
        fs::write(self.global_path(), text)?;
        Ok(())
    }

    pub fn load_game(&self, app_name: &str) -> Result<GameSettings> {
        let path = self.game_path(app_name);
        if !path.exists() {
            debug!("no config for {}, using global defaults", app_name);
            return Ok(GameSettings::from_global(&self.load_global()?, app_name));
        }
        let text = fs::read_to_string(&path)?;
        Ok(toml::from_str(&text)?)
    }

    pub fn save_game(&self, app_name: &str, settings: &GameSettings) -> Result<()> {
        let path = self.game_path(app_name);
        if let Some(parent) = path.parent() { fs::create_dir_all(parent)?; }
        fs::write(path, toml::to_string_pretty(settings)?)?;
        Ok(())
    }
}

impl WineSettings for SettingsStore {
    fn global_wine(&self) -> Result<WineInstallation> { Ok(self.load_global()?.wine_version) }

    fn set_game_wine(&self, app_name: &str, wine: &WineInstallation) -> Result<()> {
        let mut game = self.load_game(app_name)?;
        game.wine_version = wine.clone();
        info!("Changing wine version of {} to {}", app_name, wine.name);
        self.save_game(app_name, &game)
    }

    fn set_global_wine(&self, wine: &WineInstallation) -> Result<()> {
        let mut global = self.load_global()?;
        global.wine_version = wine.clone();
        info!("Changing default wine version to {}", wine.name);
        self.save_global(&global)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wine::WineKind;

    #[test]
    fn missing_files_fall_back_to_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(&AppDirs::under(tmp.path())).unwrap();
        assert_eq!(store.load_global().unwrap(), GlobalSettings::default());
        let game = store.load_game("Sable").unwrap();
        assert!(game.wine_prefix.ends_with("Sable"));
    }

    #[test]
    fn adopted_wine_is_persisted_per_game_and_globally() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(&AppDirs::under(tmp.path())).unwrap();
        let wine = WineInstallation {
            kind: WineKind::Proton,
            name: "GE-Proton9-1".into(),
            bin: "/opt/GE-Proton9-1/proton".into(),
            ..Default::default()
        };
        store.set_game_wine("Sable", &wine).unwrap();
        assert_eq!(store.load_game("Sable").unwrap().wine_version, wine);
        assert_ne!(store.load_global().unwrap().wine_version, wine);

        store.set_global_wine(&wine).unwrap();
        assert_eq!(store.global_wine().unwrap(), wine);
        // new games inherit the global default
        assert_eq!(store.load_game("Other").unwrap().wine_version, wine);
    }

    #[test]
    fn tool_bin_prefers_alternative_binary() {
        let mut settings = GlobalSettings::default();
        let res = Path::new("/opt/playhub/resources");
        let def = tool_bin(Runner::Gog, &settings, res).unwrap();
        assert!(def.dir.ends_with(Path::new("bin").join(platform_dir())));
        assert!(def.bin.ends_with("gogdl"));

        settings.alt_gogdl_bin = Some("/usr/local/bin/gogdl-dev".into());
        let alt = tool_bin(Runner::Gog, &settings, res).unwrap();
        assert_eq!(alt.dir, PathBuf::from("/usr/local/bin"));
        assert_eq!(alt.path(), PathBuf::from("/usr/local/bin/gogdl-dev"));
        assert!(tool_bin(Runner::Sideload, &settings, res).is_none());
    }

    #[cfg(unix)]
    #[test]
    fn tool_invocation_is_dot_slash_prefixed() {
        let b = split_path_and_name(Path::new("/a/b/legendary"));
        assert_eq!(b.bin, "./legendary");
    }
}
