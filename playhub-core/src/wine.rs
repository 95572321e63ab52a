use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use crate::error::{LauncherError, Result};
use crate::process::{run_quiet, RunOptions};
use crate::settings::{expand_user_path, AppDirs, GameSettings};
use crate::steam;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WineKind {
    #[default]
    Wine,
    Proton,
    Crossover,
    Toolkit,
    Custom,
}

/// A compatibility layer. Game settings hold their own copy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WineInstallation {
    pub kind: WineKind,
    pub name: String,
    pub bin: String,
    pub wineserver: Option<String>,
    pub lib: Option<String>,
    pub lib32: Option<String>,
}

impl WineInstallation {
    pub fn is_proton(&self) -> bool { self.kind == WineKind::Proton }
}

/// The wine executable to run and the prefix it should use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WineBinary {
    /// Empty when a Proton build has neither known layout.
    pub wine_bin: PathBuf,
    pub wine_prefix: PathBuf,
}

/// Resolves the real wine binary of a Proton build.
///
/// Proton 7 and older ship it under `dist/`, GE-Proton and Experimental under `files/`.
/// Non-Proton installations are returned unchanged.
pub fn get_wine_from_proton(wine: &WineInstallation, wine_prefix: &Path) -> WineBinary {
    if !wine.is_proton() {
        return WineBinary { wine_bin: PathBuf::from(&wine.bin), wine_prefix: wine_prefix.to_path_buf() };
    }
    let wine_prefix = wine_prefix.join("pfx");
    let base = Path::new(&wine.bin).parent().unwrap_or_else(|| Path::new(""));
    for dist in ["dist", "files"] {
        let candidate = base.join(dist).join("bin").join("wine");
        if candidate.is_file() {
            return WineBinary { wine_bin: candidate, wine_prefix };
        }
    }
    error!("Proton {} has an abnormal structure, unable to supply Wine binary!", wine.name);
    WineBinary { wine_bin: PathBuf::new(), wine_prefix }
}

fn is_executable_file(path: &Path) -> bool {
    let Ok(meta) = std::fs::metadata(path) else { return false };
    if !meta.is_file() { return false; }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}

/// Decides whether a compatibility layer can be used.
pub trait WineValidator {
    fn is_valid(&self, wine: &WineInstallation) -> impl Future<Output = bool> + Send;
}

/// Valid when the binary exists and is executable, Proton builds have a wine binary,
/// and (optionally) `wine --version` succeeds.
#[derive(Debug, Clone, Default)]
pub struct ProbeValidator {
    pub probe_version: bool,
}

impl WineValidator for ProbeValidator {
    async fn is_valid(&self, wine: &WineInstallation) -> bool {
        if wine.bin.is_empty() {
            return false;
        }
        let bin = expand_user_path(&wine.bin);
        if !is_executable_file(&bin) {
            return false;
        }
        let resolved = if wine.is_proton() {
            let w = WineInstallation { bin: bin.to_string_lossy().into_owned(), ..wine.clone() };
            get_wine_from_proton(&w, Path::new("")).wine_bin
        } else {
            bin
        };
        if resolved.as_os_str().is_empty() {
            return false;
        }
        if !self.probe_version {
            return true;
        }
        match run_quiet(&resolved, &["--version"], &RunOptions::default()).await {
            Ok(out) => out.success(),
            Err(e) => {
                warn!("version probe of {} failed: {}", resolved.display(), e);
                false
            }
        }
    }
}

/// Asks the user whether to launch with a different compatibility layer.
pub trait WinePrompt {
    fn confirm_substitution(&self, selected: &str, found: &str) -> impl Future<Output = bool> + Send;
}

/// Settings collaborator the resolver reads the default from and writes adoptions to.
pub trait WineSettings {
    fn global_wine(&self) -> Result<WineInstallation>;
    fn set_game_wine(&self, app_name: &str, wine: &WineInstallation) -> Result<()>;
    fn set_global_wine(&self, wine: &WineInstallation) -> Result<()>;
}

/// Source of installed alternatives and of the default download.
pub trait WineCatalog {
    /// Installed layers, best candidate first.
    fn alternatives(&self) -> impl Future<Output = Vec<WineInstallation>> + Send;
    /// Downloads and installs the platform default (Wine-GE on Linux, Crossover on macOS).
    fn download_default(&self) -> impl Future<Output = Result<()>> + Send;
}

/// Terminal outcomes of [`check_wine_before_launch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WineResolution {
    AlreadyValid,
    Adopted(WineInstallation),
    DownloadedFallback(WineInstallation),
    Aborted,
}

impl WineResolution {
    pub fn can_launch(&self) -> bool { !matches!(self, WineResolution::Aborted) }
}

async fn offer_substitute<P, S>(app_name: &str, game: &mut GameSettings, candidate: WineInstallation, prompt: &P, settings: &S) -> Result<WineResolution>
where
    P: WinePrompt,
    S: WineSettings,
{
    if !prompt.confirm_substitution(&game.wine_version.name, &candidate.name).await {
        info!("User canceled the launch");
        return Ok(WineResolution::Aborted);
    }
    settings.set_game_wine(app_name, &candidate)?;
    game.wine_version = candidate.clone();
    Ok(WineResolution::Adopted(candidate))
}

async fn download_fallback<C, S>(catalog: &C, settings: &S) -> Option<WineInstallation>
where
    C: WineCatalog,
    S: WineSettings,
{
    if let Err(e) = catalog.download_default().await {
        error!("Could not download a default wine version: {}", e);
        return None;
    }
    let downloaded = catalog.alternatives().await.into_iter().next()?;
    if let Err(e) = settings.set_global_wine(&downloaded) {
        error!("Error when changing wine version to default: {}", e);
        return None;
    }
    Some(downloaded)
}

/// Makes sure `game` has a usable compatibility layer before launch.
///
/// Order: the configured layer, the global default (prompted), a freshly downloaded
/// default when no valid alternative is installed, and finally the first installed
/// alternative (prompted). A declined prompt ends the attempt without touching settings.
pub async fn check_wine_before_launch<V, P, S, C>(
    app_name: &str,
    game: &mut GameSettings,
    validator: &V,
    prompt: &P,
    settings: &S,
    catalog: &C,
) -> Result<WineResolution>
where
    V: WineValidator,
    P: WinePrompt,
    S: WineSettings,
    C: WineCatalog,
{
    if validator.is_valid(&game.wine_version).await {
        return Ok(WineResolution::AlreadyValid);
    }
    error!("Wine version {} is not valid, trying another one.", game.wine_version.name);

    let default = settings.global_wine()?;
    if validator.is_valid(&default).await {
        return offer_substitute(app_name, game, default, prompt, settings).await;
    }

    let first = catalog.alternatives().await.into_iter().next();
    let first_valid = match &first {
        Some(w) => validator.is_valid(w).await,
        None => false,
    };

    if !first_valid {
        if let Some(downloaded) = download_fallback(catalog, settings).await {
            settings.set_game_wine(app_name, &downloaded)?;
            game.wine_version = downloaded.clone();
            return Ok(WineResolution::DownloadedFallback(downloaded));
        }
        return Ok(WineResolution::Aborted);
    }

    match first {
        Some(first) => offer_substitute(app_name, game, first, prompt, settings).await,
        None => Ok(WineResolution::Aborted),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtonVerb {
    Run,
    WaitForExitAndRun,
}

impl ProtonVerb {
    pub fn as_str(self) -> &'static str {
        match self {
            ProtonVerb::Run => "run",
            ProtonVerb::WaitForExitAndRun => "waitforexitandrun",
        }
    }
}

/// Program, arguments and environment to run something inside a game's prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WineCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

pub fn wine_command(game: &GameSettings, parts: &[String], verb: ProtonVerb) -> Result<WineCommand> {
    let wine = &game.wine_version;
    if wine.bin.is_empty() {
        return Err(LauncherError::Validation(format!("no wine binary configured for {}", wine.name)));
    }
    let prefix = expand_user_path(&game.wine_prefix);
    let program = expand_user_path(&wine.bin);
    let mut env: Vec<(String, String)> = game.env.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    let mut args = Vec::new();

    if wine.is_proton() {
        env.push(("STEAM_COMPAT_DATA_PATH".into(), prefix.to_string_lossy().into_owned()));
        let client = steam::steam_roots().into_iter().next().unwrap_or_default();
        env.push(("STEAM_COMPAT_CLIENT_INSTALL_PATH".into(), client.to_string_lossy().into_owned()));
        args.push(verb.as_str().to_string());
    } else {
        env.push(("WINEPREFIX".into(), prefix.to_string_lossy().into_owned()));
        if let Some(server) = wine.wineserver.as_deref().filter(|s| !s.is_empty()) {
            env.push(("WINESERVER".into(), server.to_string()));
        }
    }
    args.extend(parts.iter().cloned());
    Ok(WineCommand { program, args, env })
}

/// Stops every process in the game's prefix.
pub async fn shutdown_wine(game: &GameSettings) -> Result<()> {
    if let Some(server) = game.wine_version.wineserver.as_deref().filter(|s| !s.is_empty()) {
        let opts = RunOptions::default().with_env("WINEPREFIX", expand_user_path(&game.wine_prefix).to_string_lossy());
        run_quiet(expand_user_path(server), &["-k"], &opts).await?;
        return Ok(());
    }
    let cmd = wine_command(game, &["wineboot".to_string(), "-k".to_string()], ProtonVerb::WaitForExitAndRun)?;
    let mut opts = RunOptions::default();
    opts.env = cmd.env;
    run_quiet(&cmd.program, &cmd.args[..], &opts).await?;
    Ok(())
}

fn dir_entries(dir: &Path) -> Vec<PathBuf> {
    let mut out: Vec<PathBuf> = std::fs::read_dir(dir)
        .map(|it| it.filter_map(|e| e.ok()).map(|e| e.path()).filter(|p| p.is_dir()).collect())
        .unwrap_or_default();
    // newest builds sort last by name; offer them first
    out.sort();
    out.reverse();
    out
}

/// Compatibility layers installed on this machine, launcher-managed ones first.
pub fn list_alternative_wines(dirs: &AppDirs) -> Vec<WineInstallation> {
    let mut found = Vec::new();
    for dir in dir_entries(&dirs.wine_tools()) {
        let bin = dir.join("bin").join("wine");
        if !bin.is_file() { continue; }
        let name = dir.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        let kind = if name.contains("Crossover") { WineKind::Crossover } else { WineKind::Wine };
        let server = dir.join("bin").join("wineserver");
        found.push(WineInstallation {
            kind,
            name,
            bin: bin.to_string_lossy().into_owned(),
            wineserver: server.is_file().then(|| server.to_string_lossy().into_owned()),
            lib: Some(dir.join("lib").to_string_lossy().into_owned()),
            lib32: Some(dir.join("lib32").to_string_lossy().into_owned()),
        });
    }
    for dir in dir_entries(&dirs.proton_tools()) {
        let bin = dir.join("proton");
        if !bin.is_file() { continue; }
        let name = dir.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        found.push(WineInstallation { kind: WineKind::Proton, name, bin: bin.to_string_lossy().into_owned(), ..Default::default() });
    }
    for (name, bin) in steam::list_proton_builds() {
        if found.iter().any(|w| w.bin == bin.to_string_lossy()) { continue; }
        found.push(WineInstallation { kind: WineKind::Proton, name, bin: bin.to_string_lossy().into_owned(), ..Default::default() });
    }
    if let Ok(bin) = which::which("wine") {
        let server = which::which("wineserver").ok();
        found.push(WineInstallation {
            kind: WineKind::Wine,
            name: "Wine Default".into(),
            bin: bin.to_string_lossy().into_owned(),
            wineserver: server.map(|s| s.to_string_lossy().into_owned()),
            ..Default::default()
        });
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    fn touch_exec(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, "#!/bin/sh\necho wine-9.0\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
    }

    fn proton(dir: &Path) -> WineInstallation {
        WineInstallation { kind: WineKind::Proton, name: "GE-Proton9-1".into(), bin: dir.join("proton").to_string_lossy().into_owned(), ..Default::default() }
    }

    fn wine(name: &str) -> WineInstallation {
        WineInstallation { kind: WineKind::Wine, name: name.into(), bin: format!("/opt/{name}/bin/wine"), ..Default::default() }
    }

    #[test]
    fn proton_prefers_files_layout_when_dist_missing() {
        let tmp = tempfile::tempdir().unwrap();
        touch_exec(&tmp.path().join("files/bin/wine"));
        let res = get_wine_from_proton(&proton(tmp.path()), Path::new("/prefixes/game"));
        assert_eq!(res.wine_bin, tmp.path().join("files/bin/wine"));
        assert_eq!(res.wine_prefix, PathBuf::from("/prefixes/game/pfx"));
    }

    #[test]
    fn proton_dist_layout_wins_over_files() {
        let tmp = tempfile::tempdir().unwrap();
        touch_exec(&tmp.path().join("dist/bin/wine"));
        touch_exec(&tmp.path().join("files/bin/wine"));
        let res = get_wine_from_proton(&proton(tmp.path()), Path::new("/p"));
        assert_eq!(res.wine_bin, tmp.path().join("dist/bin/wine"));
    }

    #[test]
    fn abnormal_proton_yields_empty_binary() {
        let tmp = tempfile::tempdir().unwrap();
        let res = get_wine_from_proton(&proton(tmp.path()), Path::new("/p"));
        assert!(res.wine_bin.as_os_str().is_empty());
        assert_eq!(res.wine_prefix, PathBuf::from("/p/pfx"));
    }

    #[test]
    fn plain_wine_is_passed_through() {
        let w = wine("wine-ge");
        let res = get_wine_from_proton(&w, Path::new("/p"));
        assert_eq!(res.wine_bin, PathBuf::from(&w.bin));
        assert_eq!(res.wine_prefix, PathBuf::from("/p"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn probe_validator_checks_files_and_version() {
        let tmp = tempfile::tempdir().unwrap();
        let v = ProbeValidator { probe_version: true };
        let bin = tmp.path().join("bin/wine");
        let mut w = WineInstallation { name: "local".into(), bin: bin.to_string_lossy().into_owned(), ..Default::default() };
        assert!(!v.is_valid(&w).await);
        touch_exec(&bin);
        assert!(v.is_valid(&w).await);
        w.bin = String::new();
        assert!(!v.is_valid(&w).await);

        let p = proton(tmp.path());
        touch_exec(Path::new(&p.bin));
        assert!(!v.is_valid(&p).await, "proton without a wine binary is invalid");
        touch_exec(&tmp.path().join("files/bin/wine"));
        assert!(v.is_valid(&p).await);
    }

    struct FakeValidator(HashSet<String>);
    impl WineValidator for FakeValidator {
        async fn is_valid(&self, wine: &WineInstallation) -> bool { self.0.contains(&wine.name) }
    }

    struct FakePrompt {
        answer: bool,
        asked: Mutex<Vec<(String, String)>>,
    }
    impl WinePrompt for FakePrompt {
        async fn confirm_substitution(&self, selected: &str, found: &str) -> bool {
            self.asked.lock().unwrap().push((selected.into(), found.into()));
            self.answer
        }
    }

    #[derive(Default)]
    struct FakeSettings {
        global: Mutex<WineInstallation>,
        game: Mutex<Option<WineInstallation>>,
    }
    impl WineSettings for FakeSettings {
        fn global_wine(&self) -> Result<WineInstallation> { Ok(self.global.lock().unwrap().clone()) }
        fn set_game_wine(&self, _app: &str, w: &WineInstallation) -> Result<()> {
            *self.game.lock().unwrap() = Some(w.clone());
            Ok(())
        }
        fn set_global_wine(&self, w: &WineInstallation) -> Result<()> {
            *self.global.lock().unwrap() = w.clone();
            Ok(())
        }
    }

    struct FakeCatalog {
        installed: Mutex<Vec<WineInstallation>>,
        download: Option<WineInstallation>,
        downloads: Mutex<u32>,
    }
    impl FakeCatalog {
        fn new(installed: Vec<WineInstallation>, download: Option<WineInstallation>) -> Self {
            Self { installed: Mutex::new(installed), download, downloads: Mutex::new(0) }
        }
    }
    impl WineCatalog for FakeCatalog {
        async fn alternatives(&self) -> Vec<WineInstallation> { self.installed.lock().unwrap().clone() }
        async fn download_default(&self) -> Result<()> {
            *self.downloads.lock().unwrap() += 1;
            match &self.download {
                Some(w) => {
                    self.installed.lock().unwrap().insert(0, w.clone());
                    Ok(())
                }
                None => Err(LauncherError::NotFound("default wine".into())),
            }
        }
    }

    fn valid(names: &[&str]) -> FakeValidator { FakeValidator(names.iter().map(|s| s.to_string()).collect()) }

    fn prompt(answer: bool) -> FakePrompt { FakePrompt { answer, asked: Mutex::new(Vec::new()) } }

    fn game_with(w: WineInstallation) -> GameSettings { GameSettings { wine_version: w, ..Default::default() } }

    #[tokio::test]
    async fn valid_configuration_is_kept() {
        let mut game = game_with(wine("configured"));
        let p = prompt(true);
        let s = FakeSettings::default();
        let c = FakeCatalog::new(vec![], None);
        let res = check_wine_before_launch("g", &mut game, &valid(&["configured"]), &p, &s, &c).await.unwrap();
        assert_eq!(res, WineResolution::AlreadyValid);
        assert!(p.asked.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn valid_global_default_is_adopted_on_accept() {
        let mut game = game_with(wine("broken"));
        let p = prompt(true);
        let s = FakeSettings { global: Mutex::new(wine("default")), ..Default::default() };
        let c = FakeCatalog::new(vec![], None);
        let res = check_wine_before_launch("g", &mut game, &valid(&["default"]), &p, &s, &c).await.unwrap();
        assert_eq!(res, WineResolution::Adopted(wine("default")));
        assert_eq!(game.wine_version, wine("default"));
        assert_eq!(*s.game.lock().unwrap(), Some(wine("default")));
        assert_eq!(p.asked.lock().unwrap()[0], ("broken".to_string(), "default".to_string()));
    }

    struct ChannelPrompt(Mutex<Option<tokio::sync::oneshot::Receiver<bool>>>);
    impl WinePrompt for ChannelPrompt {
        async fn confirm_substitution(&self, _: &str, _: &str) -> bool {
            let rx = self.0.lock().unwrap().take();
            match rx {
                Some(rx) => rx.await.unwrap_or(false),
                None => false,
            }
        }
    }

    // single-threaded runtime: the answer can only arrive if the resolver yields while waiting
    #[tokio::test]
    async fn prompt_answer_arrives_while_resolver_waits() {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let p = ChannelPrompt(Mutex::new(Some(rx)));
        let answer = tokio::spawn(async move { tx.send(true) });
        let mut game = game_with(wine("broken"));
        let s = FakeSettings { global: Mutex::new(wine("default")), ..Default::default() };
        let c = FakeCatalog::new(vec![], None);
        let res = check_wine_before_launch("g", &mut game, &valid(&["default"]), &p, &s, &c).await.unwrap();
        assert_eq!(res, WineResolution::Adopted(wine("default")));
        assert!(answer.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn rejecting_the_prompt_changes_nothing() {
        let mut game = game_with(wine("broken"));
        let p = prompt(false);
        let s = FakeSettings { global: Mutex::new(wine("default")), ..Default::default() };
        let c = FakeCatalog::new(vec![wine("alt")], None);
        let res = check_wine_before_launch("g", &mut game, &valid(&["default", "alt"]), &p, &s, &c).await.unwrap();
        assert_eq!(res, WineResolution::Aborted);
        assert_eq!(game.wine_version, wine("broken"));
        assert!(s.game.lock().unwrap().is_none());
        assert_eq!(*c.downloads.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn downloads_default_when_no_alternative_exists() {
        let mut game = game_with(wine("broken"));
        let p = prompt(false);
        let s = FakeSettings::default();
        let c = FakeCatalog::new(vec![], Some(wine("Wine-GE-Proton8-26")));
        let res = check_wine_before_launch("g", &mut game, &valid(&[]), &p, &s, &c).await.unwrap();
        assert_eq!(res, WineResolution::DownloadedFallback(wine("Wine-GE-Proton8-26")));
        assert_eq!(*s.global.lock().unwrap(), wine("Wine-GE-Proton8-26"));
        assert_eq!(game.wine_version.name, "Wine-GE-Proton8-26");
        assert!(p.asked.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn downloads_default_when_first_alternative_is_invalid() {
        let mut game = game_with(wine("broken"));
        let s = FakeSettings::default();
        let c = FakeCatalog::new(vec![wine("stale")], Some(wine("fresh")));
        let res = check_wine_before_launch("g", &mut game, &valid(&[]), &prompt(true), &s, &c).await.unwrap();
        assert_eq!(res, WineResolution::DownloadedFallback(wine("fresh")));
    }

    #[tokio::test]
    async fn failed_download_aborts() {
        let mut game = game_with(wine("broken"));
        let s = FakeSettings::default();
        let c = FakeCatalog::new(vec![], None);
        let res = check_wine_before_launch("g", &mut game, &valid(&[]), &prompt(true), &s, &c).await.unwrap();
        assert_eq!(res, WineResolution::Aborted);
        assert_eq!(*c.downloads.lock().unwrap(), 1);
        assert!(!res.can_launch());
    }

    #[tokio::test]
    async fn valid_first_alternative_is_offered() {
        let mut game = game_with(wine("broken"));
        let p = prompt(true);
        let s = FakeSettings::default();
        let c = FakeCatalog::new(vec![wine("alt"), wine("other")], Some(wine("never")));
        let res = check_wine_before_launch("g", &mut game, &valid(&["alt"]), &p, &s, &c).await.unwrap();
        assert_eq!(res, WineResolution::Adopted(wine("alt")));
        assert_eq!(*c.downloads.lock().unwrap(), 0);
    }

    #[test]
    fn proton_command_uses_verb_and_compat_data() {
        let mut game = game_with(WineInstallation { kind: WineKind::Proton, name: "P".into(), bin: "/opt/p/proton".into(), ..Default::default() });
        game.wine_prefix = "/prefixes/g".into();
        let cmd = wine_command(&game, &["game.exe".into()], ProtonVerb::WaitForExitAndRun).unwrap();
        assert_eq!(cmd.program, PathBuf::from("/opt/p/proton"));
        assert_eq!(cmd.args, vec!["waitforexitandrun".to_string(), "game.exe".to_string()]);
        assert!(cmd.env.contains(&("STEAM_COMPAT_DATA_PATH".to_string(), "/prefixes/g".to_string())));
    }

    #[test]
    fn wine_command_sets_prefix_and_rejects_empty_bin() {
        let mut game = game_with(wine("w"));
        game.wine_prefix = "/prefixes/w".into();
        let cmd = wine_command(&game, &["reg".into(), "add".into()], ProtonVerb::Run).unwrap();
        assert_eq!(cmd.args, vec!["reg".to_string(), "add".to_string()]);
        assert!(cmd.env.contains(&("WINEPREFIX".to_string(), "/prefixes/w".to_string())));

        game.wine_version.bin.clear();
        assert!(matches!(wine_command(&game, &[], ProtonVerb::Run), Err(LauncherError::Validation(_))));
    }

    #[test]
    fn alternatives_include_managed_tools() {
        let tmp = tempfile::tempdir().unwrap();
        let dirs = AppDirs::under(tmp.path());
        touch_exec(&dirs.wine_tools().join("Wine-GE-Proton8-26/bin/wine"));
        touch_exec(&dirs.proton_tools().join("GE-Proton9-1/proton"));
        std::fs::create_dir_all(dirs.wine_tools().join("empty")).unwrap();
        let found = list_alternative_wines(&dirs);
        assert_eq!(found[0].name, "Wine-GE-Proton8-26");
        assert_eq!(found[1].kind, WineKind::Proton);
        assert!(!found.iter().any(|w| w.name == "empty"));
    }
}
