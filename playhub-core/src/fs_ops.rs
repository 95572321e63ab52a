use flate2::read::GzDecoder;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use tracing::{error, info, warn};
use walkdir::WalkDir;
use xz2::read::XzDecoder;

use crate::context::LauncherContext;
use crate::error::{LauncherError, Result};
use crate::events::{EventBus, GameStatus, Runner, Status};
use crate::process::{command_exists, run, run_quiet, RunOptions};
use crate::progress::ParserKind;
use crate::settings::is_sandboxed;

/// The parts of an installed game that filesystem workflows need.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstalledGame {
    pub app_name: String,
    pub runner: Runner,
    pub title: String,
    pub install_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum MoveResult {
    Done {
        #[serde(rename = "installPath")]
        install_path: PathBuf,
    },
    Error {
        error: String,
    },
}

impl MoveResult {
    fn error(msg: impl Into<String>) -> Self { MoveResult::Error { error: msg.into() } }
}

fn emitter<'a>(events: &'a EventBus, game: &'a InstalledGame, kind: ParserKind) -> impl FnMut(&str) + 'a {
    let mut parser = kind.parser();
    move |line| {
        if let Some(snap) = parser.parse(line) {
            events.send_progress_update(GameStatus::new(&game.app_name, game.runner, Status::Moving).with_progress(snap));
        }
    }
}

/// Moves a game's install folder under `new_parent`, reporting per-file progress.
///
/// Uses robocopy on Windows and rsync elsewhere, falling back to `mv` when rsync is missing.
/// Runs as the game's job (`Moving`, then `Done` or `Error`) and can be aborted with the
/// game's app name.
pub async fn move_install(ctx: &LauncherContext, game: &InstalledGame, new_parent: &Path) -> MoveResult {
    let Some(source) = game.install_path.as_deref() else {
        return MoveResult::error("No install path found");
    };
    let Some(folder) = source.file_name() else {
        return MoveResult::error(format!("Invalid install path {}", source.display()));
    };
    let destination = new_parent.join(folder);
    if destination == source {
        return MoveResult::Done { install_path: destination };
    }

    let job = match ctx.jobs.begin(&game.app_name, game.runner, Status::Moving) {
        Ok(job) => job,
        Err(e) => return MoveResult::error(e.to_string()),
    };
    let opts = RunOptions::default().with_abort(ctx.aborts.create(&game.app_name));
    let result = if cfg!(windows) {
        move_with_robocopy(&ctx.events, game, source, &destination, &opts).await
    } else {
        move_on_unix(&ctx.events, game, source, &destination, &opts).await
    };
    ctx.aborts.remove(&game.app_name);

    match result {
        Ok(()) => {
            info!("Finished Moving {}", game.title);
            job.finish(Status::Done);
            MoveResult::Done { install_path: destination }
        }
        Err(e) => {
            error!("Error moving {}: {}", game.title, e);
            job.finish(Status::Error);
            MoveResult::error(e.to_string())
        }
    }
}

async fn move_with_robocopy(events: &EventBus, game: &InstalledGame, source: &Path, destination: &Path, opts: &RunOptions) -> Result<()> {
    let args = [source.as_os_str(), destination.as_os_str(), OsStr::new("/MOVE"), OsStr::new("/MIR")];
    let out = run("robocopy", &args, opts, emitter(events, game, ParserKind::Robocopy)).await?;
    // robocopy exit codes below 8 mean files were copied or nothing needed copying
    match out.code {
        Some(code) if code < 8 => Ok(()),
        code => Err(LauncherError::ToolExit { tool: "robocopy".into(), code, stderr: out.stderr }),
    }
}

async fn move_on_unix(events: &EventBus, game: &InstalledGame, source: &Path, destination: &Path, opts: &RunOptions) -> Result<()> {
    if !command_exists("rsync") {
        warn!("rsync not found, moving {} with mv", game.title);
        run_quiet("mv", &[OsStr::new("-f"), source.as_os_str(), destination.as_os_str()], opts).await?.into_success("mv")?;
        return Ok(());
    }
    let origin = format!("{}/", source.display());
    info!("moving command: rsync -az --progress {} {}", origin, destination.display());
    let args = [OsStr::new("-az"), OsStr::new("--progress"), OsStr::new(&origin), destination.as_os_str()];
    run("rsync", &args, opts, emitter(events, game, ParserKind::Rsync))
        .await?
        .into_success("rsync")?;
    tokio::fs::remove_dir_all(source).await?;
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractBackend {
    /// system `tar`
    Native,
    /// in-process `tar` + `flate2`/`xz2`
    Library,
}

impl ExtractBackend {
    /// Native tar for compressed tarballs on unrestricted builds, the library otherwise.
    pub fn for_archive(path: &Path) -> Self { Self::for_archive_in(path, is_sandboxed()) }

    pub fn for_archive_in(path: &Path, sandboxed: bool) -> Self {
        let name = path.to_string_lossy();
        if !sandboxed && (name.ends_with(".tar.xz") || name.ends_with(".tar.gz")) {
            ExtractBackend::Native
        } else {
            ExtractBackend::Library
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractOptions {
    pub path: PathBuf,
    pub destination: PathBuf,
    /// leading path components dropped from every entry
    pub strip: usize,
}

pub async fn extract_files(opts: &ExtractOptions, backend: ExtractBackend) -> Result<()> {
    fs::create_dir_all(&opts.destination)?;
    match backend {
        ExtractBackend::Native => {
            info!("Extracting {} to {} using native tar", opts.path.display(), opts.destination.display());
            let strip = format!("--strip-components={}", opts.strip);
            let args = [OsStr::new("-xf"), opts.path.as_os_str(), OsStr::new("-C"), opts.destination.as_os_str(), OsStr::new(&strip)];
            run_quiet("tar", &args, &RunOptions::default()).await?.into_success("tar")?;
        }
        ExtractBackend::Library => {
            info!("Extracting {} to {} in-process", opts.path.display(), opts.destination.display());
            let opts = opts.clone();
            tokio::task::spawn_blocking(move || unpack_archive(&opts.path, &opts.destination, opts.strip))
                .await
                .map_err(|e| LauncherError::Validation(format!("extract task failed: {e}")))??;
        }
    }
    Ok(())
}

fn open_archive(path: &Path) -> Result<Box<dyn Read>> {
    let file = File::open(path)?;
    let name = path.to_string_lossy();
    let reader: Box<dyn Read> = if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        Box::new(GzDecoder::new(file))
    } else if name.ends_with(".tar.xz") || name.ends_with(".txz") {
        Box::new(XzDecoder::new(file))
    } else if name.ends_with(".tar") {
        Box::new(file)
    } else {
        return Err(LauncherError::Validation(format!("unsupported archive {}", path.display())));
    };
    Ok(reader)
}

fn unpack_archive(path: &Path, destination: &Path, strip: usize) -> Result<()> {
    let mut archive = tar::Archive::new(open_archive(path)?);
    archive.set_preserve_permissions(true);
    for entry in archive.entries()? {
        let mut entry = entry?;
        let entry_path = entry.path()?.into_owned();
        let kept: PathBuf = entry_path.components().skip(strip).collect();
        if kept.as_os_str().is_empty() {
            continue;
        }
        if kept.components().any(|c| !matches!(c, Component::Normal(_))) {
            warn!("skipping unsafe archive entry {}", entry_path.display());
            continue;
        }
        let target = destination.join(&kept);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        if entry.header().entry_type() == tar::EntryType::Link {
            // hard link sources are archive paths too, so they lose the same leading components
            let Some(link) = entry.link_name()?.map(|l| l.into_owned()) else {
                warn!("skipping hard link {} without a source", entry_path.display());
                continue;
            };
            let source: PathBuf = link.components().skip(strip).collect();
            if source.as_os_str().is_empty() || source.components().any(|c| !matches!(c, Component::Normal(_))) {
                warn!("skipping hard link {} to {}", entry_path.display(), link.display());
                continue;
            }
            if fs::symlink_metadata(&target).is_ok_and(|m| !m.is_dir()) {
                fs::remove_file(&target)?;
            }
            fs::hard_link(destination.join(&source), &target)?;
            continue;
        }
        entry.unpack(&target)?;
    }
    Ok(())
}

/// The path itself if it exists, else its nearest existing ancestor; empty if none exists.
pub fn get_first_existing_parent_path(path: &Path) -> PathBuf {
    path.ancestors()
        .find(|p| !p.as_os_str().is_empty() && p.exists())
        .map(Path::to_path_buf)
        .unwrap_or_default()
}

static SPECIAL_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r#"[:|/*?<>\\&{}%$@`!™+'"®]"#).expect("static regex"));

/// Strips characters that are not allowed (or not wanted) in install folder names.
pub fn remove_special_characters(text: &str) -> String {
    SPECIAL_CHARS.replace_all(text, "").into_owned()
}

pub fn quote_if_necessary(s: &str) -> String {
    let quoted = s.len() >= 2 && s.starts_with('"') && s.ends_with('"');
    if !quoted && s.contains(' ') { format!("\"{s}\"") } else { s.to_string() }
}

pub fn remove_quote_if_necessary(s: &str) -> String {
    if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
        return s.trim_start_matches('"').trim_end_matches('"').to_string();
    }
    s.to_string()
}

/// Deletes `<base>/<folder>` if present. Returns whether anything was removed.
pub async fn remove_folder(base: &Path, folder: &str) -> Result<bool> {
    let base = remove_quote_if_necessary(&base.to_string_lossy()).replace('\'', "");
    let target = Path::new(&base).join(folder.replace('\'', ""));
    if !target.exists() {
        return Ok(false);
    }
    tokio::fs::remove_dir_all(&target).await?;
    info!("Removed {}", target.display());
    Ok(true)
}

pub fn dir_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::AppDirs;
    use flate2::{write::GzEncoder, Compression};
    use std::sync::{Arc, Mutex};

    fn build_tar_gz(dir: &Path) -> PathBuf {
        let archive = dir.join("Wine-GE-Proton8-26.tar.gz");
        let enc = GzEncoder::new(File::create(&archive).unwrap(), Compression::fast());
        let mut builder = tar::Builder::new(enc);
        for (name, body) in [("Wine-GE-Proton8-26/bin/wine", "#!/bin/sh\n"), ("Wine-GE-Proton8-26/lib/wine/x.so", "so"), ("Wine-GE-Proton8-26/README", "hi")] {
            let mut header = tar::Header::new_gnu();
            header.set_size(body.len() as u64);
            header.set_mode(0o755);
            header.set_cksum();
            builder.append_data(&mut header, name, body.as_bytes()).unwrap();
        }
        let mut link = tar::Header::new_gnu();
        link.set_entry_type(tar::EntryType::Link);
        link.set_size(0);
        link.set_mode(0o755);
        builder.append_link(&mut link, "Wine-GE-Proton8-26/bin/wine64", "Wine-GE-Proton8-26/bin/wine").unwrap();
        builder.into_inner().unwrap().finish().unwrap();
        archive
    }

    fn listing(root: &Path) -> Vec<String> {
        let mut out: Vec<String> = WalkDir::new(root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.path().strip_prefix(root).unwrap().to_string_lossy().into_owned())
            .collect();
        out.sort();
        out
    }

    #[tokio::test]
    async fn library_extraction_strips_leading_components() {
        let tmp = tempfile::tempdir().unwrap();
        let path = build_tar_gz(tmp.path());
        let destination = tmp.path().join("out");
        extract_files(&ExtractOptions { path, destination: destination.clone(), strip: 1 }, ExtractBackend::Library).await.unwrap();
        assert_eq!(listing(&destination), vec!["README", "bin/wine", "bin/wine64", "lib/wine/x.so"]);
        assert_eq!(fs::read(destination.join("bin/wine64")).unwrap(), b"#!/bin/sh\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn native_and_library_backends_agree() {
        if !command_exists("tar") {
            return;
        }
        let tmp = tempfile::tempdir().unwrap();
        let path = build_tar_gz(tmp.path());
        let native = tmp.path().join("native");
        let library = tmp.path().join("library");
        extract_files(&ExtractOptions { path: path.clone(), destination: native.clone(), strip: 1 }, ExtractBackend::Native).await.unwrap();
        extract_files(&ExtractOptions { path, destination: library.clone(), strip: 1 }, ExtractBackend::Library).await.unwrap();
        assert_eq!(listing(&native), listing(&library));
        assert_eq!(fs::read(native.join("bin/wine")).unwrap(), fs::read(library.join("bin/wine")).unwrap());
        assert_eq!(fs::read(native.join("bin/wine64")).unwrap(), fs::read(library.join("bin/wine64")).unwrap());
    }

    #[tokio::test]
    async fn unknown_archive_types_are_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("thing.zip");
        fs::write(&path, b"PK").unwrap();
        let res = extract_files(&ExtractOptions { path, destination: tmp.path().join("o"), strip: 0 }, ExtractBackend::Library).await;
        assert!(matches!(res, Err(LauncherError::Validation(_))));
    }

    #[test]
    fn backend_choice_follows_extension_and_sandbox() {
        assert_eq!(ExtractBackend::for_archive_in(Path::new("a.tar.xz"), false), ExtractBackend::Native);
        assert_eq!(ExtractBackend::for_archive_in(Path::new("a.tar.gz"), false), ExtractBackend::Native);
        assert_eq!(ExtractBackend::for_archive_in(Path::new("a.tar.gz"), true), ExtractBackend::Library);
        assert_eq!(ExtractBackend::for_archive_in(Path::new("a.tar.xz"), true), ExtractBackend::Library);
        assert_eq!(ExtractBackend::for_archive_in(Path::new("a.tar"), false), ExtractBackend::Library);
        assert_eq!(ExtractBackend::for_archive_in(Path::new("a.zip"), false), ExtractBackend::Library);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn move_relocates_folder_and_finishes_its_job() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = LauncherContext::new(AppDirs::under(&tmp.path().join("home"))).unwrap();
        let source = tmp.path().join("games/Sable");
        fs::create_dir_all(source.join("Content")).unwrap();
        fs::write(source.join("Content/data.pak"), vec![7u8; 4096]).unwrap();
        let target_parent = tmp.path().join("ssd");
        fs::create_dir_all(&target_parent).unwrap();

        let statuses = Arc::new(Mutex::new(Vec::new()));
        let _sub = ctx.events.subscribe_status({
            let statuses = statuses.clone();
            move |s| statuses.lock().unwrap().push(s.status)
        });
        let game = InstalledGame { app_name: "sable".into(), runner: Runner::Gog, title: "Sable".into(), install_path: Some(source.clone()) };

        let res = move_install(&ctx, &game, &target_parent).await;
        assert_eq!(res, MoveResult::Done { install_path: target_parent.join("Sable") });
        assert_eq!(fs::read(target_parent.join("Sable/Content/data.pak")).unwrap().len(), 4096);
        assert!(!source.exists());
        assert_eq!(*statuses.lock().unwrap(), vec![Status::Moving, Status::Done]);
        assert!(ctx.aborts.is_empty());
        assert!(!ctx.jobs.is_running("sable"));
    }

    #[tokio::test]
    async fn failed_move_finishes_with_error() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = LauncherContext::new(AppDirs::under(tmp.path())).unwrap();
        let statuses = Arc::new(Mutex::new(Vec::new()));
        let _sub = ctx.events.subscribe_status({
            let statuses = statuses.clone();
            move |s| statuses.lock().unwrap().push(s.status)
        });
        let missing = tmp.path().join("games/Gone");
        let game = InstalledGame { app_name: "gone".into(), runner: Runner::Gog, title: "Gone".into(), install_path: Some(missing) };
        let res = move_install(&ctx, &game, &tmp.path().join("ssd")).await;
        assert!(matches!(res, MoveResult::Error { .. }), "{res:?}");
        assert_eq!(*statuses.lock().unwrap(), vec![Status::Moving, Status::Error]);
        assert!(!ctx.jobs.is_running("gone"));
    }

    #[tokio::test]
    async fn move_is_refused_while_the_game_is_busy() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = LauncherContext::new(AppDirs::under(tmp.path())).unwrap();
        let source = tmp.path().join("games/Sable");
        fs::create_dir_all(&source).unwrap();
        let busy = ctx.jobs.begin("sable", Runner::Gog, Status::Playing).unwrap();
        let game = InstalledGame { app_name: "sable".into(), runner: Runner::Gog, title: "Sable".into(), install_path: Some(source.clone()) };
        let res = move_install(&ctx, &game, &tmp.path().join("ssd")).await;
        assert!(matches!(res, MoveResult::Error { ref error } if error.contains("already playing")), "{res:?}");
        assert!(source.exists());
        busy.finish(Status::Done);
    }

    #[tokio::test]
    async fn move_without_install_path_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = LauncherContext::new(AppDirs::under(tmp.path())).unwrap();
        let game = InstalledGame { app_name: "x".into(), runner: Runner::Legendary, title: "X".into(), install_path: None };
        let res = move_install(&ctx, &game, Path::new("/tmp")).await;
        assert_eq!(res, MoveResult::Error { error: "No install path found".into() });
    }

    #[test]
    fn folder_names_lose_special_characters() {
        assert_eq!(remove_special_characters("Baldur's Gate: Enhanced Edition™"), "Baldurs Gate Enhanced Edition");
        assert_eq!(remove_special_characters("A/B\\C*D?\"E\""), "ABCDE");
    }

    #[test]
    fn quoting_helpers() {
        assert_eq!(quote_if_necessary("/games/My Game"), "\"/games/My Game\"");
        assert_eq!(quote_if_necessary("\"/games/My Game\""), "\"/games/My Game\"");
        assert_eq!(quote_if_necessary("/games/x"), "/games/x");
        assert_eq!(remove_quote_if_necessary("\"\"/a b\"\""), "/a b");
        assert_eq!(remove_quote_if_necessary("/a b"), "/a b");
    }

    #[test]
    fn first_existing_parent() {
        let tmp = tempfile::tempdir().unwrap();
        let deep = tmp.path().join("a/b/c");
        assert_eq!(get_first_existing_parent_path(&deep), tmp.path());
        assert_eq!(get_first_existing_parent_path(Path::new("relative/missing")), PathBuf::new());
    }

    #[tokio::test]
    async fn remove_folder_and_size() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("Game/sub")).unwrap();
        fs::write(tmp.path().join("Game/a"), [0u8; 10]).unwrap();
        fs::write(tmp.path().join("Game/sub/b"), [0u8; 5]).unwrap();
        assert_eq!(dir_size(&tmp.path().join("Game")), 15);
        let quoted = format!("'{}'", tmp.path().display());
        assert!(remove_folder(Path::new(&quoted), "Game").await.unwrap());
        assert!(!remove_folder(tmp.path(), "Game").await.unwrap());
    }
}
