use std::fs;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Library roots listed in a `libraryfolders.vdf`.
///
/// Handles both layouts:
/// - old: `"1" "/mnt/ssd/SteamLibrary"`
/// - new: nested blocks with a `"path"` entry
fn parse_libraryfolders_vdf_paths(text: &str) -> Vec<PathBuf> {
    fn unescape(raw: &str) -> String {
        let mut out = String::with_capacity(raw.len());
        let mut it = raw.chars();
        while let Some(c) = it.next() {
            if c != '\\' {
                out.push(c);
                continue;
            }
            match it.next() {
                Some('t') => out.push('\t'),
                Some('n') => out.push('\n'),
                Some(n) => out.push(n),
                None => out.push('\\'),
            }
        }
        out
    }

    let mut results: Vec<PathBuf> = Vec::new();
    for line in text.lines() {
        // quoted fields only; the separators between them are whitespace
        let fields: Vec<&str> = line.trim().split('"').skip(1).step_by(2).collect();
        let value = match fields.as_slice() {
            ["path", v] => *v,
            [k, v] if !k.is_empty() && k.chars().all(|c| c.is_ascii_digit()) => *v,
            _ => continue,
        };
        let p = PathBuf::from(unescape(value));
        if !results.contains(&p) {
            results.push(p);
        }
    }
    results
}

/// Steam installations present on this machine.
pub fn steam_roots() -> Vec<PathBuf> {
    let mut candidates: Vec<PathBuf> = Vec::new();
    if cfg!(windows) {
        if let Ok(pf86) = std::env::var("ProgramFiles(x86)") {
            candidates.push(PathBuf::from(pf86).join("Steam"));
        }
        candidates.push(PathBuf::from("C:/Program Files (x86)/Steam"));
    } else if let Some(home) = directories::BaseDirs::new().map(|b| b.home_dir().to_path_buf()) {
        candidates.push(home.join(".steam/root"));
        candidates.push(home.join(".steam/steam"));
        candidates.push(home.join(".local/share/Steam"));
        candidates.push(home.join(".var/app/com.valvesoftware.Steam/.local/share/Steam"));
        candidates.push(home.join("Library/Application Support/Steam"));
    }
    let mut roots: Vec<PathBuf> = Vec::new();
    for c in candidates {
        if !c.is_dir() { continue; }
        // ~/.steam/root and ~/.steam/steam are usually symlinks to the real install
        let real = fs::canonicalize(&c).unwrap_or(c);
        if !roots.contains(&real) {
            roots.push(real);
        }
    }
    roots
}

/// Every Steam library folder: the roots themselves plus those in their `libraryfolders.vdf`.
pub fn steam_libraries() -> Vec<PathBuf> {
    libraries_of(&steam_roots())
}

fn libraries_of(roots: &[PathBuf]) -> Vec<PathBuf> {
    let mut libs: Vec<PathBuf> = Vec::new();
    for root in roots {
        if !libs.contains(root) {
            libs.push(root.clone());
        }
        let vdf = root.join("steamapps").join("libraryfolders.vdf");
        match fs::read_to_string(&vdf) {
            Ok(text) => {
                for lib in parse_libraryfolders_vdf_paths(&text) {
                    if lib.is_dir() && !libs.contains(&lib) {
                        libs.push(lib);
                    }
                }
            }
            Err(e) => debug!("no library list at {}: {}", vdf.display(), e),
        }
    }
    libs
}

/// `(name, proton script)` for every Proton build Steam knows about.
pub fn list_proton_builds() -> Vec<(String, PathBuf)> {
    let roots = steam_roots();
    proton_builds_in(&roots, &libraries_of(&roots))
}

fn proton_builds_in(roots: &[PathBuf], libraries: &[PathBuf]) -> Vec<(String, PathBuf)> {
    let mut dirs: Vec<PathBuf> = Vec::new();
    for lib in libraries {
        if let Ok(it) = fs::read_dir(lib.join("steamapps").join("common")) {
            dirs.extend(
                it.filter_map(|e| e.ok())
                    .map(|e| e.path())
                    .filter(|p| p.file_name().is_some_and(|n| n.to_string_lossy().starts_with("Proton"))),
            );
        }
    }
    for root in roots {
        if let Ok(it) = fs::read_dir(root.join("compatibilitytools.d")) {
            dirs.extend(it.filter_map(|e| e.ok()).map(|e| e.path()));
        }
    }
    let mut builds: Vec<(String, PathBuf)> = dirs
        .into_iter()
        .filter_map(|dir| {
            let script = dir.join("proton");
            let name = dir.file_name()?.to_string_lossy().into_owned();
            script.is_file().then_some((name, script))
        })
        .collect();
    builds.sort_by(|a, b| b.0.cmp(&a.0));
    builds.dedup_by(|a, b| a.1 == b.1);
    builds
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeKind {
    Sniper,
    Soldier,
    Scout,
}

impl RuntimeKind {
    fn folder(self) -> &'static str {
        match self {
            RuntimeKind::Sniper => "SteamLinuxRuntime_sniper",
            RuntimeKind::Soldier => "SteamLinuxRuntime_soldier",
            RuntimeKind::Scout => "SteamLinuxRuntime",
        }
    }

    fn script(self) -> &'static str {
        match self {
            RuntimeKind::Scout => "scout-on-soldier-entry-point-v2",
            _ => "_v2-entry-point",
        }
    }
}

/// A Steam Linux Runtime entry point and the arguments that go before the game command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SteamRuntime {
    pub kind: RuntimeKind,
    pub path: PathBuf,
    pub args: Vec<String>,
}

fn runtime_in(libraries: &[PathBuf], kind: RuntimeKind) -> Option<SteamRuntime> {
    libraries.iter().find_map(|lib| {
        let base = lib.join("steamapps").join("common");
        // scout is launched through soldier's container
        let folder = if kind == RuntimeKind::Scout { RuntimeKind::Soldier.folder() } else { kind.folder() };
        let path = base.join(folder).join(kind.script());
        path.is_file().then(|| SteamRuntime { kind, path, args: vec!["--verb=waitforexitandrun".into(), "--".into()] })
    })
}

fn find_runtime(libraries: &[PathBuf], wanted: RuntimeKind) -> Option<SteamRuntime> {
    if let Some(rt) = runtime_in(libraries, wanted) {
        return Some(rt);
    }
    let fallback = [RuntimeKind::Sniper, RuntimeKind::Soldier, RuntimeKind::Scout]
        .into_iter()
        .filter(|k| *k != wanted)
        .find_map(|k| runtime_in(libraries, k));
    if let Some(rt) = &fallback {
        warn!("Steam runtime {:?} not found, using {:?}", wanted, rt.kind);
    }
    fallback
}

/// Steam Linux Runtime of the requested kind, or the first one available.
pub fn get_steam_runtime(wanted: RuntimeKind) -> Option<SteamRuntime> {
    find_runtime(&steam_libraries(), wanted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "#!/bin/sh\n").unwrap();
    }

    #[test]
    fn parse_vdf_paths_mixed_formats() {
        let vdf = r#"
        "LibraryFolders"
        {
            "contentstatsid" "-123456789"
            "1" "/mnt/ssd/SteamLibrary"
            "2"
            {
                "path" "/home/user/Games/SteamLibrary"
                "label" ""
                "contentid" "123456789"
            }
            "3"
            {
                "path"		"D:\\SteamLibrary"
            }
        }
        "#;
        let libs = parse_libraryfolders_vdf_paths(vdf);
        assert_eq!(
            libs,
            vec![
                PathBuf::from("/mnt/ssd/SteamLibrary"),
                PathBuf::from("/home/user/Games/SteamLibrary"),
                PathBuf::from("D:\\SteamLibrary"),
            ]
        );
    }

    #[test]
    fn proton_builds_come_from_common_and_compat_tools() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("Steam");
        touch(&root.join("steamapps/common/Proton 8.0/proton"));
        touch(&root.join("steamapps/common/Proton - Experimental/proton"));
        touch(&root.join("steamapps/common/Portal/portal"));
        touch(&root.join("compatibilitytools.d/GE-Proton9-1/proton"));
        fs::create_dir_all(root.join("compatibilitytools.d/broken")).unwrap();

        let builds = proton_builds_in(&[root.clone()], &[root.clone()]);
        let names: Vec<&str> = builds.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["Proton 8.0", "Proton - Experimental", "GE-Proton9-1"]);
    }

    #[test]
    fn runtime_falls_back_to_first_available() {
        let tmp = tempfile::tempdir().unwrap();
        let lib = tmp.path().to_path_buf();
        assert!(find_runtime(&[lib.clone()], RuntimeKind::Sniper).is_none());

        touch(&lib.join("steamapps/common/SteamLinuxRuntime_soldier/_v2-entry-point"));
        let rt = find_runtime(&[lib.clone()], RuntimeKind::Sniper).unwrap();
        assert_eq!(rt.kind, RuntimeKind::Soldier);
        assert_eq!(rt.args.last().map(String::as_str), Some("--"));

        touch(&lib.join("steamapps/common/SteamLinuxRuntime_sniper/_v2-entry-point"));
        assert_eq!(find_runtime(&[lib], RuntimeKind::Sniper).unwrap().kind, RuntimeKind::Sniper);
    }
}
