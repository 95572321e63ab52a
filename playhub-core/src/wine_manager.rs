use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::abort::AbortToken;
use crate::download::download_file;
use crate::error::{LauncherError, NetworkStage, Result};
use crate::events::Status;
use crate::fs_ops::{dir_size, extract_files, ExtractBackend, ExtractOptions};
use crate::progress::{bytes_to_size, ProgressSnapshot};
use crate::settings::AppDirs;
use crate::wine::{list_alternative_wines, WineCatalog, WineInstallation, WineKind};

const CACHE_TTL: Duration = Duration::from_secs(8 * 60);

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GitHubAsset {
    pub name: String,
    pub browser_download_url: Option<String>,
    pub size: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GitHubRelease {
    pub tag_name: Option<String>,
    pub published_at: Option<String>,
    pub assets: Vec<GitHubAsset>,
}

/// Where compatibility-layer builds are published.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WineSource {
    WineGe,
    ProtonGe,
    Crossover,
}

impl WineSource {
    pub fn for_host() -> &'static [WineSource] {
        if cfg!(target_os = "macos") {
            &[WineSource::Crossover]
        } else {
            &[WineSource::WineGe, WineSource::ProtonGe]
        }
    }

    fn repo(self) -> (&'static str, &'static str) {
        match self {
            WineSource::WineGe => ("GloriousEggroll", "wine-ge-custom"),
            WineSource::ProtonGe => ("GloriousEggroll", "proton-ge-custom"),
            WineSource::Crossover => ("Gcenx", "winecx"),
        }
    }

    fn kind(self) -> WineKind {
        match self {
            WineSource::WineGe => WineKind::Wine,
            WineSource::ProtonGe => WineKind::Proton,
            WineSource::Crossover => WineKind::Crossover,
        }
    }

    /// Display name of a release, e.g. `Wine-GE-Proton8-26` for tag `GE-Proton8-26`.
    pub fn version_name(self, tag: &str) -> String {
        match self {
            WineSource::WineGe => format!("Wine-{tag}"),
            WineSource::ProtonGe => format!("Proton-{tag}"),
            WineSource::Crossover => format!("Wine-Crossover-{}", tag.trim_start_matches("crossover-wine-")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WineRelease {
    pub version: String,
    pub kind: WineKind,
    pub download_url: String,
    pub size: u64,
    pub date: String,
}

fn release_from_github(source: WineSource, rel: &GitHubRelease) -> Option<WineRelease> {
    let tag = rel.tag_name.as_deref()?;
    let asset = rel
        .assets
        .iter()
        .find(|a| a.name.ends_with(".tar.xz") || a.name.ends_with(".tar.gz"))?;
    Some(WineRelease {
        version: source.version_name(tag),
        kind: source.kind(),
        download_url: asset.browser_download_url.clone()?,
        size: asset.size.unwrap_or(0),
        date: rel.published_at.as_deref().unwrap_or("").split('T').next().unwrap_or("").to_string(),
    })
}

/// The release installed when nothing usable is found: Wine-GE on Linux, Crossover on macOS.
pub fn select_default_release<'a>(releases: &'a [WineRelease], target_os: &str) -> Option<&'a WineRelease> {
    let needle = match target_os {
        "linux" => "Wine-GE-Proton",
        "macos" => "Wine-Crossover",
        _ => return None,
    };
    releases.iter().find(|r| r.version.contains(needle))
}

fn cache_is_valid(p: &Path, ttl: Duration) -> bool {
    fs::metadata(p)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.elapsed().ok())
        .is_some_and(|elapsed| elapsed < ttl)
}

/// Called with the release version and its phase: `Installing` while downloading,
/// `Extracting` while unpacking, then `Done`.
pub type WineProgress = Arc<dyn Fn(&str, Status, &ProgressSnapshot) + Send + Sync>;

/// Lists and installs compatibility layers published on GitHub.
#[derive(Clone)]
pub struct GithubWineCatalog {
    client: reqwest::Client,
    dirs: AppDirs,
    abort: AbortToken,
    on_progress: Option<WineProgress>,
}

impl GithubWineCatalog {
    pub fn new(dirs: AppDirs, abort: AbortToken) -> Self {
        Self { client: reqwest::Client::new(), dirs, abort, on_progress: None }
    }

    pub fn with_progress(mut self, f: WineProgress) -> Self {
        self.on_progress = Some(f);
        self
    }

    fn cache_file(&self, owner: &str, repo: &str) -> PathBuf {
        self.dirs.cache.join("github").join(format!("{owner}_{repo}_releases.json"))
    }

    /// Releases of one repository, served from an 8 minute disk cache when fresh.
    pub async fn fetch_releases(&self, owner: &str, repo: &str) -> Result<Vec<GitHubRelease>> {
        let cache = self.cache_file(owner, repo);
        if cache_is_valid(&cache, CACHE_TTL) {
            if let Ok(v) = fs::read_to_string(&cache).map(|t| serde_json::from_str::<Vec<GitHubRelease>>(&t)) {
                match v {
                    Ok(v) => return Ok(v),
                    Err(e) => warn!("ignoring corrupt release cache {}: {}", cache.display(), e),
                }
            }
        }

        let url = format!("https://api.github.com/repos/{owner}/{repo}/releases");
        info!("GitHub fetch: {}", url);
        let resp = self
            .client
            .get(&url)
            .header("User-Agent", "playhub")
            .header("Accept", "application/vnd.github.v3+json")
            .send()
            .await?;
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(LauncherError::Network { stage: NetworkStage::Transfer, detail: format!("GitHub API error: {status}") });
        }
        if let Some(parent) = cache.parent() {
            fs::create_dir_all(parent).ok();
        }
        fs::write(&cache, &text).ok();
        Ok(serde_json::from_str(&text)?)
    }

    pub async fn available_releases(&self) -> Result<Vec<WineRelease>> {
        let mut out = Vec::new();
        for source in WineSource::for_host() {
            let (owner, repo) = source.repo();
            let releases = self.fetch_releases(owner, repo).await?;
            out.extend(releases.iter().filter_map(|r| release_from_github(*source, r)));
        }
        Ok(out)
    }

    fn install_dir(&self, release: &WineRelease) -> PathBuf {
        let base = if release.kind == WineKind::Proton { self.dirs.proton_tools() } else { self.dirs.wine_tools() };
        base.join(&release.version)
    }

    fn report(&self, version: &str, phase: Status, p: &ProgressSnapshot) {
        if let Some(f) = &self.on_progress {
            f(version, phase, p);
        }
    }

    /// Downloads a release into the cache and unpacks it into the tools directory.
    pub async fn install_release(&self, release: &WineRelease) -> Result<PathBuf> {
        let file_name = release.download_url.rsplit('/').next().unwrap_or("wine.tar.xz");
        let archive = self.dirs.cache.join("downloads").join(file_name);
        let version = release.version.as_str();
        download_file(&self.client, &release.download_url, &archive, &self.abort, |p| self.report(version, Status::Installing, p)).await?;

        let destination = self.install_dir(release);
        self.report(version, Status::Extracting, &ProgressSnapshot { file: file_name.to_string(), ..Default::default() });
        let opts = ExtractOptions { path: archive.clone(), destination: destination.clone(), strip: 1 };
        let res = extract_files(&opts, ExtractBackend::for_archive(&archive)).await;
        if let Err(e) = tokio::fs::remove_file(&archive).await {
            warn!("could not remove {}: {}", archive.display(), e);
        }
        res?;
        let size = dir_size(&destination);
        self.report(version, Status::Done, &ProgressSnapshot { bytes: size, percent: 100.0, ..Default::default() });
        info!("Installed {} ({}) to {}", release.version, bytes_to_size(size), destination.display());
        Ok(destination)
    }
}

impl WineCatalog for GithubWineCatalog {
    async fn alternatives(&self) -> Vec<WineInstallation> {
        list_alternative_wines(&self.dirs)
    }

    async fn download_default(&self) -> Result<()> {
        let releases = self.available_releases().await?;
        let release = select_default_release(&releases, std::env::consts::OS)
            .ok_or_else(|| LauncherError::NotFound("no default wine release for this platform".into()))?;
        info!("Downloading default wine {}", release.version);
        self.install_release(release).await?;
        Ok(())
    }
}
