use futures_util::future::try_join_all;
use futures_util::StreamExt;
use reqwest::header::{ACCEPT_RANGES, CONTENT_LENGTH, RANGE};
use reqwest::StatusCode;
use std::io::SeekFrom;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::abort::AbortToken;
use crate::error::{LauncherError, NetworkStage, Result};
use crate::progress::{bytes_to_size, calculate_eta, ProgressSnapshot, RateSampler, Throttle};

pub const SEGMENTS: u64 = 5;
pub const SEGMENT_RETRIES: u32 = 3;
const TICK: Duration = Duration::from_millis(250);

/// Inclusive byte range. `end` is `None` when the size is unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub start: u64,
    pub end: Option<u64>,
}

/// Splits `size` bytes into at most `count` contiguous ranges covering the whole file.
pub fn plan_segments(size: u64, count: u64) -> Vec<Segment> {
    if size == 0 || count <= 1 {
        return vec![Segment { start: 0, end: size.checked_sub(1) }];
    }
    let chunk = size.div_ceil(count);
    let mut out = Vec::new();
    let mut start = 0;
    while start < size {
        let end = (start + chunk).min(size) - 1;
        out.push(Segment { start, end: Some(end) });
        start = end + 1;
    }
    out
}

/// What a HEAD request told us about the remote file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteFile {
    pub size: u64,
    pub ranged: bool,
}

fn network(stage: NetworkStage, url: &str, e: impl std::fmt::Display) -> LauncherError {
    LauncherError::Network { stage, detail: format!("{url}: {e}") }
}

pub async fn probe(client: &reqwest::Client, url: &str) -> Result<RemoteFile> {
    let resp = client.head(url).send().await.map_err(|e| network(NetworkStage::Headers, url, e))?;
    if !resp.status().is_success() {
        return Err(network(NetworkStage::Headers, url, format!("HEAD returned {}", resp.status())));
    }
    let headers = resp.headers();
    // content_length() reports the (empty) HEAD body, so read the header itself
    let size = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(0);
    let ranged = headers
        .get(ACCEPT_RANGES)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("bytes"));
    Ok(RemoteFile { size, ranged })
}

struct Transfer<'a> {
    client: &'a reqwest::Client,
    url: &'a str,
    dest: &'a Path,
    ranged: bool,
    received: AtomicU64,
    written: AtomicU64,
}

impl Transfer<'_> {
    async fn fetch_range(&self, seg: &Segment, offset: &mut u64) -> Result<()> {
        let mut req = self.client.get(self.url);
        if self.ranged {
            let end = seg.end.map(|e| e.to_string()).unwrap_or_default();
            req = req.header(RANGE, format!("bytes={}-{}", offset, end));
        }
        let resp = req.send().await.map_err(|e| network(NetworkStage::Transfer, self.url, e))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(network(NetworkStage::Transfer, self.url, format!("GET returned {status}")));
        }
        if self.ranged && status != StatusCode::PARTIAL_CONTENT {
            return Err(network(NetworkStage::Transfer, self.url, "server ignored the range request"));
        }

        let mut file = tokio::fs::OpenOptions::new().write(true).open(self.dest).await?;
        file.seek(SeekFrom::Start(*offset)).await?;
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| network(NetworkStage::Transfer, self.url, e))?;
            let n = chunk.len() as u64;
            self.received.fetch_add(n, Ordering::Relaxed);
            file.write_all(&chunk).await?;
            *offset += n;
            self.written.fetch_add(n, Ordering::Relaxed);
        }
        file.flush().await?;

        match seg.end {
            Some(end) if *offset <= end => Err(LauncherError::TransferStalled(format!(
                "{}: segment {}-{} stopped at {}",
                self.url, seg.start, end, offset
            ))),
            _ => Ok(()),
        }
    }

    async fn fetch_segment(&self, seg: Segment) -> Result<()> {
        let mut offset = seg.start;
        let mut attempt = 0;
        loop {
            match self.fetch_range(&seg, &mut offset).await {
                Ok(()) => return Ok(()),
                Err(e @ (LauncherError::Network { .. } | LauncherError::TransferStalled(_))) if attempt < SEGMENT_RETRIES => {
                    attempt += 1;
                    warn!("segment at {} failed ({}), retry {}/{}", seg.start, e, attempt, SEGMENT_RETRIES);
                    if !self.ranged {
                        // cannot resume without ranges; start over
                        let done = offset - seg.start;
                        self.received.fetch_sub(done, Ordering::Relaxed);
                        self.written.fetch_sub(done, Ordering::Relaxed);
                        offset = seg.start;
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}

struct Reporter {
    total: u64,
    throttle: Throttle,
    received_rate: RateSampler,
    written_rate: RateSampler,
    speed: f64,
    write_speed: f64,
    last_bytes: u64,
    last_change: Instant,
}

impl Reporter {
    fn new(total: u64) -> Self {
        let now = Instant::now();
        Self {
            total,
            throttle: Throttle::per_second(),
            received_rate: RateSampler::new(now, Duration::from_secs(1)),
            written_rate: RateSampler::new(now, Duration::from_secs(1)),
            speed: 0.0,
            write_speed: 0.0,
            last_bytes: 0,
            last_change: now,
        }
    }

    /// Speeds are rates over the last second or more, not averages since the start.
    fn snapshot(&mut self, now: Instant, received: u64, written: u64) -> ProgressSnapshot {
        if let Some(rate) = self.received_rate.sample_at(now, received) {
            self.speed = rate;
        }
        if let Some(rate) = self.written_rate.sample_at(now, written) {
            self.write_speed = rate;
        }
        if received != self.last_bytes {
            self.last_bytes = received;
            self.last_change = now;
        }
        let percent = if self.total > 0 { (received as f64 / self.total as f64 * 100.0).min(100.0) } else { 0.0 };
        ProgressSnapshot {
            bytes: received,
            speed: self.speed,
            write_speed: self.write_speed,
            percent,
            eta: if self.total > 0 {
                calculate_eta(received, self.speed, self.total, now.saturating_duration_since(self.last_change))
            } else {
                None
            },
            file: String::new(),
        }
    }
}

/// Downloads `url` to `dest` in up to [`SEGMENTS`] parallel ranged requests.
///
/// Progress is delivered at most once per second. Aborting stops every segment and
/// returns `Cancelled`; ending short of the advertised size returns `TransferStalled`.
pub async fn download_file<F>(client: &reqwest::Client, url: &str, dest: &Path, abort: &AbortToken, mut on_progress: F) -> Result<()>
where
    F: FnMut(&ProgressSnapshot),
{
    let remote = probe(client, url).await?;
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let file = tokio::fs::File::create(dest).await?;
    if remote.size > 0 {
        file.set_len(remote.size).await?;
    }
    drop(file);

    let ranged = remote.ranged && remote.size > 0;
    let segments = plan_segments(remote.size, if ranged { SEGMENTS } else { 1 });
    info!("Downloading {} ({}) to {} in {} segment(s)", url, bytes_to_size(remote.size), dest.display(), segments.len());

    let transfer = Transfer { client, url, dest, ranged, received: AtomicU64::new(0), written: AtomicU64::new(0) };
    let mut reporter = Reporter::new(remote.size);
    let all = try_join_all(segments.iter().map(|seg| transfer.fetch_segment(*seg)));
    tokio::pin!(all);
    let mut ticker = tokio::time::interval(TICK);

    let outcome = loop {
        tokio::select! {
            biased;
            _ = abort.aborted() => break Err(LauncherError::Cancelled(url.to_string())),
            res = &mut all => break res.map(|_| ()),
            _ = ticker.tick() => {
                let now = Instant::now();
                if reporter.throttle.ready_at(now) {
                    let snap = reporter.snapshot(now, transfer.received.load(Ordering::Relaxed), transfer.written.load(Ordering::Relaxed));
                    info!(target: "progress", "Downloading: {} / {} ({:.1}%)", bytes_to_size(snap.bytes), bytes_to_size(remote.size), snap.percent);
                    on_progress(&snap);
                }
            }
        }
    };
    if let Err(e) = outcome {
        debug!("download of {} ended: {}", url, e);
        return Err(e);
    }

    let received = transfer.received.load(Ordering::Relaxed);
    if remote.size > 0 && received < remote.size {
        return Err(LauncherError::TransferStalled(format!("{url}: got {received} of {} bytes", remote.size)));
    }
    let snap = reporter.snapshot(Instant::now(), received, transfer.written.load(Ordering::Relaxed));
    on_progress(&ProgressSnapshot { percent: 100.0, eta: Some("00:00:00".into()), ..snap });
    info!("Downloaded {} ({})", dest.display(), bytes_to_size(received));
    Ok(())
}
