use humansize::{format_size, BINARY};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Normalized progress emitted for installs, moves, extractions and downloads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub bytes: u64,
    pub speed: f64,
    pub write_speed: f64,
    pub percent: f64,
    pub eta: Option<String>,
    pub file: String,
}

/// Turns one line of a tool's output into a progress update.
///
/// Lines that are not understood yield `None`; parsing never fails.
pub trait OutputParser: Send {
    fn parse(&mut self, line: &str) -> Option<ProgressSnapshot>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserKind {
    Robocopy,
    Rsync,
}

impl ParserKind {
    pub fn parser(self) -> Box<dyn OutputParser> {
        match self {
            ParserKind::Robocopy => Box::new(RobocopyParser::default()),
            ParserKind::Rsync => Box::new(RsyncParser::default()),
        }
    }
}

fn parse_percent(token: &str) -> Option<f64> {
    let n: f64 = token.strip_suffix('%')?.trim().parse().ok()?;
    if !n.is_finite() { return None; }
    Some(n.clamp(0.0, 100.0))
}

#[derive(Debug, Default)]
pub struct RobocopyParser {
    percent: f64,
    file: String,
}

impl OutputParser for RobocopyParser {
    fn parse(&mut self, line: &str) -> Option<ProgressSnapshot> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let last = *tokens.last()?;
        if let Some(p) = tokens.iter().rev().find_map(|t| parse_percent(t)) {
            self.percent = p;
        }
        if last.contains('.') && !last.contains('%') {
            self.percent = 0.0;
            self.file = last.to_string();
        }
        Some(ProgressSnapshot { percent: self.percent, file: self.file.clone(), ..Default::default() })
    }
}

static RSYNC_PERCENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)%").expect("static regex"));

#[derive(Debug, Default)]
pub struct RsyncParser {
    percent: f64,
    file: String,
}

impl OutputParser for RsyncParser {
    fn parse(&mut self, line: &str) -> Option<ProgressSnapshot> {
        let file = line
            .split('\n')
            .find(|l| l.contains('/') && !l.contains('%'))
            .and_then(|l| l.trim().rsplit('/').next())
            .unwrap_or("");
        if !file.is_empty() {
            self.file = file.to_string();
        }
        let caps = RSYNC_PERCENT.captures(line)?;
        let n: f64 = caps.get(1)?.as_str().parse().ok()?;
        self.percent = n.clamp(0.0, 100.0);
        Some(ProgressSnapshot { percent: self.percent, file: self.file.clone(), ..Default::default() })
    }
}

/// `HH:MM:SS`, zero padded; hours are not capped at 24.
pub fn format_time(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    format!("{hours:02}:{minutes:02}:{secs:02}")
}

/// Remaining time for a transfer, discounted by the time since the last progress sample.
///
/// Returns `"00:00:00"` once everything is downloaded and `None` while the speed is unknown.
pub fn calculate_eta(downloaded: u64, speed: f64, total: u64, since_last_progress: Duration) -> Option<String> {
    if downloaded >= total {
        return Some(format_time(0));
    }
    if !speed.is_finite() || speed <= 0.0 {
        return None;
    }
    let remaining = (total - downloaded) as f64 / speed - since_last_progress.as_secs_f64();
    if remaining <= 0.0 {
        return Some(format_time(0));
    }
    if !remaining.is_finite() {
        return None;
    }
    Some(format_time(remaining.floor() as u64))
}

pub fn bytes_to_size(bytes: u64) -> String {
    format_size(bytes, BINARY)
}

/// Lets at most one event through per interval. Drops everything else; there is no trailing call.
#[derive(Debug, Clone)]
pub struct Throttle {
    interval: Duration,
    last: Option<Instant>,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self { Self { interval, last: None } }

    pub fn per_second() -> Self { Self::new(Duration::from_secs(1)) }

    pub fn ready(&mut self) -> bool { self.ready_at(Instant::now()) }

    pub fn ready_at(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.saturating_duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

/// Derives a write speed from cumulative byte counts sampled at least `interval` apart.
#[derive(Debug, Clone)]
pub struct RateSampler {
    interval: Duration,
    last_time: Instant,
    last_bytes: u64,
}

impl RateSampler {
    pub fn new(start: Instant, interval: Duration) -> Self {
        Self { interval, last_time: start, last_bytes: 0 }
    }

    /// Bytes per second since the previous accepted sample, or `None` if called too soon.
    pub fn sample_at(&mut self, now: Instant, bytes: u64) -> Option<f64> {
        let elapsed = now.saturating_duration_since(self.last_time);
        if elapsed < self.interval {
            return None;
        }
        let rate = bytes.saturating_sub(self.last_bytes) as f64 / elapsed.as_secs_f64();
        self.last_time = now;
        self.last_bytes = bytes;
        Some(rate)
    }
}
