use std::collections::VecDeque;
use std::ffi::OsStr;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::abort::AbortToken;
use crate::error::{LauncherError, Result};

pub const DEFAULT_LOG_LIMIT: usize = 50;

/// Keeps only the most recent `limit` lines of a stream.
#[derive(Debug, Clone)]
pub struct MemoryLog {
    limit: usize,
    lines: VecDeque<String>,
}

impl MemoryLog {
    pub fn new(limit: usize) -> Self {
        Self { limit: limit.max(1), lines: VecDeque::with_capacity(limit.max(1)) }
    }

    pub fn push(&mut self, line: impl Into<String>) {
        self.lines.push_back(line.into());
        while self.lines.len() > self.limit { self.lines.pop_front(); }
    }

    pub fn join(&self, separator: &str) -> String {
        self.lines.iter().map(String::as_str).collect::<Vec<_>>().join(separator)
    }

    pub fn len(&self) -> usize { self.lines.len() }

    pub fn is_empty(&self) -> bool { self.lines.is_empty() }
}

impl Default for MemoryLog {
    fn default() -> Self { Self::new(DEFAULT_LOG_LIMIT) }
}

/// Splits a byte stream on `\n` and `\r`; progress meters redraw with bare carriage returns.
#[derive(Debug, Default)]
struct LineSplitter {
    buf: Vec<u8>,
}

impl LineSplitter {
    fn push(&mut self, data: &[u8]) -> Vec<String> {
        let mut out = Vec::new();
        for &b in data {
            if b == b'\n' || b == b'\r' {
                if !self.buf.is_empty() {
                    out.push(String::from_utf8_lossy(&self.buf).into_owned());
                    self.buf.clear();
                }
            } else {
                self.buf.push(b);
            }
        }
        out
    }

    fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() { return None; }
        let s = String::from_utf8_lossy(&self.buf).into_owned();
        self.buf.clear();
        Some(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub abort: Option<AbortToken>,
    pub log_limit: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self { cwd: None, env: Vec::new(), abort: None, log_limit: DEFAULT_LOG_LIMIT }
    }
}

impl RunOptions {
    pub fn with_abort(mut self, token: AbortToken) -> Self {
        self.abort = Some(token);
        self
    }

    pub fn with_cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// Exit status plus the captured tail of both streams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool { self.code == Some(0) }

    /// Turns a non-zero exit into `ToolExit` carrying the stderr tail.
    pub fn into_success(self, tool: &str) -> Result<Self> {
        if self.success() {
            return Ok(self);
        }
        Err(LauncherError::ToolExit { tool: tool.to_string(), code: self.code, stderr: self.stderr })
    }
}

async fn pump<R: AsyncRead + Unpin>(mut reader: R, stream: Stream, tx: mpsc::UnboundedSender<(Stream, String)>) {
    let mut splitter = LineSplitter::default();
    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                for line in splitter.push(&buf[..n]) {
                    if tx.send((stream, line)).is_err() { return; }
                }
            }
            Err(e) => {
                debug!("read error on {:?}: {}", stream, e);
                break;
            }
        }
    }
    if let Some(line) = splitter.finish() { let _ = tx.send((stream, line)); }
}

async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;
        if let Some(pid) = child.id() {
            if kill(Pid::from_raw(pid as i32), Signal::SIGTERM).is_ok()
                && tokio::time::timeout(Duration::from_secs(3), child.wait()).await.is_ok()
            {
                return;
            }
        }
    }
    if let Err(e) = child.kill().await {
        warn!("failed to kill child process: {}", e);
    }
}

/// Spawns `command`, feeds every output line to `on_output`, and waits for it to exit.
///
/// A failed spawn is `LauncherError::Spawn`; a non-zero exit is returned as a normal
/// `ProcessOutput` so callers can tell the two apart. When the abort token fires the
/// child is terminated and `LauncherError::Cancelled` is returned.
pub async fn run<S, F>(command: impl AsRef<OsStr>, args: &[S], opts: &RunOptions, mut on_output: F) -> Result<ProcessOutput>
where
    S: AsRef<OsStr>,
    F: FnMut(&str),
{
    let name = command.as_ref().to_string_lossy().into_owned();
    let mut cmd = Command::new(command.as_ref());
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &opts.cwd { cmd.current_dir(dir); }
    for (k, v) in &opts.env { cmd.env(k, v); }

    debug!(command = %name, args = ?args.iter().map(|a| a.as_ref().to_string_lossy().into_owned()).collect::<Vec<_>>(), "spawn");
    let mut child = cmd.spawn().map_err(|source| LauncherError::Spawn { command: name.clone(), source })?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    if let Some(out) = child.stdout.take() { tokio::spawn(pump(out, Stream::Stdout, tx.clone())); }
    if let Some(err) = child.stderr.take() { tokio::spawn(pump(err, Stream::Stderr, tx.clone())); }
    drop(tx);

    let abort = opts.abort.clone().unwrap_or_default();
    let mut stdout = MemoryLog::new(opts.log_limit);
    let mut stderr = MemoryLog::new(opts.log_limit);

    loop {
        tokio::select! {
            biased;
            _ = abort.aborted() => {
                terminate(&mut child).await;
                info!("{} aborted", name);
                return Err(LauncherError::Cancelled(name));
            }
            msg = rx.recv() => match msg {
                Some((stream, line)) => {
                    on_output(&line);
                    match stream {
                        Stream::Stdout => stdout.push(line),
                        Stream::Stderr => stderr.push(line),
                    }
                }
                None => break,
            }
        }
    }

    let status = tokio::select! {
        biased;
        _ = abort.aborted() => None,
        status = child.wait() => Some(status?),
    };
    let Some(status) = status else {
        terminate(&mut child).await;
        info!("{} aborted", name);
        return Err(LauncherError::Cancelled(name));
    };

    debug!(command = %name, code = ?status.code(), "exited");
    Ok(ProcessOutput { code: status.code(), stdout: stdout.join("\n"), stderr: stderr.join("\n") })
}

/// `run` without an output observer.
pub async fn run_quiet<S: AsRef<OsStr>>(command: impl AsRef<OsStr>, args: &[S], opts: &RunOptions) -> Result<ProcessOutput> {
    run(command, args, opts, |_| {}).await
}

pub fn command_exists(name: &str) -> bool { which::which(name).is_ok() }

/// Kills every process whose command line matches `pattern`.
///
/// Store tools do not always exit on SIGTERM of their parent, so this is used on shutdown.
pub async fn kill_pattern(pattern: &str) -> Result<()> {
    info!("Trying to kill {}", pattern);
    let opts = RunOptions::default();
    if cfg!(windows) {
        run_quiet("powershell.exe", &["-Command", "Stop-Process", "-Name", pattern], &opts).await?;
    } else {
        run_quiet("pkill", &["-f", pattern], &opts).await?;
    }
    info!("Killed {}", pattern);
    Ok(())
}
