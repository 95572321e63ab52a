use std::io;

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::events::Runner;

#[derive(Error, Debug)]
pub enum LauncherError {
    #[error("failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("{tool} exited with code {code:?}: {stderr}")]
    ToolExit {
        tool: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("operation cancelled: {0}")]
    Cancelled(String),
    #[error("download stopped or paused: {0}")]
    TransferStalled(String),
    #[error("network error ({stage}): {detail}")]
    Network { stage: NetworkStage, detail: String },
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("config error: {0}")]
    Config(String),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, LauncherError>;

/// Where a network failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkStage {
    /// the HEAD request, before any body bytes
    Headers,
    Transfer,
}

impl std::fmt::Display for NetworkStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            NetworkStage::Headers => "headers",
            NetworkStage::Transfer => "transfer",
        })
    }
}

impl From<toml::de::Error> for LauncherError {
    fn from(e: toml::de::Error) -> Self { LauncherError::Config(e.to_string()) }
}

impl From<toml::ser::Error> for LauncherError {
    fn from(e: toml::ser::Error) -> Self { LauncherError::Config(e.to_string()) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogKind {
    Error,
    Warning,
    Question,
}

/// Title/message pair shown to the user when an operation fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dialog {
    pub title: String,
    pub message: String,
    pub kind: DialogKind,
}

impl Dialog {
    fn error(title: &str, message: impl Into<String>) -> Self {
        Self { title: title.to_string(), message: message.into(), kind: DialogKind::Error }
    }
}

impl LauncherError {
    pub fn dialog(&self) -> Dialog {
        match self {
            LauncherError::Spawn { command, .. } => Dialog::error(
                "Tool not found",
                format!("Could not start {command}. Check that it is installed and executable."),
            ),
            LauncherError::ToolExit { tool, stderr, .. } => Dialog::error(tool, stderr.clone()),
            LauncherError::Validation(msg) => Dialog::error("Launch aborted", msg.clone()),
            LauncherError::Cancelled(msg) => Dialog {
                title: "Launch aborted".into(),
                message: msg.clone(),
                kind: DialogKind::Warning,
            },
            LauncherError::TransferStalled(_) => {
                Dialog::error("Download failed", "Download stopped or paused")
            }
            LauncherError::Network { stage: NetworkStage::Headers, .. } => {
                Dialog::error("Download failed", "Failed to get headers")
            }
            LauncherError::Network { stage: NetworkStage::Transfer, .. } | LauncherError::Http(_) => {
                Dialog::error("Download failed", "Connection lost while downloading")
            }
            other => Dialog::error("Error", other.to_string()),
        }
    }
}

static LEGENDARY_TRACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"legendary.*\.py").expect("static regex"));

/// Map a store tool's stderr tail to the dialog the user should see, if any.
pub fn classify_tool_error(runner: Runner, stderr: &str) -> Option<Dialog> {
    let plat = match runner {
        Runner::Legendary => "Legendary (Epic Games)".to_string(),
        other => other.to_string(),
    };
    // false alarm printed on macOS when no Crossover is installed
    if stderr.contains("IndexError: list index out of range") {
        return None;
    }
    if stderr.contains("Not enough available disk space") {
        return Some(Dialog::error("No Space", "Not enough available disk space"));
    }
    if stderr.contains("appears to be deleted") {
        return Some(Dialog {
            title: plat,
            message: "Game folder appears to be deleted, do you want to remove the game from the installed list?".into(),
            kind: DialogKind::Question,
        });
    }
    if LEGENDARY_TRACE.is_match(stderr) {
        if stderr.contains("MemoryError: ") {
            return None;
        }
        return Some(Dialog::error(
            &plat,
            format!("An error has occurred! Try to Logout and Login on your Epic account.\n{stderr}"),
        ));
    }
    if stderr.contains("No saved credentials") {
        return Some(Dialog::error(&plat, "Your Credentials have expired, Logout and Login Again!"));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disk_space_message_maps_to_no_space_dialog() {
        let d = classify_tool_error(Runner::Gog, "[ERROR] Not enough available disk space").unwrap();
        assert_eq!(d.title, "No Space");
    }

    #[test]
    fn legendary_traceback_is_generic_unless_memory_error() {
        let trace = "File \"/usr/lib/legendary/cli.py\", line 3\nValueError: boom";
        let d = classify_tool_error(Runner::Legendary, trace).unwrap();
        assert_eq!(d.title, "Legendary (Epic Games)");
        assert!(d.message.contains("ValueError"));

        let mem = "File \"legendary/core.py\"\nMemoryError: ";
        assert!(classify_tool_error(Runner::Legendary, mem).is_none());
    }

    #[test]
    fn crossover_index_error_is_ignored() {
        let s = "No saved credentials\nIndexError: list index out of range";
        assert!(classify_tool_error(Runner::Legendary, s).is_none());
    }

    #[test]
    fn deleted_folder_asks_a_question() {
        let d = classify_tool_error(Runner::Nile, "install appears to be deleted").unwrap();
        assert_eq!(d.kind, DialogKind::Question);
        assert_eq!(d.title, "nile");
    }

    #[test]
    fn surfaced_errors_have_fixed_dialogs() {
        let e = LauncherError::TransferStalled("x".into());
        assert_eq!(e.dialog().message, "Download stopped or paused");
        let e = LauncherError::Network { stage: NetworkStage::Headers, detail: "dns".into() };
        assert_eq!(e.dialog().message, "Failed to get headers");
        let e = LauncherError::Network { stage: NetworkStage::Transfer, detail: "reset".into() };
        assert_eq!(e.dialog().message, "Connection lost while downloading");
    }
}
