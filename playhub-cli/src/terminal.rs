use indicatif::{ProgressBar, ProgressStyle};
use inquire::Confirm;
use tracing::warn;

use playhub_core::{bytes_to_size, ProgressSnapshot, WinePrompt};

/// Asks on the terminal before switching a game's compatibility layer.
pub struct TerminalPrompt;

fn ask(selected: String, found: String) -> bool {
    let selected = if selected.is_empty() { "(none)".to_string() } else { selected };
    Confirm::new(&format!("Wine {selected} is not available. Launch with {found} instead?"))
        .with_default(true)
        .prompt()
        .unwrap_or_else(|e| {
            warn!("Prompt cancelled: {}", e);
            false
        })
}

impl WinePrompt for TerminalPrompt {
    async fn confirm_substitution(&self, selected: &str, found: &str) -> bool {
        let (selected, found) = (selected.to_string(), found.to_string());
        tokio::task::spawn_blocking(move || ask(selected, found)).await.unwrap_or_else(|e| {
            warn!("Prompt task failed: {}", e);
            false
        })
    }
}

pub fn percent_bar(prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new(100);
    let style = ProgressStyle::default_bar()
        .template("{prefix} [{bar:40.cyan/blue}] {pos:>3}%  {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▓░");
    pb.set_style(style);
    pb.set_prefix(prefix.to_string());
    pb
}

pub fn show(pb: &ProgressBar, p: &ProgressSnapshot) {
    pb.set_position(p.percent.round() as u64);
    if p.bytes > 0 {
        let eta = p.eta.as_deref().unwrap_or("--:--:--");
        pb.set_message(format!("{} at {}/s, ETA {}", bytes_to_size(p.bytes), bytes_to_size(p.speed as u64), eta));
    } else {
        pb.set_message(p.file.clone());
    }
}
