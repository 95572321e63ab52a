use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::error::{LauncherError, Result};
use crate::events::{EventBus, GameStatus, Runner, Status};

/// What the launcher is currently doing with one game. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub app_name: String,
    pub runner: Runner,
    pub status: Status,
}

/// At most one running job per game; every status change is announced on the bus.
pub struct JobRegistry {
    events: EventBus,
    jobs: Mutex<HashMap<String, Job>>,
}

impl JobRegistry {
    pub fn new(events: EventBus) -> Self {
        Self { events, jobs: Mutex::new(HashMap::new()) }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Job>> {
        self.jobs.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn announce(&self, job: &Job) {
        self.events.send_game_status_update(GameStatus::new(&job.app_name, job.runner, job.status));
    }

    /// Starts a job. Fails if the game already has one.
    pub fn begin(&self, app_name: &str, runner: Runner, status: Status) -> Result<JobGuard<'_>> {
        let job = Job { app_name: app_name.to_string(), runner, status };
        {
            let mut jobs = self.lock();
            if let Some(existing) = jobs.get(app_name) {
                return Err(LauncherError::Validation(format!(
                    "{} is already {}",
                    app_name,
                    status_label(existing.status, existing.runner, None, None).to_lowercase()
                )));
            }
            jobs.insert(app_name.to_string(), job.clone());
        }
        debug!(app_name, ?status, "job started");
        self.announce(&job);
        Ok(JobGuard { registry: self, app_name: app_name.to_string(), finished: false })
    }

    pub fn update(&self, app_name: &str, status: Status) -> Result<()> {
        let job = {
            let mut jobs = self.lock();
            let job = jobs.get_mut(app_name).ok_or_else(|| LauncherError::NotFound(format!("no running job for {app_name}")))?;
            job.status = status;
            job.clone()
        };
        self.announce(&job);
        Ok(())
    }

    /// Ends the job, announcing `status` (normally `Done` or `Error`).
    pub fn finish(&self, app_name: &str, status: Status) -> Option<Job> {
        let mut job = self.lock().remove(app_name)?;
        job.status = status;
        self.announce(&job);
        Some(job)
    }

    pub fn get(&self, app_name: &str) -> Option<Job> { self.lock().get(app_name).cloned() }

    pub fn is_running(&self, app_name: &str) -> bool { self.lock().contains_key(app_name) }

    pub fn list(&self) -> Vec<Job> { self.lock().values().cloned().collect() }
}

/// Finishes its job with `Error` if dropped before [`JobGuard::finish`].
#[must_use = "dropping the guard ends the job"]
pub struct JobGuard<'a> {
    registry: &'a JobRegistry,
    app_name: String,
    finished: bool,
}

impl JobGuard<'_> {
    pub fn update(&self, status: Status) -> Result<()> { self.registry.update(&self.app_name, status) }

    pub fn finish(mut self, status: Status) {
        self.finished = true;
        self.registry.finish(&self.app_name, status);
    }
}

impl Drop for JobGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            warn!("job for {} ended without a result", self.app_name);
            self.registry.finish(&self.app_name, Status::Error);
        }
    }
}

/// English label shown next to a game for its current status.
pub fn status_label(status: Status, runner: Runner, percent: Option<f64>, size: Option<&str>) -> String {
    let pct = percent.unwrap_or(0.0).ceil() as i64;
    match status {
        Status::NotSupportedGame => "Not Supported".into(),
        Status::NotAvailable => "Game not available".into(),
        Status::Playing => "Playing".into(),
        Status::Queued => "Queued".into(),
        Status::Uninstalling => "Uninstalling".into(),
        Status::Updating => format!("Updating {pct}%"),
        Status::Installing => format!("Downloading {pct}%"),
        Status::Extracting => "Extracting".into(),
        Status::SyncingSaves => "Syncing Saves".into(),
        Status::Moving => "Moving".into(),
        Status::Repairing => "Repairing".into(),
        Status::Installed => match (runner, size) {
            (Runner::Sideload, _) | (_, None) => "Installed".into(),
            (_, Some(size)) => format!("Installed {size}"),
        },
        Status::Launching => "Launching".into(),
        Status::Winetricks => "Applying Winetricks fixes".into(),
        Status::Prerequisites => "Installing Prerequisites".into(),
        Status::NotInstalled | Status::Done | Status::Error => "Not Installed".into(),
    }
}
