use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};
use tracing::debug;

use crate::progress::ProgressSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Runner {
    Legendary,
    Gog,
    Nile,
    Sideload,
}

impl fmt::Display for Runner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Runner::Legendary => "legendary",
            Runner::Gog => "gog",
            Runner::Nile => "nile",
            Runner::Sideload => "sideload",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for Runner {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "legendary" => Ok(Runner::Legendary),
            "gog" => Ok(Runner::Gog),
            "nile" => Ok(Runner::Nile),
            "sideload" => Ok(Runner::Sideload),
            other => Err(format!("unknown runner '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Status {
    Queued,
    Installing,
    Updating,
    Moving,
    Extracting,
    Playing,
    Uninstalling,
    Repairing,
    Launching,
    Winetricks,
    Prerequisites,
    #[serde(rename = "syncing-saves")]
    SyncingSaves,
    Installed,
    NotInstalled,
    NotSupportedGame,
    NotAvailable,
    Done,
    Error,
}

/// Payload of `gameStatusUpdate` and `progressUpdate-<appName>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStatus {
    pub app_name: String,
    pub runner: Runner,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<ProgressSnapshot>,
}

impl GameStatus {
    pub fn new(app_name: impl Into<String>, runner: Runner, status: Status) -> Self {
        Self { app_name: app_name.into(), runner, status, progress: None }
    }

    pub fn with_progress(mut self, progress: ProgressSnapshot) -> Self {
        self.progress = Some(progress);
        self
    }
}

type Listener = Arc<dyn Fn(&GameStatus) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Topic {
    Status,
    Progress(String),
}

impl Topic {
    fn name(&self) -> String {
        match self {
            Topic::Status => "gameStatusUpdate".to_string(),
            Topic::Progress(app) => format!("progressUpdate-{app}"),
        }
    }
}

#[derive(Default)]
struct BusInner {
    next_id: u64,
    listeners: HashMap<Topic, Vec<(u64, Listener)>>,
}

/// Typed observer registry for status and per-app progress events.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Mutex<BusInner>>,
}

/// Keeps a listener registered; dropping it unsubscribes.
#[must_use = "dropping the subscription unsubscribes immediately"]
pub struct Subscription {
    bus: Weak<Mutex<BusInner>>,
    topic: Topic,
    id: u64,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(bus) = self.bus.upgrade() else { return };
        let Ok(mut inner) = bus.lock() else { return };
        if let Some(list) = inner.listeners.get_mut(&self.topic) {
            list.retain(|(id, _)| *id != self.id);
            if list.is_empty() { inner.listeners.remove(&self.topic); }
        }
    }
}

impl EventBus {
    pub fn new() -> Self { Self::default() }

    fn subscribe(&self, topic: Topic, listener: Listener) -> Subscription {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        inner.next_id += 1;
        let id = inner.next_id;
        inner.listeners.entry(topic.clone()).or_default().push((id, listener));
        Subscription { bus: Arc::downgrade(&self.inner), topic, id }
    }

    pub fn subscribe_status(&self, f: impl Fn(&GameStatus) + Send + Sync + 'static) -> Subscription {
        self.subscribe(Topic::Status, Arc::new(f))
    }

    pub fn subscribe_progress(&self, app_name: &str, f: impl Fn(&GameStatus) + Send + Sync + 'static) -> Subscription {
        self.subscribe(Topic::Progress(app_name.to_string()), Arc::new(f))
    }

    fn emit(&self, topic: Topic, payload: &GameStatus) {
        // snapshot listeners so callbacks may (un)subscribe without deadlocking
        let listeners: Vec<Listener> = {
            let inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
            inner.listeners.get(&topic).map(|l| l.iter().map(|(_, f)| f.clone()).collect()).unwrap_or_default()
        };
        debug!(event = %topic.name(), status = ?payload.status, "emit");
        for f in listeners { f(payload); }
    }

    pub fn send_game_status_update(&self, payload: GameStatus) {
        self.emit(Topic::Status, &payload);
    }

    pub fn send_progress_update(&self, payload: GameStatus) {
        let topic = Topic::Progress(payload.app_name.clone());
        self.emit(topic, &payload);
    }
}
