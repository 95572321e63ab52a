use std::collections::HashMap;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Cancellation handle for one in-flight operation.
#[derive(Debug, Clone, Default)]
pub struct AbortToken {
    inner: CancellationToken,
}

impl AbortToken {
    pub fn new() -> Self { Self::default() }

    /// Signals the token. Returns `false` if it was already signalled.
    pub fn abort(&self) -> bool {
        if self.inner.is_cancelled() {
            return false;
        }
        self.inner.cancel();
        true
    }

    pub fn is_aborted(&self) -> bool { self.inner.is_cancelled() }

    /// Resolves once the token is signalled.
    pub async fn aborted(&self) { self.inner.cancelled().await }

    /// A token that fires with this one but can also be aborted on its own.
    pub fn child(&self) -> AbortToken { AbortToken { inner: self.inner.child_token() } }
}

/// Maps operation ids to their abort token. At most one live token per id.
#[derive(Debug, Default)]
pub struct AbortRegistry {
    tokens: Mutex<HashMap<String, AbortToken>>,
}

impl AbortRegistry {
    pub fn new() -> Self { Self::default() }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, AbortToken>> {
        self.tokens.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Registers a fresh token for `id`, aborting any token it replaces.
    pub fn create(&self, id: &str) -> AbortToken {
        let token = AbortToken::new();
        if let Some(previous) = self.lock().insert(id.to_string(), token.clone()) {
            debug!(id, "replacing live abort token");
            previous.abort();
        }
        token
    }

    pub fn get(&self, id: &str) -> Option<AbortToken> { self.lock().get(id).cloned() }

    pub fn remove(&self, id: &str) { self.lock().remove(id); }

    /// Aborts one operation. Unknown ids are ignored.
    pub fn cancel(&self, id: &str) -> bool {
        self.get(id).map(|t| t.abort()).unwrap_or(false)
    }

    /// Signals every live token that has not fired yet and returns how many were signalled.
    pub fn cancel_all(&self) -> usize {
        let tokens: Vec<AbortToken> = self.lock().values().cloned().collect();
        let n = tokens.iter().filter(|t| t.abort()).count();
        if n > 0 { info!("Aborted {} running operation(s)", n); }
        n
    }

    pub fn len(&self) -> usize { self.lock().len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }
}
