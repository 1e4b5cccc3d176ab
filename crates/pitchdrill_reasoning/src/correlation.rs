//! Request/response correlation for push-style transports.
//!
//! A caller registers before sending a request and embeds the returned id in
//! it. Whoever reads server events resolves the id when the matching event
//! arrives. Waiting is always bounded.

use pitchdrill_core::{ServiceCallError, TransportError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;
use uuid::Uuid;

type PendingMap<T> = HashMap<Uuid, oneshot::Sender<T>>;

pub struct Correlator<T> {
    pending: Arc<Mutex<PendingMap<T>>>,
}

impl<T> Clone for Correlator<T> {
    fn clone(&self) -> Self {
        Self {
            pending: self.pending.clone(),
        }
    }
}

impl<T> Default for Correlator<T> {
    fn default() -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

fn lock<T>(pending: &Mutex<PendingMap<T>>) -> MutexGuard<'_, PendingMap<T>> {
    pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<T> Correlator<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self) -> Pending<T> {
        let id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(id, tx);
        Pending {
            id,
            rx,
            pending: self.pending.clone(),
        }
    }

    /// Hand `value` to the waiter for `id`. Returns false when nobody waits
    /// (unknown id, already resolved, or the waiter gave up).
    pub fn resolve(&self, id: &Uuid, value: T) -> bool {
        let sender = lock(&self.pending).remove(id);
        match sender {
            Some(tx) => tx.send(value).is_ok(),
            None => {
                tracing::debug!("No pending request for correlation id {}", id);
                false
            }
        }
    }

    /// Drop every waiter; each one sees a closed transport.
    pub fn fail_all(&self) {
        let drained: Vec<_> = lock(&self.pending).drain().collect();
        if !drained.is_empty() {
            tracing::warn!("Failing {} pending request(s)", drained.len());
        }
    }

    pub fn in_flight(&self) -> usize {
        lock(&self.pending).len()
    }
}

/// A registered request. Dropping it unregisters the id.
pub struct Pending<T> {
    id: Uuid,
    rx: oneshot::Receiver<T>,
    pending: Arc<Mutex<PendingMap<T>>>,
}

impl<T> Pending<T> {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub async fn wait(mut self, timeout: Duration) -> Result<T, ServiceCallError> {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(TransportError::Closed.into()),
            Err(_) => Err(ServiceCallError::Timeout(timeout)),
        }
    }
}

impl<T> Drop for Pending<T> {
    fn drop(&mut self) {
        lock(&self.pending).remove(&self.id);
    }
}
