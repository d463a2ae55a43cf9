//! Holding and replacing the current snapshot.
//!
//! [`SharedStore`] owns the "current" [`Store`] reference. Readers copy the
//! `Arc` out and resolve against it lock-free; a reload swaps the pointer.
//!
//! [`Reloader`] serializes rebuilds (after a file change, say): at most one
//! rebuild runs at a time, and requests arriving while it runs collapse into
//! a single follow-up rebuild. A failed rebuild keeps the previous snapshot.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use tracing::{info, warn};

use crate::{Store, StoreError};

/// The current snapshot, swappable in one step.
#[derive(Debug)]
pub struct SharedStore {
    current: RwLock<Arc<Store>>,
}

impl SharedStore {
    /// Hold `store` as the current snapshot.
    #[must_use]
    pub fn new(store: Store) -> Self {
        Self {
            current: RwLock::new(Arc::new(store)),
        }
    }

    /// The current snapshot. Later swaps do not affect the returned `Arc`.
    #[must_use]
    pub fn load(&self) -> Arc<Store> {
        let current = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&current)
    }

    /// Replace the current snapshot, returning the previous one.
    pub fn swap(&self, store: Store) -> Arc<Store> {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *current, Arc::new(store))
    }
}

/// Result of one [`Reloader::reload`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// This call rebuilt and swapped in a new snapshot.
    Reloaded,
    /// Another call is rebuilding and will pick this request up.
    Coalesced,
    /// The rebuild failed; the previous snapshot is still current.
    Failed(StoreError),
}

type Rebuild = dyn Fn() -> BoxFuture<'static, Result<Store, StoreError>> + Send + Sync;

/// Serialized, coalescing snapshot rebuilder.
pub struct Reloader {
    shared: Arc<SharedStore>,
    rebuild: Box<Rebuild>,
    gate: tokio::sync::Mutex<()>,
    pending: AtomicBool,
    debounce: Option<Duration>,
}

impl Reloader {
    /// A reloader that swaps the result of `rebuild` into `shared`.
    pub fn new<F, Fut>(shared: Arc<SharedStore>, rebuild: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Store, StoreError>> + Send + 'static,
    {
        Self {
            shared,
            rebuild: Box::new(move || rebuild().boxed()),
            gate: tokio::sync::Mutex::new(()),
            pending: AtomicBool::new(false),
            debounce: None,
        }
    }

    /// Wait `delay` before each rebuild; requests arriving meanwhile join it.
    #[must_use]
    pub fn debounce(mut self, delay: Duration) -> Self {
        self.debounce = Some(delay);
        self
    }

    /// The snapshot holder this reloader writes to.
    #[must_use]
    pub fn shared(&self) -> &Arc<SharedStore> {
        &self.shared
    }

    /// Request a rebuild.
    ///
    /// If no rebuild is running, this call runs one (and any requested while
    /// it runs) and reports the last outcome. Otherwise it returns
    /// [`ReloadOutcome::Coalesced`] at once; the running call covers it.
    pub async fn reload(&self) -> ReloadOutcome {
        self.pending.store(true, Ordering::SeqCst);
        let mut outcome = ReloadOutcome::Coalesced;
        loop {
            let Ok(guard) = self.gate.try_lock() else {
                return outcome;
            };
            while self.pending.swap(false, Ordering::SeqCst) {
                if let Some(delay) = self.debounce {
                    tokio::time::sleep(delay).await;
                    self.pending.store(false, Ordering::SeqCst);
                }
                outcome = self.rebuild_once().await;
            }
            drop(guard);
            // A request may have landed between the last check and the unlock.
            if !self.pending.load(Ordering::SeqCst) {
                return outcome;
            }
        }
    }

    async fn rebuild_once(&self) -> ReloadOutcome {
        match (self.rebuild)().await {
            Ok(store) => {
                let payloads = store.payload_names().len();
                self.shared.swap(store);
                info!(payloads, "snapshot reloaded");
                ReloadOutcome::Reloaded
            }
            Err(err) => {
                warn!(error = %err, "reload failed, keeping previous snapshot");
                ReloadOutcome::Failed(err)
            }
        }
    }
}

impl fmt::Debug for Reloader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reloader")
            .field("shared", &self.shared)
            .field("pending", &self.pending)
            .field("debounce", &self.debounce)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::InsertData;
    use crate::{validator, Query};
    use futures::future::join_all;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    async fn store_with(greeting: &str) -> Store {
        Store::builder()
            .payload("greeting", validator::string())
            .build()
            .unwrap()
            .insert([("greeting", InsertData::Literal(json!(greeting)))])
            .await
            .unwrap()
    }

    async fn greeting(shared: &SharedStore) -> Option<serde_json::Value> {
        shared
            .load()
            .get_payload("greeting", &Query::new())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn swap_leaves_loaded_snapshots_alone() {
        let shared = SharedStore::new(store_with("hello").await);
        let held = shared.load();
        let previous = shared.swap(store_with("bye").await);

        assert!(Arc::ptr_eq(&held, &previous));
        assert_eq!(
            held.get_payload("greeting", &Query::new()).await.unwrap(),
            Some(json!("hello"))
        );
        assert_eq!(greeting(&shared).await, Some(json!("bye")));
    }

    #[tokio::test]
    async fn failed_reload_keeps_previous() {
        let shared = Arc::new(SharedStore::new(store_with("hello").await));
        let reloader = Reloader::new(Arc::clone(&shared), || async {
            Err(StoreError::Document {
                reason: "broken".into(),
            })
        });

        assert!(matches!(reloader.reload().await, ReloadOutcome::Failed(_)));
        assert_eq!(greeting(&shared).await, Some(json!("hello")));
    }

    #[tokio::test]
    async fn concurrent_requests_coalesce() {
        let shared = Arc::new(SharedStore::new(store_with("v0").await));
        let builds = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&builds);
        let reloader = Reloader::new(Arc::clone(&shared), move || {
            let counted = Arc::clone(&counted);
            async move {
                let n = counted.fetch_add(1, Ordering::SeqCst) + 1;
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok(store_with(&format!("v{n}")).await)
            }
        });

        let outcomes = join_all((0..5).map(|_| reloader.reload())).await;

        assert_eq!(outcomes[0], ReloadOutcome::Reloaded);
        assert!(outcomes[1..].iter().all(|o| *o == ReloadOutcome::Coalesced));
        assert_eq!(builds.load(Ordering::SeqCst), 2);
        assert_eq!(greeting(&shared).await, Some(json!("v2")));
    }

    #[tokio::test]
    async fn debounced_reload_runs_once() {
        let shared = Arc::new(SharedStore::new(store_with("v0").await));
        let builds = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&builds);
        let reloader = Reloader::new(Arc::clone(&shared), move || {
            counted.fetch_add(1, Ordering::SeqCst);
            async { Ok(store_with("v1").await) }
        })
        .debounce(Duration::from_millis(10));

        let outcomes = join_all((0..3).map(|_| reloader.reload())).await;

        assert_eq!(outcomes[0], ReloadOutcome::Reloaded);
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert_eq!(greeting(&shared).await, Some(json!("v1")));
    }
}
