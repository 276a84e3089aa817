//! The CRD lifecycle controllers.
//!
//! Seven reconcilers, each owning specific status-condition types and
//! coordinating only through them: naming, nonstructural-schema, approval,
//! establishing, finalizer, discovery synchronization and schema
//! publication. Each runs its own rate-limited work queue over a bounded
//! worker pool and is idempotent: finding the target state achieved writes
//! nothing.

pub mod approval;
pub mod discovery;
pub mod establishing;
pub mod finalizer;
pub mod naming;
pub mod nonstructural;
pub mod openapi;
pub mod workqueue;

use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::registry::CrdRegistry;
pub use workqueue::WorkQueue;

/// Workers per controller.
pub const WORKERS: usize = 5;

/// Runs one controller: an event feeder filling the queue from the registry
/// bus (with a full relist on subscribe and on lag), plus `workers` tasks
/// calling `reconcile` with rate-limited retry on error.
pub(crate) fn spawn_controller<F, Fut>(
    name: &'static str,
    registry: Arc<CrdRegistry>,
    workers: usize,
    cancel: CancellationToken,
    reconcile: F,
) -> Vec<JoinHandle<()>>
where
    F: Fn(String) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<(), String>> + Send + 'static,
{
    let queue: Arc<WorkQueue<String>> = WorkQueue::new();
    let mut handles = Vec::new();

    {
        let queue = queue.clone();
        let registry = registry.clone();
        let cancel = cancel.clone();
        handles.push(tokio::spawn(async move {
            let mut events = registry.subscribe();
            for crd in registry.list() {
                queue.add(crd.metadata.name().to_string());
            }
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        queue.shut_down();
                        return;
                    }
                    event = events.recv() => match event {
                        Ok(event) => queue.add(event.crd().metadata.name().to_string()),
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {
                            for crd in registry.list() {
                                queue.add(crd.metadata.name().to_string());
                            }
                        }
                        Err(_) => {
                            queue.shut_down();
                            return;
                        }
                    },
                }
            }
        }));
    }

    for _ in 0..workers {
        let queue = queue.clone();
        let reconcile = reconcile.clone();
        handles.push(tokio::spawn(async move {
            while let Some(key) = queue.get().await {
                match reconcile(key.clone()).await {
                    Ok(()) => queue.forget(&key),
                    Err(err) => {
                        tracing::warn!(controller = name, crd = %key, "reconcile failed: {}", err);
                        queue.add_rate_limited(key.clone());
                    }
                }
                queue.done(&key);
            }
        }));
    }

    handles
}
