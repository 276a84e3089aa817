//! The discovery synchronization controller.
//!
//! Not a condition owner: whenever any established CRD changes, the
//! externally visible type catalogs are rebuilt from the full cache and
//! swapped in atomically.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::discovery::DiscoveryPublisher;
use crate::registry::CrdRegistry;

/// Keeps the discovery documents consistent with the established CRDs.
pub struct DiscoveryController {
    registry: Arc<CrdRegistry>,
    publisher: Arc<DiscoveryPublisher>,
}

impl DiscoveryController {
    /// Builds the controller.
    pub fn new(
        registry: Arc<CrdRegistry>,
        publisher: Arc<DiscoveryPublisher>,
    ) -> Arc<DiscoveryController> {
        Arc::new(DiscoveryController {
            registry,
            publisher,
        })
    }

    /// Spawns the worker pool.
    pub fn spawn(self: &Arc<Self>, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        let controller = self.clone();
        super::spawn_controller(
            "discovery",
            self.registry.clone(),
            super::WORKERS,
            cancel,
            move |name| {
                let controller = controller.clone();
                async move { controller.reconcile(&name).await }
            },
        )
    }

    /// The documents are global; any change rebuilds them whole.
    pub async fn reconcile(&self, _name: &str) -> Result<(), String> {
        self.publisher.rebuild(&self.registry.list());
        Ok(())
    }
}
