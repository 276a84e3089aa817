//! The schema publication controller.
//!
//! Rebuilds the global OpenAPI v2 document and the per-group v3 documents
//! from all established CRDs' schemas and swaps them in atomically.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::openapi::OpenApiPublisher;
use crate::registry::CrdRegistry;

/// Keeps the OpenAPI documents consistent with the established CRDs.
pub struct SchemaPublicationController {
    registry: Arc<CrdRegistry>,
    publisher: Arc<OpenApiPublisher>,
}

impl SchemaPublicationController {
    /// Builds the controller.
    pub fn new(
        registry: Arc<CrdRegistry>,
        publisher: Arc<OpenApiPublisher>,
    ) -> Arc<SchemaPublicationController> {
        Arc::new(SchemaPublicationController {
            registry,
            publisher,
        })
    }

    /// Spawns the worker pool.
    pub fn spawn(self: &Arc<Self>, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        let controller = self.clone();
        super::spawn_controller(
            "schemapublication",
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
