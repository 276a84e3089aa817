//! The establishing controller.
//!
//! Source: k8s.io/apiextensions-apiserver/pkg/controller/establish
//!
//! Flips the Established condition True once names are accepted and the
//! dispatcher has installed serving info. With more than one peer server, a
//! fixed delay lets the peers observe the CRD before it is announced as
//! queryable.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::apiextensions::internal::{
    ConditionStatus, CustomResourceDefinitionCondition, CustomResourceDefinitionConditionType,
};
use crate::registry::CrdRegistry;
use crate::server::config::ServerConfig;
use crate::server::handler::CrdHandler;

/// Marks CRDs as served and queryable.
pub struct EstablishingController {
    registry: Arc<CrdRegistry>,
    handler: Arc<CrdHandler>,
    config: Arc<ServerConfig>,
}

impl EstablishingController {
    /// Builds the controller.
    pub fn new(
        registry: Arc<CrdRegistry>,
        handler: Arc<CrdHandler>,
        config: Arc<ServerConfig>,
    ) -> Arc<EstablishingController> {
        Arc::new(EstablishingController {
            registry,
            handler,
            config,
        })
    }

    /// Spawns the worker pool.
    pub fn spawn(self: &Arc<Self>, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        let controller = self.clone();
        super::spawn_controller(
            "establishing",
            self.registry.clone(),
            super::WORKERS,
            cancel,
            move |name| {
                let controller = controller.clone();
                async move { controller.reconcile(&name).await }
            },
        )
    }

    /// One reconcile pass for a CRD.
    pub async fn reconcile(&self, name: &str) -> Result<(), String> {
        let Some(crd) = self.registry.get(name) else {
            return Ok(());
        };

        if crd.is_condition_true(CustomResourceDefinitionConditionType::Established) {
            return Ok(());
        }
        if !crd.is_condition_true(CustomResourceDefinitionConditionType::NamesAccepted) {
            return Ok(());
        }
        if !self.handler.has_serving(crd.metadata.uid()) {
            // serving info not installed yet; retry through the queue
            return Err(format!("serving info for {} not yet installed", name));
        }

        if self.config.master_count > 1 {
            // let peer servers observe the CRD before announcing it
            tokio::time::sleep(self.config.establishing_delay).await;
        }

        self.registry
            .update_status_with_retry(name, |current| {
                if current.is_condition_true(CustomResourceDefinitionConditionType::Established) {
                    return false;
                }
                current.set_condition(CustomResourceDefinitionCondition {
                    type_: CustomResourceDefinitionConditionType::Established,
                    status: ConditionStatus::True,
                    reason: "InitialNamesAccepted".to_string(),
                    message: "the initial names have been accepted".to_string(),
                    ..Default::default()
                });
                true
            })
            .await
            .map_err(|err| err.to_string())?;
        Ok(())
    }
}
