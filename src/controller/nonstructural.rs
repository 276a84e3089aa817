//! The nonstructural-schema controller.
//!
//! Source: k8s.io/apiextensions-apiserver/pkg/controller/nonstructuralschema
//!
//! Owns the NonStructuralSchema condition: True when any version's schema
//! violates the structural rules (the violations travel in the message),
//! False otherwise. Expression-rule compilation problems are reported the
//! same way; neither tears down serving.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::apiextensions::internal::{
    ConditionStatus, CustomResourceDefinition, CustomResourceDefinitionCondition,
    CustomResourceDefinitionConditionType,
};
use crate::cel;
use crate::registry::CrdRegistry;
use crate::schema::Structural;
use crate::server::config::ServerConfig;

/// Reports structural-schema violations.
pub struct NonStructuralSchemaController {
    registry: Arc<CrdRegistry>,
    config: Arc<ServerConfig>,
}

impl NonStructuralSchemaController {
    /// Builds the controller.
    pub fn new(
        registry: Arc<CrdRegistry>,
        config: Arc<ServerConfig>,
    ) -> Arc<NonStructuralSchemaController> {
        Arc::new(NonStructuralSchemaController { registry, config })
    }

    /// Spawns the worker pool.
    pub fn spawn(self: &Arc<Self>, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        let controller = self.clone();
        super::spawn_controller(
            "nonstructuralschema",
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

        let violations = self.collect_violations(&crd);
        let condition = if violations.is_empty() {
            CustomResourceDefinitionCondition {
                type_: CustomResourceDefinitionConditionType::NonStructuralSchema,
                status: ConditionStatus::False,
                reason: "NoViolations".to_string(),
                message: "all version schemas are structural".to_string(),
                ..Default::default()
            }
        } else {
            CustomResourceDefinitionCondition {
                type_: CustomResourceDefinitionConditionType::NonStructuralSchema,
                status: ConditionStatus::True,
                reason: "Violations".to_string(),
                message: violations.join("; "),
                ..Default::default()
            }
        };

        self.registry
            .update_status_with_retry(name, |current| {
                let unchanged = current
                    .find_condition(CustomResourceDefinitionConditionType::NonStructuralSchema)
                    .map(|c| c.status == condition.status && c.message == condition.message)
                    .unwrap_or(false);
                if unchanged {
                    return false;
                }
                current.set_condition(condition.clone());
                true
            })
            .await
            .map_err(|err| err.to_string())?;
        Ok(())
    }

    fn collect_violations(&self, crd: &CustomResourceDefinition) -> Vec<String> {
        let mut all = Vec::new();
        for (i, version) in crd.spec.versions.iter().enumerate() {
            let Some(props) = version
                .schema
                .as_ref()
                .and_then(|s| s.open_api_v3_schema.as_ref())
            else {
                continue;
            };
            let (structural, violations) = Structural::from_props(props);
            let prefix = format!("spec.versions[{}].schema.openAPIV3Schema", i);
            if violations.is_empty() {
                // structural: rule compilation problems are reported here too
                let rules = cel::compile_rules(
                    &structural,
                    self.config.max_request_body_bytes as u64,
                );
                for err in rules.compile_errors {
                    all.push(format!("{}: {}", prefix, err));
                }
            } else {
                for err in &violations.errors {
                    all.push(format!("{}.{}", prefix, err));
                }
            }
        }
        all
    }
}
