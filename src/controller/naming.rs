//! The naming controller.
//!
//! Source: k8s.io/apiextensions-apiserver/pkg/controller/status/naming_controller.go
//!
//! Owns the NamesAccepted condition and `status.acceptedNames`: requested
//! names must pass DNS rules and must not collide with names another CRD in
//! the same group already owns. On conflict the previously accepted names
//! stay in place so established serving is never yanked by a bad update.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::apiextensions::internal::{
    ConditionStatus, CustomResourceDefinition, CustomResourceDefinitionCondition,
    CustomResourceDefinitionConditionType, CustomResourceDefinitionNames,
};
use crate::common::validation::{Path, is_dns1123_label};
use crate::registry::CrdRegistry;

/// Accepts or rejects requested names.
pub struct NamingController {
    registry: Arc<CrdRegistry>,
}

impl NamingController {
    /// Builds the controller.
    pub fn new(registry: Arc<CrdRegistry>) -> Arc<NamingController> {
        Arc::new(NamingController { registry })
    }

    /// Spawns the worker pool.
    pub fn spawn(self: &Arc<Self>, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        let controller = self.clone();
        super::spawn_controller(
            "naming",
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

        let (accepted, condition) = self.evaluate(&crd);

        self.registry
            .update_status_with_retry(name, |current| {
                let unchanged = current.status.accepted_names == accepted
                    && current
                        .find_condition(CustomResourceDefinitionConditionType::NamesAccepted)
                        .map(|c| c.status == condition.status && c.reason == condition.reason)
                        .unwrap_or(false);
                if unchanged {
                    return false;
                }
                current.status.accepted_names = accepted.clone();
                current.set_condition(condition.clone());
                true
            })
            .await
            .map_err(|err| err.to_string())?;
        Ok(())
    }

    /// Decides which names to accept and the resulting condition.
    fn evaluate(
        &self,
        crd: &CustomResourceDefinition,
    ) -> (
        CustomResourceDefinitionNames,
        CustomResourceDefinitionCondition,
    ) {
        let requested = &crd.spec.names;

        // names another CRD in the group already owns
        let mut taken_plural = Vec::new();
        let mut taken_singular = Vec::new();
        let mut taken_short = Vec::new();
        let mut taken_kind = Vec::new();
        for other in self.registry.list() {
            if other.metadata.name() == crd.metadata.name() || other.spec.group != crd.spec.group {
                continue;
            }
            let names = if other.status.accepted_names.plural.is_empty() {
                &other.spec.names
            } else {
                &other.status.accepted_names
            };
            taken_plural.push(names.plural.clone());
            taken_singular.push(names.singular.clone());
            taken_short.extend(names.short_names.iter().cloned());
            taken_kind.push(names.kind.clone());
        }

        let mut problems = Vec::new();
        if taken_plural.contains(&requested.plural) {
            problems.push(format!("plural name {:?} is already in use", requested.plural));
        }
        if !requested.singular.is_empty() && taken_singular.contains(&requested.singular) {
            problems.push(format!(
                "singular name {:?} is already in use",
                requested.singular
            ));
        }
        for short in &requested.short_names {
            if taken_short.contains(short) {
                problems.push(format!("short name {:?} is already in use", short));
            }
            for msg in is_dns1123_label(short) {
                problems.push(format!("short name {:?}: {}", short, msg));
            }
        }
        if taken_kind.contains(&requested.kind) {
            problems.push(format!("kind {:?} is already in use", requested.kind));
        }

        let name_errs = crate::apiextensions::validation::validate_names(
            requested,
            &Path::new("spec").child("names"),
        );
        for err in &name_errs.errors {
            problems.push(err.to_string());
        }

        if problems.is_empty() {
            (
                requested.clone(),
                CustomResourceDefinitionCondition {
                    type_: CustomResourceDefinitionConditionType::NamesAccepted,
                    status: ConditionStatus::True,
                    reason: "NoConflicts".to_string(),
                    message: "no conflicts found".to_string(),
                    ..Default::default()
                },
            )
        } else {
            // keep what was accepted before; new serving never starts from
            // conflicting names
            (
                crd.status.accepted_names.clone(),
                CustomResourceDefinitionCondition {
                    type_: CustomResourceDefinitionConditionType::NamesAccepted,
                    status: ConditionStatus::False,
                    reason: "NotAccepted".to_string(),
                    message: problems.join("; "),
                    ..Default::default()
                },
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apiextensions::internal::{
        CustomResourceDefinitionSpec, CustomResourceDefinitionVersion, ResourceScope,
    };
    use crate::common::ObjectMeta;
    use crate::storage::MemoryBackend;

    fn crd(group: &str, plural: &str, kind: &str) -> CustomResourceDefinition {
        CustomResourceDefinition {
            metadata: ObjectMeta {
                name: Some(format!("{}.{}", plural, group)),
                ..Default::default()
            },
            spec: CustomResourceDefinitionSpec {
                group: group.to_string(),
                names: CustomResourceDefinitionNames {
                    plural: plural.to_string(),
                    singular: kind.to_lowercase(),
                    kind: kind.to_string(),
                    list_kind: format!("{}List", kind),
                    ..Default::default()
                },
                scope: ResourceScope::Namespaced,
                versions: vec![CustomResourceDefinitionVersion {
                    name: "v1".to_string(),
                    served: true,
                    storage: true,
                    ..Default::default()
                }],
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_names_accepted_without_conflicts() {
        let registry = CrdRegistry::new(Arc::new(MemoryBackend::new()));
        registry.create(crd("example.com", "widgets", "Widget")).await.unwrap();

        let controller = NamingController::new(registry.clone());
        controller.reconcile("widgets.example.com").await.unwrap();

        let updated = registry.get("widgets.example.com").unwrap();
        assert_eq!(updated.status.accepted_names.plural, "widgets");
        assert!(updated.is_condition_true(CustomResourceDefinitionConditionType::NamesAccepted));
    }

    #[tokio::test]
    async fn test_kind_conflict_keeps_previous_names() {
        let registry = CrdRegistry::new(Arc::new(MemoryBackend::new()));
        registry.create(crd("example.com", "widgets", "Widget")).await.unwrap();
        // same kind, different plural, same group
        registry.create(crd("example.com", "gadgets", "Widget")).await.unwrap();

        let controller = NamingController::new(registry.clone());
        controller.reconcile("widgets.example.com").await.unwrap();
        controller.reconcile("gadgets.example.com").await.unwrap();

        let loser = registry.get("gadgets.example.com").unwrap();
        let condition = loser
            .find_condition(CustomResourceDefinitionConditionType::NamesAccepted)
            .unwrap();
        assert_eq!(condition.status, ConditionStatus::False);
        assert_eq!(condition.reason, "NotAccepted");
        assert!(condition.message.contains("already in use"));
        // nothing was ever accepted for the loser
        assert!(loser.status.accepted_names.plural.is_empty());
    }

    #[tokio::test]
    async fn test_different_groups_do_not_conflict() {
        let registry = CrdRegistry::new(Arc::new(MemoryBackend::new()));
        registry.create(crd("example.com", "widgets", "Widget")).await.unwrap();
        registry.create(crd("other.io", "widgets", "Widget")).await.unwrap();

        let controller = NamingController::new(registry.clone());
        controller.reconcile("widgets.example.com").await.unwrap();
        controller.reconcile("widgets.other.io").await.unwrap();

        assert!(
            registry
                .get("widgets.other.io")
                .unwrap()
                .is_condition_true(CustomResourceDefinitionConditionType::NamesAccepted)
        );
    }

    #[tokio::test]
    async fn test_reconcile_is_idempotent() {
        let registry = CrdRegistry::new(Arc::new(MemoryBackend::new()));
        registry.create(crd("example.com", "widgets", "Widget")).await.unwrap();

        let controller = NamingController::new(registry.clone());
        controller.reconcile("widgets.example.com").await.unwrap();
        let rv_after_first = registry
            .get("widgets.example.com")
            .unwrap()
            .metadata
            .resource_version()
            .to_string();

        controller.reconcile("widgets.example.com").await.unwrap();
        let rv_after_second = registry
            .get("widgets.example.com")
            .unwrap()
            .metadata
            .resource_version()
            .to_string();
        assert_eq!(rv_after_first, rv_after_second, "no-op reconcile must not write");
    }
}
