//! The API approval policy controller.
//!
//! Source: k8s.io/apiextensions-apiserver/pkg/controller/apiapproval
//!
//! Groups under `*.k8s.io` and `*.kubernetes.io` are reserved; CRDs in them
//! must carry the `api-approved.kubernetes.io` annotation holding either a
//! review URL or the literal `unapproved, <reason>`. The condition reports
//! conformance; serving is unaffected either way.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::apiextensions::internal::{
    API_APPROVED_ANNOTATION, ConditionStatus, CustomResourceDefinition,
    CustomResourceDefinitionCondition, CustomResourceDefinitionConditionType,
};
use crate::registry::CrdRegistry;

/// Checks the protected-group approval policy.
pub struct ApprovalController {
    registry: Arc<CrdRegistry>,
}

/// Whether a group is subject to the approval policy.
pub fn is_protected_group(group: &str) -> bool {
    group == "k8s.io"
        || group.ends_with(".k8s.io")
        || group == "kubernetes.io"
        || group.ends_with(".kubernetes.io")
}

impl ApprovalController {
    /// Builds the controller.
    pub fn new(registry: Arc<CrdRegistry>) -> Arc<ApprovalController> {
        Arc::new(ApprovalController { registry })
    }

    /// Spawns the worker pool.
    pub fn spawn(self: &Arc<Self>, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        let controller = self.clone();
        super::spawn_controller(
            "apiapproval",
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

        if !is_protected_group(&crd.spec.group) {
            // unprotected groups carry no conformance condition at all
            if crd
                .find_condition(
                    CustomResourceDefinitionConditionType::KubernetesAPIApprovalPolicyConformant,
                )
                .is_none()
            {
                return Ok(());
            }
            self.registry
                .update_status_with_retry(name, |current| {
                    if current
                        .find_condition(
                            CustomResourceDefinitionConditionType::KubernetesAPIApprovalPolicyConformant,
                        )
                        .is_none()
                    {
                        return false;
                    }
                    current.remove_condition(
                        CustomResourceDefinitionConditionType::KubernetesAPIApprovalPolicyConformant,
                    );
                    true
                })
                .await
                .map_err(|err| err.to_string())?;
            return Ok(());
        }

        let condition = evaluate_annotation(&crd);
        self.registry
            .update_status_with_retry(name, |current| {
                let unchanged = current
                    .find_condition(
                        CustomResourceDefinitionConditionType::KubernetesAPIApprovalPolicyConformant,
                    )
                    .map(|c| c.status == condition.status && c.reason == condition.reason)
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
}

fn evaluate_annotation(crd: &CustomResourceDefinition) -> CustomResourceDefinitionCondition {
    let base = CustomResourceDefinitionCondition {
        type_: CustomResourceDefinitionConditionType::KubernetesAPIApprovalPolicyConformant,
        ..Default::default()
    };
    match crd.metadata.annotations.get(API_APPROVED_ANNOTATION) {
        None => CustomResourceDefinitionCondition {
            status: ConditionStatus::False,
            reason: "MissingAnnotation".to_string(),
            message: format!(
                "protected groups must have approval; see https://github.com/kubernetes/enhancements/pull/1111 (annotation {:?} missing)",
                API_APPROVED_ANNOTATION
            ),
            ..base
        },
        Some(value) if value.starts_with("https://") || value.starts_with("http://") => {
            CustomResourceDefinitionCondition {
                status: ConditionStatus::True,
                reason: "ApprovedAnnotation".to_string(),
                message: format!("approved in {}", value),
                ..base
            }
        }
        Some(value) if value.starts_with("unapproved") => CustomResourceDefinitionCondition {
            status: ConditionStatus::False,
            reason: "UnapprovedAnnotation".to_string(),
            message: format!("not approved: {:?}", value),
            ..base
        },
        Some(value) => CustomResourceDefinitionCondition {
            status: ConditionStatus::False,
            reason: "InvalidAnnotation".to_string(),
            message: format!(
                "annotation {:?} must be a URL or start with \"unapproved\": {:?}",
                API_APPROVED_ANNOTATION, value
            ),
            ..base
        },
    }
}
