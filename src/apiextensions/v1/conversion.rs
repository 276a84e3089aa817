//! Conversions between apiextensions v1 and internal types.
//!
//! Source: k8s.io/apiextensions-apiserver/pkg/apis/apiextensions/v1/conversion.go
//!
//! The wire shape differs from the internal shape in two places: the v1
//! object carries a TypeMeta envelope with optional metadata, and the
//! conversion settings nest the webhook block. Everything else maps 1:1.

use crate::apiextensions::internal;
use crate::common::{FromInternal, ObjectMeta, ToInternal};

use super::{
    ConditionStatus, ConversionStrategyType, CustomResourceColumnDefinition,
    CustomResourceConversion, CustomResourceDefinition, CustomResourceDefinitionCondition,
    CustomResourceDefinitionConditionType, CustomResourceDefinitionList,
    CustomResourceDefinitionNames, CustomResourceDefinitionSpec, CustomResourceDefinitionStatus,
    CustomResourceDefinitionVersion, CustomResourceSubresourceScale,
    CustomResourceSubresourceStatus, CustomResourceSubresources, CustomResourceValidation,
    ResourceScope, SelectableField, ServiceReference, WebhookClientConfig, WebhookConversion,
};

// ============================================================================
// Enum conversions
// ============================================================================

impl From<ConversionStrategyType> for internal::ConversionStrategyType {
    fn from(value: ConversionStrategyType) -> Self {
        match value {
            ConversionStrategyType::None => internal::ConversionStrategyType::None,
            ConversionStrategyType::Webhook => internal::ConversionStrategyType::Webhook,
        }
    }
}

impl From<internal::ConversionStrategyType> for ConversionStrategyType {
    fn from(value: internal::ConversionStrategyType) -> Self {
        match value {
            internal::ConversionStrategyType::None => ConversionStrategyType::None,
            internal::ConversionStrategyType::Webhook => ConversionStrategyType::Webhook,
        }
    }
}

impl From<ResourceScope> for internal::ResourceScope {
    fn from(value: ResourceScope) -> Self {
        match value {
            ResourceScope::Cluster => internal::ResourceScope::Cluster,
            ResourceScope::Namespaced => internal::ResourceScope::Namespaced,
        }
    }
}

impl From<internal::ResourceScope> for ResourceScope {
    fn from(value: internal::ResourceScope) -> Self {
        match value {
            internal::ResourceScope::Cluster => ResourceScope::Cluster,
            internal::ResourceScope::Namespaced => ResourceScope::Namespaced,
        }
    }
}

impl From<ConditionStatus> for internal::ConditionStatus {
    fn from(value: ConditionStatus) -> Self {
        match value {
            ConditionStatus::True => internal::ConditionStatus::True,
            ConditionStatus::False => internal::ConditionStatus::False,
            ConditionStatus::Unknown => internal::ConditionStatus::Unknown,
        }
    }
}

impl From<internal::ConditionStatus> for ConditionStatus {
    fn from(value: internal::ConditionStatus) -> Self {
        match value {
            internal::ConditionStatus::True => ConditionStatus::True,
            internal::ConditionStatus::False => ConditionStatus::False,
            internal::ConditionStatus::Unknown => ConditionStatus::Unknown,
        }
    }
}

impl From<CustomResourceDefinitionConditionType>
    for internal::CustomResourceDefinitionConditionType
{
    fn from(value: CustomResourceDefinitionConditionType) -> Self {
        use internal::CustomResourceDefinitionConditionType as I;
        match value {
            CustomResourceDefinitionConditionType::Established => I::Established,
            CustomResourceDefinitionConditionType::NamesAccepted => I::NamesAccepted,
            CustomResourceDefinitionConditionType::NonStructuralSchema => I::NonStructuralSchema,
            CustomResourceDefinitionConditionType::Terminating => I::Terminating,
            CustomResourceDefinitionConditionType::KubernetesAPIApprovalPolicyConformant => {
                I::KubernetesAPIApprovalPolicyConformant
            }
        }
    }
}

impl From<internal::CustomResourceDefinitionConditionType>
    for CustomResourceDefinitionConditionType
{
    fn from(value: internal::CustomResourceDefinitionConditionType) -> Self {
        use internal::CustomResourceDefinitionConditionType as I;
        match value {
            I::Established => CustomResourceDefinitionConditionType::Established,
            I::NamesAccepted => CustomResourceDefinitionConditionType::NamesAccepted,
            I::NonStructuralSchema => CustomResourceDefinitionConditionType::NonStructuralSchema,
            I::Terminating => CustomResourceDefinitionConditionType::Terminating,
            I::KubernetesAPIApprovalPolicyConformant => {
                CustomResourceDefinitionConditionType::KubernetesAPIApprovalPolicyConformant
            }
        }
    }
}

// ============================================================================
// Struct conversions
// ============================================================================

impl From<CustomResourceDefinitionNames> for internal::CustomResourceDefinitionNames {
    fn from(value: CustomResourceDefinitionNames) -> Self {
        internal::CustomResourceDefinitionNames {
            plural: value.plural,
            singular: value.singular,
            short_names: value.short_names,
            kind: value.kind,
            list_kind: value.list_kind,
            categories: value.categories,
        }
    }
}

impl From<internal::CustomResourceDefinitionNames> for CustomResourceDefinitionNames {
    fn from(value: internal::CustomResourceDefinitionNames) -> Self {
        CustomResourceDefinitionNames {
            plural: value.plural,
            singular: value.singular,
            short_names: value.short_names,
            kind: value.kind,
            list_kind: value.list_kind,
            categories: value.categories,
        }
    }
}

impl From<ServiceReference> for internal::ServiceReference {
    fn from(value: ServiceReference) -> Self {
        internal::ServiceReference {
            namespace: value.namespace,
            name: value.name,
            path: value.path,
            port: value.port,
        }
    }
}

impl From<internal::ServiceReference> for ServiceReference {
    fn from(value: internal::ServiceReference) -> Self {
        ServiceReference {
            namespace: value.namespace,
            name: value.name,
            path: value.path,
            port: value.port,
        }
    }
}

impl From<WebhookClientConfig> for internal::WebhookClientConfig {
    fn from(value: WebhookClientConfig) -> Self {
        internal::WebhookClientConfig {
            url: value.url,
            service: value.service.map(Into::into),
            ca_bundle: value.ca_bundle,
        }
    }
}

impl From<internal::WebhookClientConfig> for WebhookClientConfig {
    fn from(value: internal::WebhookClientConfig) -> Self {
        WebhookClientConfig {
            url: value.url,
            service: value.service.map(Into::into),
            ca_bundle: value.ca_bundle,
        }
    }
}

impl From<CustomResourceConversion> for internal::CustomResourceConversion {
    fn from(value: CustomResourceConversion) -> Self {
        let (webhook_client_config, conversion_review_versions) = match value.webhook {
            Some(webhook) => (
                webhook.client_config.map(Into::into),
                webhook.conversion_review_versions,
            ),
            None => (None, Vec::new()),
        };
        internal::CustomResourceConversion {
            strategy: value.strategy.into(),
            webhook_client_config,
            conversion_review_versions,
        }
    }
}

impl From<internal::CustomResourceConversion> for CustomResourceConversion {
    fn from(value: internal::CustomResourceConversion) -> Self {
        let webhook = if value.webhook_client_config.is_some()
            || !value.conversion_review_versions.is_empty()
        {
            Some(WebhookConversion {
                client_config: value.webhook_client_config.map(Into::into),
                conversion_review_versions: value.conversion_review_versions,
            })
        } else {
            None
        };
        CustomResourceConversion {
            strategy: value.strategy.into(),
            webhook,
        }
    }
}

impl From<CustomResourceValidation> for internal::CustomResourceValidation {
    fn from(value: CustomResourceValidation) -> Self {
        internal::CustomResourceValidation {
            open_api_v3_schema: value.open_api_v3_schema,
        }
    }
}

impl From<internal::CustomResourceValidation> for CustomResourceValidation {
    fn from(value: internal::CustomResourceValidation) -> Self {
        CustomResourceValidation {
            open_api_v3_schema: value.open_api_v3_schema,
        }
    }
}

impl From<CustomResourceSubresources> for internal::CustomResourceSubresources {
    fn from(value: CustomResourceSubresources) -> Self {
        internal::CustomResourceSubresources {
            status: value
                .status
                .map(|_| internal::CustomResourceSubresourceStatus {}),
            scale: value.scale.map(|s| internal::CustomResourceSubresourceScale {
                spec_replicas_path: s.spec_replicas_path,
                status_replicas_path: s.status_replicas_path,
                label_selector_path: s.label_selector_path,
            }),
        }
    }
}

impl From<internal::CustomResourceSubresources> for CustomResourceSubresources {
    fn from(value: internal::CustomResourceSubresources) -> Self {
        CustomResourceSubresources {
            status: value.status.map(|_| CustomResourceSubresourceStatus {}),
            scale: value.scale.map(|s| CustomResourceSubresourceScale {
                spec_replicas_path: s.spec_replicas_path,
                status_replicas_path: s.status_replicas_path,
                label_selector_path: s.label_selector_path,
            }),
        }
    }
}

impl From<CustomResourceColumnDefinition> for internal::CustomResourceColumnDefinition {
    fn from(value: CustomResourceColumnDefinition) -> Self {
        internal::CustomResourceColumnDefinition {
            name: value.name,
            type_: value.type_,
            format: value.format,
            description: value.description,
            priority: value.priority,
            json_path: value.json_path,
        }
    }
}

impl From<internal::CustomResourceColumnDefinition> for CustomResourceColumnDefinition {
    fn from(value: internal::CustomResourceColumnDefinition) -> Self {
        CustomResourceColumnDefinition {
            name: value.name,
            type_: value.type_,
            format: value.format,
            description: value.description,
            priority: value.priority,
            json_path: value.json_path,
        }
    }
}

impl From<SelectableField> for internal::SelectableField {
    fn from(value: SelectableField) -> Self {
        internal::SelectableField {
            json_path: value.json_path,
        }
    }
}

impl From<internal::SelectableField> for SelectableField {
    fn from(value: internal::SelectableField) -> Self {
        SelectableField {
            json_path: value.json_path,
        }
    }
}

impl From<CustomResourceDefinitionVersion> for internal::CustomResourceDefinitionVersion {
    fn from(value: CustomResourceDefinitionVersion) -> Self {
        internal::CustomResourceDefinitionVersion {
            name: value.name,
            served: value.served,
            storage: value.storage,
            deprecated: value.deprecated,
            deprecation_warning: value.deprecation_warning,
            schema: value.schema.map(Into::into),
            subresources: value.subresources.map(Into::into),
            additional_printer_columns: value
                .additional_printer_columns
                .into_iter()
                .map(Into::into)
                .collect(),
            selectable_fields: value.selectable_fields.into_iter().map(Into::into).collect(),
        }
    }
}

impl From<internal::CustomResourceDefinitionVersion> for CustomResourceDefinitionVersion {
    fn from(value: internal::CustomResourceDefinitionVersion) -> Self {
        CustomResourceDefinitionVersion {
            name: value.name,
            served: value.served,
            storage: value.storage,
            deprecated: value.deprecated,
            deprecation_warning: value.deprecation_warning,
            schema: value.schema.map(Into::into),
            subresources: value.subresources.map(Into::into),
            additional_printer_columns: value
                .additional_printer_columns
                .into_iter()
                .map(Into::into)
                .collect(),
            selectable_fields: value.selectable_fields.into_iter().map(Into::into).collect(),
        }
    }
}

impl From<CustomResourceDefinitionCondition> for internal::CustomResourceDefinitionCondition {
    fn from(value: CustomResourceDefinitionCondition) -> Self {
        internal::CustomResourceDefinitionCondition {
            type_: value.type_.into(),
            status: value.status.into(),
            last_transition_time: value.last_transition_time,
            reason: value.reason,
            message: value.message,
        }
    }
}

impl From<internal::CustomResourceDefinitionCondition> for CustomResourceDefinitionCondition {
    fn from(value: internal::CustomResourceDefinitionCondition) -> Self {
        CustomResourceDefinitionCondition {
            type_: value.type_.into(),
            status: value.status.into(),
            last_transition_time: value.last_transition_time,
            reason: value.reason,
            message: value.message,
        }
    }
}

impl From<CustomResourceDefinitionSpec> for internal::CustomResourceDefinitionSpec {
    fn from(value: CustomResourceDefinitionSpec) -> Self {
        internal::CustomResourceDefinitionSpec {
            group: value.group,
            names: value.names.into(),
            scope: value.scope.into(),
            versions: value.versions.into_iter().map(Into::into).collect(),
            conversion: value.conversion.map(Into::into),
            preserve_unknown_fields: value.preserve_unknown_fields,
        }
    }
}

impl From<internal::CustomResourceDefinitionSpec> for CustomResourceDefinitionSpec {
    fn from(value: internal::CustomResourceDefinitionSpec) -> Self {
        CustomResourceDefinitionSpec {
            group: value.group,
            names: value.names.into(),
            scope: value.scope.into(),
            versions: value.versions.into_iter().map(Into::into).collect(),
            conversion: value.conversion.map(Into::into),
            preserve_unknown_fields: value.preserve_unknown_fields,
        }
    }
}

impl From<CustomResourceDefinitionStatus> for internal::CustomResourceDefinitionStatus {
    fn from(value: CustomResourceDefinitionStatus) -> Self {
        internal::CustomResourceDefinitionStatus {
            conditions: value.conditions.into_iter().map(Into::into).collect(),
            accepted_names: value.accepted_names.into(),
            stored_versions: value.stored_versions,
        }
    }
}

impl From<internal::CustomResourceDefinitionStatus> for CustomResourceDefinitionStatus {
    fn from(value: internal::CustomResourceDefinitionStatus) -> Self {
        CustomResourceDefinitionStatus {
            conditions: value.conditions.into_iter().map(Into::into).collect(),
            accepted_names: value.accepted_names.into(),
            stored_versions: value.stored_versions,
        }
    }
}

// ============================================================================
// Top-level object conversions
// ============================================================================

fn is_empty_object_meta(meta: &ObjectMeta) -> bool {
    *meta == ObjectMeta::default()
}

impl ToInternal<internal::CustomResourceDefinition> for CustomResourceDefinition {
    fn to_internal(self) -> internal::CustomResourceDefinition {
        internal::CustomResourceDefinition {
            metadata: self.metadata.unwrap_or_default(),
            spec: self.spec.into(),
            status: self.status.into(),
        }
    }
}

impl FromInternal<internal::CustomResourceDefinition> for CustomResourceDefinition {
    fn from_internal(value: internal::CustomResourceDefinition) -> Self {
        CustomResourceDefinition {
            type_meta: crate::common::TypeMeta::new(super::API_VERSION, "CustomResourceDefinition"),
            metadata: if is_empty_object_meta(&value.metadata) {
                None
            } else {
                Some(value.metadata)
            },
            spec: value.spec.into(),
            status: value.status.into(),
        }
    }
}

impl ToInternal<internal::CustomResourceDefinitionList> for CustomResourceDefinitionList {
    fn to_internal(self) -> internal::CustomResourceDefinitionList {
        internal::CustomResourceDefinitionList {
            metadata: self.metadata,
            items: self.items.into_iter().map(ToInternal::to_internal).collect(),
        }
    }
}

impl FromInternal<internal::CustomResourceDefinitionList> for CustomResourceDefinitionList {
    fn from_internal(value: internal::CustomResourceDefinitionList) -> Self {
        CustomResourceDefinitionList {
            type_meta: crate::common::TypeMeta::new(
                super::API_VERSION,
                "CustomResourceDefinitionList",
            ),
            metadata: value.metadata,
            items: value
                .items
                .into_iter()
                .map(CustomResourceDefinition::from_internal)
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> CustomResourceDefinition {
        serde_json::from_value(json!({
            "apiVersion": "apiextensions.k8s.io/v1",
            "kind": "CustomResourceDefinition",
            "metadata": {"name": "widgets.example.com"},
            "spec": {
                "group": "example.com",
                "names": {"plural": "widgets", "kind": "Widget"},
                "scope": "Namespaced",
                "conversion": {
                    "strategy": "Webhook",
                    "webhook": {
                        "clientConfig": {"url": "https://convert.example.com"},
                        "conversionReviewVersions": ["v1"]
                    }
                },
                "versions": [
                    {"name": "v1beta1", "served": true, "storage": false},
                    {"name": "v1", "served": true, "storage": true}
                ]
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_webhook_block_flattens_into_internal() {
        let internal = sample().to_internal();
        let conv = internal.spec.conversion.as_ref().unwrap();
        assert_eq!(conv.strategy, internal::ConversionStrategyType::Webhook);
        assert_eq!(
            conv.webhook_client_config.as_ref().unwrap().url.as_deref(),
            Some("https://convert.example.com")
        );
        assert_eq!(conv.conversion_review_versions, vec!["v1"]);
    }

    #[test]
    fn test_roundtrip_preserves_spec() {
        let v1 = sample();
        let internal = v1.clone().to_internal();
        let back = CustomResourceDefinition::from_internal(internal);
        assert_eq!(back.spec, v1.spec);
        assert_eq!(back.metadata, v1.metadata);
        assert_eq!(back.type_meta.kind, "CustomResourceDefinition");
    }

    #[test]
    fn test_empty_metadata_drops_to_none() {
        let internal = internal::CustomResourceDefinition::default();
        let v1 = CustomResourceDefinition::from_internal(internal);
        assert!(v1.metadata.is_none());
    }
}
