//! Default values for apiextensions v1 API types.
//!
//! Ported from k8s.io/apiextensions-apiserver/pkg/apis/apiextensions/v1/defaults.go

use super::{
    ConversionStrategyType, CustomResourceConversion, CustomResourceDefinition,
    CustomResourceDefinitionList, CustomResourceDefinitionSpec, ServiceReference,
};
use crate::common::ApplyDefault;

fn set_defaults_custom_resource_definition_spec(obj: &mut CustomResourceDefinitionSpec) {
    if obj.names.singular.is_empty() {
        obj.names.singular = obj.names.kind.to_lowercase();
    }
    if obj.names.list_kind.is_empty() && !obj.names.kind.is_empty() {
        obj.names.list_kind = format!("{}List", obj.names.kind);
    }
    if obj.conversion.is_none() {
        obj.conversion = Some(CustomResourceConversion {
            strategy: ConversionStrategyType::None,
            webhook: None,
        });
    }
}

fn set_defaults_service_reference(obj: &mut ServiceReference) {
    if obj.port.is_none() {
        obj.port = Some(443);
    }
}

impl ApplyDefault for CustomResourceDefinition {
    fn apply_default(&mut self) {
        if self.type_meta.api_version.is_empty() {
            self.type_meta.api_version = super::API_VERSION.to_string();
        }
        if self.type_meta.kind.is_empty() {
            self.type_meta.kind = "CustomResourceDefinition".to_string();
        }

        set_defaults_custom_resource_definition_spec(&mut self.spec);

        if let Some(service) = self
            .spec
            .conversion
            .as_mut()
            .and_then(|c| c.webhook.as_mut())
            .and_then(|w| w.client_config.as_mut())
            .and_then(|c| c.service.as_mut())
        {
            set_defaults_service_reference(service);
        }

        // storedVersions starts at the storage version so that a freshly
        // created CRD can always migrate away from it later.
        if self.status.stored_versions.is_empty() {
            if let Some(storage) = self.spec.versions.iter().find(|v| v.storage) {
                self.status.stored_versions.push(storage.name.clone());
            }
        }
    }
}

impl ApplyDefault for CustomResourceDefinitionList {
    fn apply_default(&mut self) {
        if self.type_meta.api_version.is_empty() {
            self.type_meta.api_version = super::API_VERSION.to_string();
        }
        if self.type_meta.kind.is_empty() {
            self.type_meta.kind = "CustomResourceDefinitionList".to_string();
        }

        for item in &mut self.items {
            item.apply_default();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::{CustomResourceDefinitionNames, CustomResourceDefinitionVersion};
    use super::*;

    fn widget_crd() -> CustomResourceDefinition {
        CustomResourceDefinition {
            spec: CustomResourceDefinitionSpec {
                group: "example.com".to_string(),
                names: CustomResourceDefinitionNames {
                    plural: "widgets".to_string(),
                    kind: "Widget".to_string(),
                    ..Default::default()
                },
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

    #[test]
    fn test_names_defaulted_from_kind() {
        let mut crd = widget_crd();
        crd.apply_default();
        assert_eq!(crd.spec.names.singular, "widget");
        assert_eq!(crd.spec.names.list_kind, "WidgetList");
        assert_eq!(crd.type_meta.kind, "CustomResourceDefinition");
    }

    #[test]
    fn test_conversion_defaults_to_none_strategy() {
        let mut crd = widget_crd();
        crd.apply_default();
        assert_eq!(
            crd.spec.conversion.as_ref().unwrap().strategy,
            ConversionStrategyType::None
        );
    }

    #[test]
    fn test_stored_versions_initialized_to_storage_version() {
        let mut crd = widget_crd();
        crd.apply_default();
        assert_eq!(crd.status.stored_versions, vec!["v1"]);
    }

    #[test]
    fn test_webhook_service_port_defaulted() {
        let mut crd = widget_crd();
        crd.spec.conversion = Some(CustomResourceConversion {
            strategy: ConversionStrategyType::Webhook,
            webhook: Some(super::super::WebhookConversion {
                client_config: Some(super::super::WebhookClientConfig {
                    service: Some(ServiceReference {
                        namespace: "default".to_string(),
                        name: "converter".to_string(),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                conversion_review_versions: vec!["v1".to_string()],
            }),
        });
        crd.apply_default();
        let port = crd
            .spec
            .conversion
            .unwrap()
            .webhook
            .unwrap()
            .client_config
            .unwrap()
            .service
            .unwrap()
            .port;
        assert_eq!(port, Some(443));
    }

    #[test]
    fn test_existing_values_not_overwritten() {
        let mut crd = widget_crd();
        crd.spec.names.singular = "gadget".to_string();
        crd.status.stored_versions = vec!["v0".to_string()];
        crd.apply_default();
        assert_eq!(crd.spec.names.singular, "gadget");
        assert_eq!(crd.status.stored_versions, vec!["v0"]);
    }
}
