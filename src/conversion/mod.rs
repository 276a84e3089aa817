//! Conversion of custom resource instances between versions.
//!
//! Source: k8s.io/apiextensions-apiserver/pkg/apiserver/conversion
//!
//! A CRD declares either the `None` strategy, which rewrites only
//! `apiVersion`, or a webhook. Every converter is wrapped by
//! [`SafeConverter`], which skips objects already at the target version and
//! verifies that identity-critical metadata survived the conversion.

pub mod webhook;

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

use crate::apiextensions::internal;
use crate::common::GroupResource;
use crate::unstructured;

pub use webhook::{AuthInfoResolver, ClusterServiceResolver, ServiceResolver, WebhookConverter};

/// Conversion failures. All of them surface to the client as InternalError.
#[derive(Debug, Error)]
pub enum ConversionError {
    /// The webhook call or its response was unusable. The prefix names the
    /// webhook so operators can attribute the failure.
    #[error("conversion webhook for {group_resource}: {message}")]
    Webhook {
        /// The resource whose webhook failed.
        group_resource: GroupResource,
        /// Transport or protocol detail.
        message: String,
    },

    /// The CRD conversion configuration cannot produce a converter.
    #[error("conversion config for {group_resource}: {message}")]
    Config {
        /// The resource whose configuration is broken.
        group_resource: GroupResource,
        /// What is wrong with the configuration.
        message: String,
    },
}

impl ConversionError {
    fn webhook(gr: &GroupResource, message: impl Into<String>) -> Self {
        ConversionError::Webhook {
            group_resource: gr.clone(),
            message: message.into(),
        }
    }
}

/// Converts batches of objects to a target version. Implementations receive
/// only objects that actually need conversion.
#[async_trait]
pub trait Converter: Send + Sync {
    /// Converts every object to `target_api_version`, preserving order.
    async fn convert(
        &self,
        objects: Vec<Value>,
        target_api_version: &str,
    ) -> Result<Vec<Value>, ConversionError>;
}

/// The `None` strategy: deep structure unchanged, apiVersion rewritten.
pub struct NopConverter;

#[async_trait]
impl Converter for NopConverter {
    async fn convert(
        &self,
        mut objects: Vec<Value>,
        target_api_version: &str,
    ) -> Result<Vec<Value>, ConversionError> {
        for object in &mut objects {
            unstructured::set_api_version(object, target_api_version);
        }
        Ok(objects)
    }
}

/// Metadata snapshot taken before conversion and verified afterwards.
#[derive(PartialEq, Debug)]
struct Preserved {
    uid: String,
    resource_version: String,
    creation_timestamp: Option<Value>,
    managed_fields: Option<Value>,
    name: String,
    namespace: String,
}

impl Preserved {
    fn capture(object: &Value) -> Preserved {
        Preserved {
            uid: unstructured::uid(object).to_string(),
            resource_version: unstructured::resource_version(object).to_string(),
            creation_timestamp: unstructured::metadata(object)
                .and_then(|m| m.get("creationTimestamp"))
                .cloned(),
            managed_fields: unstructured::metadata(object)
                .and_then(|m| m.get("managedFields"))
                .cloned(),
            name: unstructured::name(object).to_string(),
            namespace: unstructured::namespace(object).to_string(),
        }
    }
}

/// Wraps a converter with the identity fast path and the invariant check on
/// `metadata.uid`, `metadata.resourceVersion`, `metadata.creationTimestamp`
/// and `metadata.managedFields`.
pub struct SafeConverter {
    group_resource: GroupResource,
    inner: Arc<dyn Converter>,
}

impl SafeConverter {
    /// Wraps the given converter for the given resource.
    pub fn new(group_resource: GroupResource, inner: Arc<dyn Converter>) -> SafeConverter {
        SafeConverter {
            group_resource,
            inner,
        }
    }

    /// Converts one object.
    pub async fn convert_object(
        &self,
        object: Value,
        target_api_version: &str,
    ) -> Result<Value, ConversionError> {
        let mut list = self.convert_list(vec![object], target_api_version).await?;
        Ok(list.remove(0))
    }

    /// Converts a batch, calling the inner converter at most once for the
    /// objects that are not already at the target version.
    pub async fn convert_list(
        &self,
        objects: Vec<Value>,
        target_api_version: &str,
    ) -> Result<Vec<Value>, ConversionError> {
        let mut result: Vec<Option<Value>> = Vec::with_capacity(objects.len());
        let mut pending = Vec::new();
        let mut pending_slots = Vec::new();
        let mut preserved = Vec::new();

        for object in objects {
            if unstructured::api_version(&object) == target_api_version {
                result.push(Some(object));
            } else {
                preserved.push(Preserved::capture(&object));
                pending_slots.push(result.len());
                result.push(None);
                pending.push(object);
            }
        }

        if pending.is_empty() {
            return Ok(result.into_iter().flatten().collect());
        }

        let converted = self.inner.convert(pending, target_api_version).await?;
        if converted.len() != pending_slots.len() {
            return Err(ConversionError::webhook(
                &self.group_resource,
                format!(
                    "expected {} converted objects, got {}",
                    pending_slots.len(),
                    converted.len()
                ),
            ));
        }

        for ((slot, object), before) in pending_slots.into_iter().zip(converted).zip(preserved) {
            if unstructured::api_version(&object) != target_api_version {
                return Err(ConversionError::webhook(
                    &self.group_resource,
                    format!(
                        "invalid converted object: apiVersion is {}, expected {}",
                        unstructured::api_version(&object),
                        target_api_version
                    ),
                ));
            }
            let after = Preserved::capture(&object);
            if after != before {
                return Err(ConversionError::webhook(
                    &self.group_resource,
                    "invalid converted object: mutated identity metadata (uid, resourceVersion, creationTimestamp, managedFields, name or namespace)",
                ));
            }
            result[slot] = Some(object);
        }

        Ok(result.into_iter().flatten().collect())
    }
}

/// Builds the converter declared by a CRD. Injectable so tests can supply
/// custom converters without running a webhook server.
pub trait ConverterFactory: Send + Sync {
    /// Builds the converter for the CRD's declared strategy.
    fn converter_for(
        &self,
        crd: &internal::CustomResourceDefinition,
    ) -> Result<SafeConverter, ConversionError>;
}

/// The production factory: `None` and `Webhook` strategies.
pub struct StandardConverterFactory {
    /// Resolves webhook service references to URLs.
    pub resolver: Arc<dyn ServiceResolver>,
    /// Supplies client credentials for webhook calls.
    pub auth_info_resolver: Option<Arc<dyn AuthInfoResolver>>,
    /// Per-call webhook timeout.
    pub webhook_timeout: std::time::Duration,
}

impl Default for StandardConverterFactory {
    fn default() -> Self {
        StandardConverterFactory {
            resolver: Arc::new(ClusterServiceResolver),
            auth_info_resolver: None,
            webhook_timeout: std::time::Duration::from_secs(10),
        }
    }
}

impl ConverterFactory for StandardConverterFactory {
    fn converter_for(
        &self,
        crd: &internal::CustomResourceDefinition,
    ) -> Result<SafeConverter, ConversionError> {
        let gr = GroupResource::new(&crd.spec.group, &crd.spec.names.plural);
        let strategy = crd
            .spec
            .conversion
            .as_ref()
            .map(|c| c.strategy)
            .unwrap_or(internal::ConversionStrategyType::None);

        let inner: Arc<dyn Converter> = match strategy {
            internal::ConversionStrategyType::None => Arc::new(NopConverter),
            internal::ConversionStrategyType::Webhook => {
                let conversion = crd.spec.conversion.as_ref().ok_or_else(|| {
                    ConversionError::Config {
                        group_resource: gr.clone(),
                        message: "webhook strategy without conversion config".to_string(),
                    }
                })?;
                Arc::new(WebhookConverter::from_config(
                    gr.clone(),
                    conversion,
                    self.resolver.as_ref(),
                    self.auth_info_resolver.as_deref(),
                    self.webhook_timeout,
                )?)
            }
        };

        Ok(SafeConverter::new(gr, inner))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn widget(api_version: &str, rv: &str) -> Value {
        json!({
            "apiVersion": api_version,
            "kind": "Widget",
            "metadata": {"name": "a", "uid": "u-1", "resourceVersion": rv},
            "spec": {"replicas": 5}
        })
    }

    fn safe(inner: Arc<dyn Converter>) -> SafeConverter {
        SafeConverter::new(GroupResource::new("example.com", "widgets"), inner)
    }

    #[tokio::test]
    async fn test_none_strategy_changes_only_api_version() {
        let converter = safe(Arc::new(NopConverter));
        let original = widget("example.com/v1beta1", "7");
        let converted = converter
            .convert_object(original.clone(), "example.com/v1")
            .await
            .unwrap();

        let mut expected = original;
        unstructured::set_api_version(&mut expected, "example.com/v1");
        assert_eq!(converted, expected);
    }

    #[tokio::test]
    async fn test_round_trip_under_none_strategy() {
        let converter = safe(Arc::new(NopConverter));
        let original = widget("example.com/v1", "7");
        let there = converter
            .convert_object(original.clone(), "example.com/v1beta1")
            .await
            .unwrap();
        let back = converter
            .convert_object(there, "example.com/v1")
            .await
            .unwrap();
        assert_eq!(back, original);
    }

    #[tokio::test]
    async fn test_identity_skips_inner_converter() {
        struct Panicking;
        #[async_trait]
        impl Converter for Panicking {
            async fn convert(
                &self,
                _objects: Vec<Value>,
                _target: &str,
            ) -> Result<Vec<Value>, ConversionError> {
                panic!("must not be called for identity conversion");
            }
        }
        let converter = safe(Arc::new(Panicking));
        let object = widget("example.com/v1", "1");
        let out = converter
            .convert_object(object.clone(), "example.com/v1")
            .await
            .unwrap();
        assert_eq!(out, object);
    }

    #[tokio::test]
    async fn test_mutated_uid_is_rejected() {
        struct MutatesUid;
        #[async_trait]
        impl Converter for MutatesUid {
            async fn convert(
                &self,
                mut objects: Vec<Value>,
                target: &str,
            ) -> Result<Vec<Value>, ConversionError> {
                for o in &mut objects {
                    unstructured::set_api_version(o, target);
                    unstructured::set_uid(o, "evil");
                }
                Ok(objects)
            }
        }
        let converter = safe(Arc::new(MutatesUid));
        let err = converter
            .convert_object(widget("example.com/v1beta1", "1"), "example.com/v1")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("identity metadata"));
        assert!(err.to_string().starts_with("conversion webhook for widgets.example.com"));
    }

    #[tokio::test]
    async fn test_length_mismatch_is_rejected() {
        struct DropsObjects;
        #[async_trait]
        impl Converter for DropsObjects {
            async fn convert(
                &self,
                _objects: Vec<Value>,
                _target: &str,
            ) -> Result<Vec<Value>, ConversionError> {
                Ok(vec![])
            }
        }
        let converter = safe(Arc::new(DropsObjects));
        let err = converter
            .convert_object(widget("example.com/v1beta1", "1"), "example.com/v1")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("expected 1 converted objects"));
    }

    #[tokio::test]
    async fn test_mixed_batch_converts_only_stale_versions() {
        let converter = safe(Arc::new(NopConverter));
        let objects = vec![
            widget("example.com/v1", "1"),
            widget("example.com/v1beta1", "2"),
        ];
        let out = converter
            .convert_list(objects, "example.com/v1")
            .await
            .unwrap();
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|o| unstructured::api_version(o) == "example.com/v1"));
        assert_eq!(unstructured::resource_version(&out[1]), "2");
    }
}
