//! The conversion webhook client.
//!
//! Source: k8s.io/apiextensions-apiserver/pkg/apiserver/conversion/webhook_converter.go
//!
//! POSTs a ConversionReview envelope over HTTPS validated by the CRD's CA
//! bundle and verifies the response protocol: matching uid, Success result,
//! converted objects present. Transport and protocol failures are normalized
//! into [`ConversionError::Webhook`] with the resource-identifying prefix;
//! there is no retry.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use super::{ConversionError, Converter};
use crate::apiextensions::internal;
use crate::apiextensions::v1::ConversionReview;
use crate::common::GroupResource;

/// Maps webhook service references to concrete URLs. The in-cluster resolver
/// is the default; tests and split-horizon deployments inject their own.
pub trait ServiceResolver: Send + Sync {
    /// Resolves a service reference to a base URL.
    fn resolve(&self, reference: &internal::ServiceReference) -> Result<String, String>;
}

/// Supplies client credentials (a PEM-encoded identity) for webhook calls.
pub trait AuthInfoResolver: Send + Sync {
    /// Credentials for calls to the given URL, when any are configured.
    fn client_identity(&self, url: &str) -> Option<Vec<u8>>;
}

/// Resolves services to their cluster DNS names.
pub struct ClusterServiceResolver;

impl ServiceResolver for ClusterServiceResolver {
    fn resolve(&self, reference: &internal::ServiceReference) -> Result<String, String> {
        if reference.name.is_empty() || reference.namespace.is_empty() {
            return Err("service reference requires name and namespace".to_string());
        }
        let port = reference.port.unwrap_or(443);
        let path = reference.path.as_deref().unwrap_or("").trim_start_matches('/');
        Ok(format!(
            "https://{}.{}.svc:{}/{}",
            reference.name, reference.namespace, port, path
        ))
    }
}

/// Converts objects by calling an external webhook.
#[derive(Debug)]
pub struct WebhookConverter {
    group_resource: GroupResource,
    url: String,
    client: reqwest::Client,
}

impl WebhookConverter {
    /// Builds a converter from a CRD conversion config: resolves the URL,
    /// negotiates the review version and prepares the TLS client.
    pub fn from_config(
        group_resource: GroupResource,
        conversion: &internal::CustomResourceConversion,
        resolver: &dyn ServiceResolver,
        auth: Option<&dyn AuthInfoResolver>,
        timeout: Duration,
    ) -> Result<WebhookConverter, ConversionError> {
        let config = conversion.webhook_client_config.as_ref().ok_or_else(|| {
            ConversionError::Config {
                group_resource: group_resource.clone(),
                message: "webhook strategy requires webhookClientConfig".to_string(),
            }
        })?;

        // prefer the newest review version both sides understand; this
        // server only speaks v1
        let negotiated = conversion
            .conversion_review_versions
            .iter()
            .find(|v| {
                crate::apiextensions::validation::SUPPORTED_CONVERSION_REVIEW_VERSIONS
                    .contains(&v.as_str())
            })
            .cloned();
        if negotiated.is_none() {
            return Err(ConversionError::Config {
                group_resource: group_resource.clone(),
                message: format!(
                    "no supported conversionReviewVersions in {:?}",
                    conversion.conversion_review_versions
                ),
            });
        }

        let url = match (&config.url, &config.service) {
            (Some(url), _) => url.clone(),
            (None, Some(service)) => resolver.resolve(service).map_err(|message| {
                ConversionError::Config {
                    group_resource: group_resource.clone(),
                    message,
                }
            })?,
            (None, None) => {
                return Err(ConversionError::Config {
                    group_resource,
                    message: "webhookClientConfig requires url or service".to_string(),
                });
            }
        };

        let mut builder = reqwest::Client::builder().timeout(timeout);
        if !config.ca_bundle.is_empty() {
            let cert = reqwest::Certificate::from_pem(&config.ca_bundle.0).map_err(|err| {
                ConversionError::Config {
                    group_resource: group_resource.clone(),
                    message: format!("invalid caBundle: {}", err),
                }
            })?;
            builder = builder.add_root_certificate(cert);
        }
        if let Some(pem) = auth.and_then(|resolver| resolver.client_identity(&url)) {
            let identity = reqwest::Identity::from_pem(&pem).map_err(|err| {
                ConversionError::Config {
                    group_resource: group_resource.clone(),
                    message: format!("invalid webhook client identity: {}", err),
                }
            })?;
            builder = builder.identity(identity);
        }
        let client = builder.build().map_err(|err| ConversionError::Config {
            group_resource: group_resource.clone(),
            message: format!("building webhook client: {}", err),
        })?;

        Ok(WebhookConverter {
            group_resource,
            url,
            client,
        })
    }

    fn request_uid() -> String {
        let bytes: [u8; 16] = rand::random();
        let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
        format!(
            "{}-{}-{}-{}-{}",
            &hex[0..8],
            &hex[8..12],
            &hex[12..16],
            &hex[16..20],
            &hex[20..32]
        )
    }

    fn error(&self, message: impl Into<String>) -> ConversionError {
        ConversionError::Webhook {
            group_resource: self.group_resource.clone(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl Converter for WebhookConverter {
    async fn convert(
        &self,
        objects: Vec<Value>,
        target_api_version: &str,
    ) -> Result<Vec<Value>, ConversionError> {
        let count = objects.len();
        let uid = Self::request_uid();
        let review = ConversionReview::new_request(&uid, target_api_version, objects);

        tracing::debug!(
            url = %self.url,
            resource = %self.group_resource,
            objects = count,
            "calling conversion webhook"
        );

        let response = self
            .client
            .post(&self.url)
            .json(&review)
            .send()
            .await
            .map_err(|err| self.error(format!("request failed: {}", err)))?;

        if !response.status().is_success() {
            return Err(self.error(format!("unexpected HTTP status {}", response.status())));
        }

        let review: ConversionReview = response
            .json()
            .await
            .map_err(|err| self.error(format!("decoding response: {}", err)))?;

        let response = review
            .response
            .ok_or_else(|| self.error("response field missing in ConversionReview"))?;

        if response.uid != uid {
            return Err(self.error(format!(
                "response uid {} does not match request uid {}",
                response.uid, uid
            )));
        }
        if !response.result.is_success() {
            let message = response
                .result
                .message
                .unwrap_or_else(|| "conversion failed".to_string());
            return Err(self.error(format!("webhook reported failure: {}", message)));
        }
        if response.converted_objects.len() != count {
            return Err(self.error(format!(
                "expected {} converted objects, got {}",
                count,
                response.converted_objects.len()
            )));
        }

        Ok(response.converted_objects)
    }
}
