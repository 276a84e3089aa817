//! The CRD administration surface:
//! `/apis/apiextensions.k8s.io/v1/customresourcedefinitions` and its status
//! subresource, installed through the same request machinery as the dynamic
//! types but with the compile-time known schema.

use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::error::ApiError;
use super::negotiation::{Negotiated, decode_body, encode_response, negotiate_input};
use super::patch::{PatchType, apply_patch, patch_type_from_content_type};
use super::request::{ApiRequest, ApiResponse, RequestInfo, ResponseBody, Verb};
use crate::apiextensions::v1::{
    self, CustomResourceDefinition as CustomResourceDefinitionV1, CustomResourceDefinitionList,
};
use crate::common::{ApplyDefault, FromInternal, ToInternal, TypeMeta};
use crate::registry::{CrdEvent, CrdRegistry};
use crate::storage::Preconditions;
use crate::unstructured;

/// Serves the apiextensions.k8s.io/v1 admin group.
pub struct AdminHandler {
    registry: Arc<CrdRegistry>,
}

impl AdminHandler {
    /// Builds the handler over the shared registry.
    pub fn new(registry: Arc<CrdRegistry>) -> AdminHandler {
        AdminHandler { registry }
    }

    /// Serves one admin request; the caller has already resolved the path to
    /// this group/resource.
    pub async fn handle(
        &self,
        request: &ApiRequest,
        info: &RequestInfo,
        negotiated: Negotiated,
    ) -> Result<ApiResponse, ApiError> {
        if info.subresource.as_deref() == Some("scale") {
            return Err(ApiError::not_found_path(&request.path));
        }
        let is_status = info.subresource.as_deref() == Some("status");

        match info.verb {
            Verb::List => self.list(negotiated),
            Verb::Watch => self.watch(request),
            Verb::Get => {
                let name = info.name.as_deref().unwrap_or_default();
                let crd = self
                    .registry
                    .get(name)
                    .ok_or_else(|| ApiError::not_found_path(&request.path))?;
                Ok(self.respond(200, (*crd).clone(), negotiated))
            }
            Verb::Create if !is_status => {
                let incoming = self.decode(request)?;
                let created = self.registry.create(incoming.to_internal()).await?;
                Ok(self.respond(201, created, negotiated))
            }
            Verb::Update => {
                let mut incoming = self.decode(request)?;
                let name = info.name.as_deref().unwrap_or_default();
                let body_name = incoming
                    .metadata
                    .as_ref()
                    .and_then(|m| m.name.as_deref())
                    .unwrap_or_default();
                if !body_name.is_empty() && body_name != name {
                    return Err(ApiError::bad_request(format!(
                        "the name in the body ({}) does not match the request ({})",
                        body_name, name
                    )));
                }
                incoming
                    .metadata
                    .get_or_insert_with(Default::default)
                    .name = Some(name.to_string());
                let updated = if is_status {
                    self.registry.update_status(incoming.to_internal()).await?
                } else {
                    self.registry.update(incoming.to_internal()).await?
                };
                Ok(self.respond(200, updated, negotiated))
            }
            Verb::Patch if !is_status => {
                let name = info.name.as_deref().unwrap_or_default();
                let current = self
                    .registry
                    .get(name)
                    .ok_or_else(|| ApiError::not_found_path(&request.path))?;
                let mut current_v1 = CustomResourceDefinitionV1::from_internal((*current).clone());
                current_v1.apply_default();
                let current_value = serde_json::to_value(&current_v1)
                    .map_err(|err| ApiError::internal(err.to_string()))?;

                let patch_type = patch_type_from_content_type(request.header("content-type"))?;
                if patch_type == PatchType::Apply {
                    return Err(ApiError::bad_request(
                        "apply is not supported on the administration surface",
                    ));
                }
                let patched_value =
                    apply_patch(&current_value, &request.body, patch_type, None)?;
                let patched: CustomResourceDefinitionV1 = serde_json::from_value(patched_value)
                    .map_err(|err| {
                        ApiError::bad_request(format!("patched object is not a CustomResourceDefinition: {}", err))
                    })?;
                let updated = self.registry.update(patched.to_internal()).await?;
                Ok(self.respond(200, updated, negotiated))
            }
            Verb::Delete if !is_status => {
                let name = info.name.as_deref().unwrap_or_default();
                let preconditions = self.preconditions(request)?;
                let (crd, _gone) = self.registry.delete(name, &preconditions).await?;
                Ok(self.respond(200, crd, negotiated))
            }
            _ => Err(ApiError::method_not_allowed()),
        }
    }

    fn list(&self, negotiated: Negotiated) -> Result<ApiResponse, ApiError> {
        let mut items: Vec<CustomResourceDefinitionV1> = self
            .registry
            .list()
            .into_iter()
            .map(|crd| {
                let mut v1 = CustomResourceDefinitionV1::from_internal((*crd).clone());
                v1.apply_default();
                v1
            })
            .collect();
        items.sort_by(|a, b| {
            let empty = String::new();
            let a = a.metadata.as_ref().and_then(|m| m.name.as_ref()).unwrap_or(&empty).clone();
            let b_name = b.metadata.as_ref().and_then(|m| m.name.as_ref()).unwrap_or(&empty);
            a.cmp(b_name)
        });
        let mut list = CustomResourceDefinitionList {
            items,
            ..Default::default()
        };
        list.apply_default();
        Ok(encode_response(200, &list, negotiated.media))
    }

    fn watch(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        let mut events = self.registry.subscribe();
        let (tx, rx) = mpsc::channel::<Vec<u8>>(64);
        let cancel = request.cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = events.recv() => {
                        let Ok(event) = event else { break };
                        let (kind, crd) = match &event {
                            CrdEvent::Added(crd) => ("ADDED", crd),
                            CrdEvent::Updated { new, .. } => ("MODIFIED", new),
                            CrdEvent::Deleted(crd) => ("DELETED", crd),
                        };
                        let mut v1 = CustomResourceDefinitionV1::from_internal((**crd).clone());
                        v1.apply_default();
                        let line = json!({"type": kind, "object": v1});
                        let mut bytes = serde_json::to_vec(&line).unwrap_or_default();
                        bytes.push(b'\n');
                        if tx.send(bytes).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });
        Ok(ApiResponse {
            code: 200,
            headers: vec![(
                "content-type".to_string(),
                "application/json;stream=watch".to_string(),
            )],
            body: ResponseBody::Stream(rx),
        })
    }

    fn decode(&self, request: &ApiRequest) -> Result<CustomResourceDefinitionV1, ApiError> {
        let media = negotiate_input(request.header("content-type"))?;
        let value = decode_body(&request.body, media)?;
        let type_meta: TypeMeta = TypeMeta::new(
            unstructured::api_version(&value),
            unstructured::kind(&value),
        );
        if !type_meta.api_version.is_empty() && type_meta.api_version != v1::API_VERSION {
            return Err(ApiError::bad_request(format!(
                "unsupported apiVersion {:?}",
                type_meta.api_version
            )));
        }
        let mut crd: CustomResourceDefinitionV1 = serde_json::from_value(value).map_err(|err| {
            ApiError::bad_request(format!("decoding CustomResourceDefinition: {}", err))
        })?;
        crd.apply_default();
        Ok(crd)
    }

    fn respond(
        &self,
        code: u16,
        crd: crate::apiextensions::internal::CustomResourceDefinition,
        negotiated: Negotiated,
    ) -> ApiResponse {
        let mut v1 = CustomResourceDefinitionV1::from_internal(crd);
        v1.apply_default();
        encode_response(code, &v1, negotiated.media)
    }

    fn preconditions(&self, request: &ApiRequest) -> Result<Preconditions, ApiError> {
        let mut preconditions = Preconditions::default();
        if !request.body.is_empty() {
            let options: Value = serde_json::from_slice(&request.body)
                .map_err(|err| ApiError::bad_request(format!("decoding DeleteOptions: {}", err)))?;
            if let Some(found) = options.get("preconditions") {
                preconditions.uid = found.get("uid").and_then(Value::as_str).map(str::to_string);
                preconditions.resource_version = found
                    .get("resourceVersion")
                    .and_then(Value::as_str)
                    .map(str::to_string);
            }
        }
        Ok(preconditions)
    }
}
