//! The dynamic request dispatcher.
//!
//! Source: k8s.io/apiextensions-apiserver/pkg/apiserver/customresource_handler.go
//!
//! Every request loads the serving-info snapshot with a single atomic read,
//! resolves the CRD by (group, resource) through the registry's indexed
//! cache, and drives the write pipeline: decode, default, mutating
//! admission, validation (schema and expression rules), validating
//! admission, pruning, conversion to the storage version, storage. Reads
//! run the pipeline backwards: storage, conversion to the request version,
//! projection, encoding.
//!
//! Reconfiguration rebuilds only affected entries and publishes a fresh
//! snapshot with one atomic store; replaced entries linger until their
//! in-flight requests drain.

use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::admission::{AdmissionAttributes, Operation};
use super::config::ServerConfig;
use super::error::ApiError;
use super::negotiation::{
    self, MediaType, Negotiated, Projection, decode_body, encode_error, encode_response,
    negotiate_input, negotiate_output,
};
use super::patch::{PatchType, apply_patch, apply_ssa, patch_type_from_content_type};
use super::request::{ApiRequest, ApiResponse, RequestInfo, ResponseBody, Verb, parse_request_info};
use super::serving::{
    ServingInfo, ServingSnapshot, ServingVersion, SnapshotHolder, build_serving_info,
};
use crate::apiextensions::internal::CustomResourceDefinitionConditionType;
use crate::cel;
use crate::common::{GroupVersionKind, GroupVersionResource};
use crate::conversion::ConverterFactory;
use crate::registry::{CrdEvent, CrdRegistry};
use crate::schema::{apply_defaults, prune};
use crate::storage::{
    Backend, ListOptions, Preconditions, Scale, StorageError, WatchEventType,
    apply_scale_to_object, parse_field_selector, parse_label_selector, scale_from_object,
};
use crate::unstructured;
use crate::validation::validate_instance;

/// The addressed scope of a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Scope {
    Main,
    Status,
    Scale,
}

/// The dynamic dispatcher.
pub struct CrdHandler {
    registry: Arc<CrdRegistry>,
    backend: Arc<dyn Backend>,
    config: Arc<ServerConfig>,
    converter_factory: Arc<dyn ConverterFactory>,
    snapshot: SnapshotHolder,
}

impl CrdHandler {
    /// Builds a handler with an empty snapshot.
    pub fn new(
        registry: Arc<CrdRegistry>,
        backend: Arc<dyn Backend>,
        config: Arc<ServerConfig>,
        converter_factory: Arc<dyn ConverterFactory>,
    ) -> Arc<CrdHandler> {
        Arc::new(CrdHandler {
            registry,
            backend,
            config,
            converter_factory,
            snapshot: SnapshotHolder::default(),
        })
    }

    /// Whether serving info for the CRD uid is installed.
    pub fn has_serving(&self, uid: &str) -> bool {
        self.snapshot.load().by_uid.contains_key(uid)
    }

    /// Installs serving info for every cached CRD, then follows registry
    /// events until cancelled.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut events = self.registry.subscribe();
        for crd in self.registry.list() {
            self.install(&crd);
        }
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                event = events.recv() => match event {
                    Ok(event) => self.apply_event(&event),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {
                        for crd in self.registry.list() {
                            self.install(&crd);
                        }
                    }
                    Err(_) => return,
                },
            }
        }
    }

    /// Applies one registry event to the snapshot.
    pub fn apply_event(&self, event: &CrdEvent) {
        match event {
            CrdEvent::Added(crd) => self.install(crd),
            // the entry carries the CRD snapshot (conditions included), so a
            // status-only change still republishes; install() reuses the
            // storage handle when the (group, resource) is unchanged
            CrdEvent::Updated { old: _, new } => self.install(new),
            CrdEvent::Deleted(crd) => self.remove(crd.metadata.uid()),
        }
    }

    /// Builds and publishes serving info for one CRD, reusing the storage
    /// handle when the (group, resource) is unchanged.
    pub fn install(&self, crd: &Arc<crate::apiextensions::internal::CustomResourceDefinition>) {
        let current = self.snapshot.load();
        let reuse_store = current.by_uid.get(crd.metadata.uid()).and_then(|old| {
            let same_gr = old.group_resource.group == crd.spec.group
                && old.group_resource.resource == crd.spec.names.plural;
            same_gr.then(|| old.store.clone())
        });

        let info = match build_serving_info(
            crd,
            &self.backend,
            &self.converter_factory,
            &self.config,
            reuse_store,
        ) {
            Ok(info) => info,
            Err(err) => {
                tracing::warn!(crd = crd.metadata.name(), "serving info build failed: {}", err);
                return;
            }
        };

        let mut next = ServingSnapshot::default();
        next.by_uid = current.by_uid.clone();
        let old = next.by_uid.insert(info.uid.clone(), Arc::new(info));
        self.snapshot.store(next);
        tracing::debug!(crd = crd.metadata.name(), "serving info installed");
        if let Some(old) = old {
            self.retire(old);
        }
    }

    /// Removes the entry for a deleted CRD.
    pub fn remove(&self, uid: &str) {
        let current = self.snapshot.load();
        if !current.by_uid.contains_key(uid) {
            return;
        }
        let mut next = ServingSnapshot::default();
        next.by_uid = current.by_uid.clone();
        let old = next.by_uid.remove(uid);
        self.snapshot.store(next);
        if let Some(old) = old {
            self.retire(old);
        }
    }

    /// Keeps a replaced entry alive until its requests drain plus the
    /// configured linger.
    fn retire(&self, old: Arc<ServingInfo>) {
        let linger = self.config.teardown_linger;
        tokio::spawn(async move {
            old.inflight.drained().await;
            tokio::time::sleep(linger).await;
            tracing::debug!(resource = %old.group_resource, "serving info released");
            drop(old);
        });
    }

    /// Serves one request.
    pub async fn handle(&self, request: ApiRequest) -> ApiResponse {
        let negotiated = match negotiate_output(request.header("accept")) {
            Ok(n) => n,
            Err(err) => return encode_error(&err, MediaType::Json),
        };

        let info = match parse_request_info(&request.method, &request.path, &request.query) {
            Ok(info) => info,
            Err(err) => return self.delegate_or_error(request, err).await,
        };

        if info.verb == Verb::Watch {
            return match self.dispatch(&request, &info, negotiated).await {
                Ok(response) => response,
                Err(err) => encode_error(&err, negotiated.media),
            };
        }

        let work = self.dispatch(&request, &info, negotiated);
        match tokio::time::timeout(self.config.request_timeout, work).await {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => encode_error(&err, negotiated.media),
            Err(_) => encode_error(
                &ApiError::timeout("the request did not complete within the allowed duration"),
                negotiated.media,
            ),
        }
    }

    async fn delegate_or_error(&self, request: ApiRequest, err: ApiError) -> ApiResponse {
        match self.config.delegate.as_ref() {
            Some(delegate) => delegate.handle(request).await,
            None => encode_error(&err, MediaType::Json),
        }
    }

    async fn dispatch(
        &self,
        request: &ApiRequest,
        info: &RequestInfo,
        negotiated: Negotiated,
    ) -> Result<ApiResponse, ApiError> {
        if !self.registry.is_synced() {
            return Err(ApiError::service_unavailable(
                "the type catalog has not finished loading",
            ));
        }

        let Some(crd) = self.registry.find_by_resource(&info.group, &info.resource) else {
            // not a type this core owns: fall through to the delegate
            if let Some(delegate) = self.config.delegate.as_ref() {
                return Ok(delegate.handle(request.clone()).await);
            }
            return Err(ApiError::not_found_path(&request.path));
        };
        let snapshot = self.snapshot.load();
        let Some(serving) = snapshot.by_uid.get(crd.metadata.uid()).cloned() else {
            if let Some(delegate) = self.config.delegate.as_ref() {
                return Ok(delegate.handle(request.clone()).await);
            }
            return Err(ApiError::not_found_path(&request.path));
        };
        drop(snapshot);
        let _guard = serving.inflight.enter();

        if !crd.is_condition_true(CustomResourceDefinitionConditionType::Established) {
            return Err(ApiError::not_found_path(&request.path));
        }

        let Some(version) = serving.version(&info.version).filter(|v| v.served) else {
            return Err(ApiError::not_found_path(&request.path));
        };

        // request scope must agree with the resource scope; namespaced
        // resources additionally allow all-namespace reads
        if serving.namespaced {
            if info.namespace.is_none()
                && !matches!(info.verb, Verb::List | Verb::Watch | Verb::DeleteCollection)
            {
                return Err(ApiError::not_found_path(&request.path));
            }
        } else if info.namespace.is_some() {
            return Err(ApiError::not_found_path(&request.path));
        }

        let scope = match info.subresource.as_deref() {
            None => Scope::Main,
            Some("status") => Scope::Status,
            Some("scale") => Scope::Scale,
            Some(_) => return Err(ApiError::not_found_path(&request.path)),
        };
        if scope != Scope::Main
            && !matches!(info.verb, Verb::Get | Verb::Update | Verb::Patch)
        {
            return Err(ApiError::method_not_allowed());
        }
        match scope {
            Scope::Status if version.subresources.as_ref().and_then(|s| s.status.as_ref()).is_none() => {
                return Err(ApiError::not_found_path(&request.path));
            }
            Scope::Scale if version.subresources.as_ref().and_then(|s| s.scale.as_ref()).is_none() => {
                return Err(ApiError::not_found_path(&request.path));
            }
            _ => {}
        }

        if info.verb == Verb::Create
            && crd.is_condition_true(CustomResourceDefinitionConditionType::Terminating)
        {
            return Err(ApiError::method_not_allowed());
        }

        let response = match info.verb {
            Verb::Create => self.create(request, info, &serving, version, negotiated).await?,
            Verb::Get => self.get(info, &serving, version, scope, negotiated).await?,
            Verb::List => self.list(request, info, &serving, version, negotiated).await?,
            Verb::Watch => self.watch(request, info, &serving, version).await?,
            Verb::Update | Verb::Patch => {
                self.write(request, info, &serving, version, scope, negotiated).await?
            }
            Verb::Delete => self.delete(request, info, &serving, version, negotiated).await?,
            Verb::DeleteCollection => {
                self.delete_collection(request, info, &serving, version, negotiated).await?
            }
        };
        Ok(self.decorate(response, version, &serving, info))
    }

    fn decorate(
        &self,
        mut response: ApiResponse,
        version: &ServingVersion,
        serving: &ServingInfo,
        info: &RequestInfo,
    ) -> ApiResponse {
        if version.deprecated {
            let text = version.deprecation_warning.clone().unwrap_or_else(|| {
                format!(
                    "{}/{} {} is deprecated",
                    serving.group_resource.group, info.version, serving.kind
                )
            });
            response = response.with_header("warning", &format!("299 - {:?}", text));
        }
        response
    }

    // ========================================================================
    // Read verbs
    // ========================================================================

    async fn get(
        &self,
        info: &RequestInfo,
        serving: &Arc<ServingInfo>,
        version: &ServingVersion,
        scope: Scope,
        negotiated: Negotiated,
    ) -> Result<ApiResponse, ApiError> {
        let name = info.name.as_deref().unwrap_or_default();
        let stored = serving
            .store
            .get(info.namespace.as_deref(), name)
            .await
            .map_err(|err| self.storage_error(err, serving, name))?;
        let object = self
            .to_request_version(stored, serving, version, &info.version)
            .await?;

        if scope == Scope::Scale {
            let definition = scale_definition(version)?;
            let scale = scale_from_object(&object, definition)
                .map_err(ApiError::internal)?;
            return Ok(encode_response(200, &scale, negotiated.media));
        }

        Ok(self.object_response(200, &object, version, negotiated))
    }

    async fn list(
        &self,
        request: &ApiRequest,
        info: &RequestInfo,
        serving: &Arc<ServingInfo>,
        version: &ServingVersion,
        negotiated: Negotiated,
    ) -> Result<ApiResponse, ApiError> {
        let options = self.list_options(request, version)?;
        let result = serving
            .store
            .list(info.namespace.as_deref(), &options)
            .await
            .map_err(|err| self.storage_error(err, serving, ""))?;

        let mut items = Vec::with_capacity(result.items.len());
        for stored in result.items {
            items.push(
                self.to_request_version(stored, serving, version, &info.version)
                    .await?,
            );
        }

        let mut list_meta = json!({"resourceVersion": result.resource_version});
        if let Some(token) = result.continue_token.as_deref() {
            list_meta["continue"] = json!(token);
        }
        if let Some(remaining) = result.remaining {
            list_meta["remainingItemCount"] = json!(remaining);
        }

        let payload = match negotiated.projection {
            Projection::Table => negotiation::to_table(&items, &version.columns, list_meta),
            Projection::PartialObjectMetadata => {
                negotiation::to_partial_object_metadata_list(&items, list_meta)
            }
            Projection::None => json!({
                "apiVersion": serving.api_version(&info.version),
                "kind": serving.list_kind,
                "metadata": list_meta,
                "items": items,
            }),
        };
        Ok(encode_response(200, &payload, negotiated.media))
    }

    async fn watch(
        &self,
        request: &ApiRequest,
        info: &RequestInfo,
        serving: &Arc<ServingInfo>,
        version: &ServingVersion,
    ) -> Result<ApiResponse, ApiError> {
        let options = self.list_options(request, version)?;
        let mut events = serving
            .store
            .watch(info.namespace.as_deref(), &options)
            .await
            .map_err(|err| self.storage_error(err, serving, ""))?;

        let (tx, rx) = mpsc::channel::<Vec<u8>>(64);
        let serving = serving.clone();
        let version_name = info.version.clone();
        let cancel = request.cancel.clone();
        let lifetime = self.config.min_request_timeout;
        let _watch_guard = serving.inflight.enter();
        tokio::spawn(async move {
            let guard = _watch_guard;
            let deadline = tokio::time::sleep(lifetime);
            tokio::pin!(deadline);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = &mut deadline => break,
                    event = events.recv() => {
                        let Some(mut event) = event else { break };
                        let target = serving.api_version(&version_name);
                        match serving.converter.convert_object(event.object, &target).await {
                            Ok(object) => event.object = object,
                            Err(err) => {
                                let status = ApiError::from(err).to_status();
                                let error_event = crate::storage::WatchEvent {
                                    event_type: WatchEventType::Error,
                                    object: serde_json::to_value(&status).unwrap_or_default(),
                                };
                                let _ = tx.send(wire_line(&error_event)).await;
                                break;
                            }
                        }
                        if tx.send(wire_line(&event)).await.is_err() {
                            break;
                        }
                    }
                }
            }
            drop(guard);
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

    // ========================================================================
    // Write verbs
    // ========================================================================

    async fn create(
        &self,
        request: &ApiRequest,
        info: &RequestInfo,
        serving: &Arc<ServingInfo>,
        version: &ServingVersion,
        negotiated: Negotiated,
    ) -> Result<ApiResponse, ApiError> {
        let mut object = self.decode_payload(request)?;
        let api_version = serving.api_version(&info.version);
        let declared = unstructured::api_version(&object);
        if !declared.is_empty() && declared != api_version {
            return Err(ApiError::bad_request(format!(
                "the apiVersion in the body ({}) does not match the request ({})",
                declared, api_version
            )));
        }
        let declared_kind = unstructured::kind(&object);
        if !declared_kind.is_empty() && declared_kind != serving.kind {
            return Err(ApiError::bad_request(format!(
                "the kind in the body ({}) does not match the request ({})",
                declared_kind, serving.kind
            )));
        }
        unstructured::set_api_version(&mut object, &api_version);
        unstructured::set_kind(&mut object, &serving.kind);
        if let Some(namespace) = info.namespace.as_deref() {
            unstructured::set_namespace(&mut object, namespace);
        }

        if let Some(structural) = version.structural.as_deref() {
            apply_defaults(&mut object, structural);
        }

        let mut attributes = AdmissionAttributes {
            operation: Operation::Create,
            gvk: GroupVersionKind::new(&info.group, &info.version, &serving.kind),
            gvr: GroupVersionResource::new(&info.group, &info.version, &info.resource),
            namespace: info.namespace.clone(),
            name: unstructured::name(&object).to_string(),
            subresource: None,
            object: Some(object),
            old_object: None,
        };
        self.config.admission.mutate(&mut attributes).await?;
        let mut object = attributes
            .object
            .take()
            .ok_or_else(|| ApiError::internal("mutating admission dropped the object"))?;
        if let Some(structural) = version.structural.as_deref() {
            apply_defaults(&mut object, structural);
        }

        self.validate_object(&object, None, serving, version)?;

        attributes.object = Some(object);
        self.config.admission.validate(&attributes).await?;
        let mut object = attributes
            .object
            .take()
            .ok_or_else(|| ApiError::internal("admission dropped the object"))?;

        if let Some(structural) = version.structural.as_deref() {
            prune(&mut object, structural);
        }

        let storage_object = self
            .to_storage_version(object, serving)
            .await?;
        let name = unstructured::name(&storage_object).to_string();
        let created = serving
            .store
            .create(info.namespace.as_deref(), storage_object)
            .await
            .map_err(|err| self.storage_error(err, serving, &name))?;

        let response_object = self
            .to_request_version(created, serving, version, &info.version)
            .await?;
        Ok(self.object_response(201, &response_object, version, negotiated))
    }

    /// PUT and PATCH share the read, merge, validate, convert, CAS pipeline.
    async fn write(
        &self,
        request: &ApiRequest,
        info: &RequestInfo,
        serving: &Arc<ServingInfo>,
        version: &ServingVersion,
        scope: Scope,
        negotiated: Negotiated,
    ) -> Result<ApiResponse, ApiError> {
        let name = info.name.as_deref().unwrap_or_default().to_string();
        let stored = serving
            .store
            .get(info.namespace.as_deref(), &name)
            .await
            .map_err(|err| self.storage_error(err, serving, &name))?;
        let old = self
            .to_request_version(stored, serving, version, &info.version)
            .await?;

        // produce the full desired object for the addressed scope
        let mut object = match (info.verb, scope) {
            (Verb::Update, Scope::Scale) => {
                let scale: Scale = serde_json::from_slice(&request.body)
                    .map_err(|err| ApiError::bad_request(format!("decoding Scale: {}", err)))?;
                let definition = scale_definition(version)?;
                let mut object = old.clone();
                apply_scale_to_object(&mut object, &scale, definition)
                    .map_err(ApiError::bad_request)?;
                object
            }
            (Verb::Update, _) => {
                let incoming = self.decode_payload(request)?;
                let body_name = unstructured::name(&incoming);
                if !body_name.is_empty() && body_name != name {
                    return Err(ApiError::bad_request(format!(
                        "the name in the body ({}) does not match the request ({})",
                        body_name, name
                    )));
                }
                incoming
            }
            (Verb::Patch, _) => {
                let patch_type = patch_type_from_content_type(request.header("content-type"))?;
                match patch_type {
                    PatchType::Apply => {
                        let applied: Value = serde_yaml::from_slice(&request.body)
                            .map_err(|err| {
                                ApiError::bad_request(format!("decoding apply patch: {}", err))
                            })?;
                        let manager = request.param("fieldManager").unwrap_or_default();
                        let force = request.param("force") == Some("true");
                        apply_ssa(
                            &old,
                            &applied,
                            version.structural.as_deref(),
                            manager,
                            force,
                        )?
                    }
                    other => apply_patch(
                        &old,
                        &request.body,
                        other,
                        version.structural.as_deref(),
                    )?,
                }
            }
            _ => return Err(ApiError::method_not_allowed()),
        };

        unstructured::set_api_version(&mut object, &serving.api_version(&info.version));
        unstructured::set_kind(&mut object, &serving.kind);
        unstructured::set_name(&mut object, &name);
        if let Some(namespace) = info.namespace.as_deref() {
            unstructured::set_namespace(&mut object, namespace);
        }

        // scope discipline: main writes cannot touch status once the status
        // subresource exists; status writes replace nothing but status
        let has_status_subresource = version
            .subresources
            .as_ref()
            .and_then(|s| s.status.as_ref())
            .is_some();
        match scope {
            Scope::Main | Scope::Scale => {
                if has_status_subresource {
                    copy_subtree(&old, &mut object, "status");
                }
            }
            Scope::Status => {
                let status = object.get("status").cloned();
                let mut merged = old.clone();
                match status {
                    Some(status) => {
                        if let Some(map) = merged.as_object_mut() {
                            map.insert("status".to_string(), status);
                        }
                    }
                    None => {
                        if let Some(map) = merged.as_object_mut() {
                            map.remove("status");
                        }
                    }
                }
                // the client's resourceVersion still drives concurrency
                let rv = unstructured::resource_version(&object).to_string();
                if !rv.is_empty() {
                    unstructured::set_resource_version(&mut merged, &rv);
                }
                object = merged;
            }
        }

        // generation advances when the desired state (everything outside
        // metadata and status) changes through the main scope
        let generation = if scope == Scope::Status {
            unstructured::generation(&old)
        } else if desired_state(&old, has_status_subresource)
            != desired_state(&object, has_status_subresource)
        {
            unstructured::generation(&old) + 1
        } else {
            unstructured::generation(&old)
        };
        unstructured::set_generation(&mut object, generation);

        if let Some(structural) = version.structural.as_deref() {
            apply_defaults(&mut object, structural);
        }

        let mut attributes = AdmissionAttributes {
            operation: Operation::Update,
            gvk: GroupVersionKind::new(&info.group, &info.version, &serving.kind),
            gvr: GroupVersionResource::new(&info.group, &info.version, &info.resource),
            namespace: info.namespace.clone(),
            name: name.clone(),
            subresource: info.subresource.clone(),
            object: Some(object),
            old_object: Some(old.clone()),
        };
        self.config.admission.mutate(&mut attributes).await?;
        let mut object = attributes
            .object
            .take()
            .ok_or_else(|| ApiError::internal("mutating admission dropped the object"))?;
        if let Some(structural) = version.structural.as_deref() {
            apply_defaults(&mut object, structural);
        }

        self.validate_object(&object, Some(&old), serving, version)?;

        attributes.object = Some(object);
        self.config.admission.validate(&attributes).await?;
        let mut object = attributes
            .object
            .take()
            .ok_or_else(|| ApiError::internal("admission dropped the object"))?;

        if let Some(structural) = version.structural.as_deref() {
            prune(&mut object, structural);
        }

        let expected_rv = {
            let body_rv = unstructured::resource_version(&object).to_string();
            if body_rv.is_empty() {
                unstructured::resource_version(&old).to_string()
            } else {
                body_rv
            }
        };

        let storage_object = self.to_storage_version(object, serving).await?;
        let (written, _deleted) = serving
            .store
            .update(
                info.namespace.as_deref(),
                &name,
                storage_object,
                Some(&expected_rv),
            )
            .await
            .map_err(|err| self.storage_error(err, serving, &name))?;

        let response_object = self
            .to_request_version(written, serving, version, &info.version)
            .await?;

        if scope == Scope::Scale {
            let definition = scale_definition(version)?;
            let scale = scale_from_object(&response_object, definition)
                .map_err(ApiError::internal)?;
            return Ok(encode_response(200, &scale, negotiated.media));
        }
        Ok(self.object_response(200, &response_object, version, negotiated))
    }

    async fn delete(
        &self,
        request: &ApiRequest,
        info: &RequestInfo,
        serving: &Arc<ServingInfo>,
        version: &ServingVersion,
        negotiated: Negotiated,
    ) -> Result<ApiResponse, ApiError> {
        let name = info.name.as_deref().unwrap_or_default();
        let preconditions = self.delete_preconditions(request)?;
        let (object, _gone) = serving
            .store
            .delete(info.namespace.as_deref(), name, &preconditions)
            .await
            .map_err(|err| self.storage_error(err, serving, name))?;
        let response_object = self
            .to_request_version(object, serving, version, &info.version)
            .await?;
        Ok(self.object_response(200, &response_object, version, negotiated))
    }

    async fn delete_collection(
        &self,
        request: &ApiRequest,
        info: &RequestInfo,
        serving: &Arc<ServingInfo>,
        version: &ServingVersion,
        negotiated: Negotiated,
    ) -> Result<ApiResponse, ApiError> {
        let options = self.list_options(request, version)?;
        let listed = serving
            .store
            .list(info.namespace.as_deref(), &options)
            .await
            .map_err(|err| self.storage_error(err, serving, ""))?;

        let mut deleted = Vec::new();
        for item in listed.items {
            let name = unstructured::name(&item).to_string();
            let namespace = unstructured::namespace(&item).to_string();
            let namespace = if namespace.is_empty() {
                info.namespace.as_deref()
            } else {
                Some(namespace.as_str())
            };
            match serving
                .store
                .delete(namespace, &name, &Preconditions::default())
                .await
            {
                Ok((object, _)) => deleted.push(
                    self.to_request_version(object, serving, version, &info.version)
                        .await?,
                ),
                Err(StorageError::NotFound(_)) => {}
                Err(err) => return Err(self.storage_error(err, serving, &name)),
            }
        }

        let payload = json!({
            "apiVersion": serving.api_version(&info.version),
            "kind": serving.list_kind,
            "metadata": {"resourceVersion": listed.resource_version},
            "items": deleted,
        });
        Ok(encode_response(200, &payload, negotiated.media))
    }

    // ========================================================================
    // Shared pipeline pieces
    // ========================================================================

    fn decode_payload(&self, request: &ApiRequest) -> Result<Value, ApiError> {
        if request.body.len() > self.config.max_request_body_bytes {
            return Err(ApiError::bad_request(format!(
                "the request body exceeds the {} byte limit",
                self.config.max_request_body_bytes
            )));
        }
        let media = negotiate_input(request.header("content-type"))?;
        decode_body(&request.body, media)
    }

    fn validate_object(
        &self,
        object: &Value,
        old: Option<&Value>,
        serving: &ServingInfo,
        version: &ServingVersion,
    ) -> Result<(), ApiError> {
        let errs = match version.structural.as_deref() {
            Some(structural) => {
                let mut errs = validate_instance(object, structural, serving.namespaced);
                errs.extend(cel::validate_expressions(
                    object,
                    old,
                    structural,
                    &version.rules,
                ));
                errs
            }
            None => {
                // non-structural versions still get strict metadata checks
                crate::schema::validate_instance_object_meta(
                    object,
                    serving.namespaced,
                    crate::common::validation::name_is_dns_subdomain,
                    &crate::common::validation::Path::new("metadata"),
                )
            }
        };

        if errs.is_empty() {
            Ok(())
        } else {
            Err(ApiError::invalid(
                &serving.kind,
                unstructured::name(object),
                errs,
            ))
        }
    }

    async fn to_storage_version(
        &self,
        object: Value,
        serving: &ServingInfo,
    ) -> Result<Value, ApiError> {
        let target = serving.api_version(&serving.storage_version);
        Ok(serving.converter.convert_object(object, &target).await?)
    }

    async fn to_request_version(
        &self,
        object: Value,
        serving: &ServingInfo,
        version: &ServingVersion,
        version_name: &str,
    ) -> Result<Value, ApiError> {
        let target = serving.api_version(version_name);
        let mut object = serving.converter.convert_object(object, &target).await?;
        unstructured::set_kind(&mut object, &serving.kind);
        // objects read back from older stored versions may carry fields the
        // current schema no longer declares
        if let Some(structural) = version.structural.as_deref() {
            prune(&mut object, structural);
        }
        Ok(object)
    }

    fn list_options(
        &self,
        request: &ApiRequest,
        version: &ServingVersion,
    ) -> Result<ListOptions, ApiError> {
        let mut options = ListOptions::default();
        if let Some(selector) = request.param("labelSelector") {
            options.label_selector =
                Some(parse_label_selector(selector).map_err(ApiError::bad_request)?);
        }
        if let Some(selector) = request.param("fieldSelector") {
            let parsed = parse_field_selector(selector).map_err(ApiError::bad_request)?;
            for field in parsed.fields() {
                let allowed = field == "metadata.name"
                    || field == "metadata.namespace"
                    || version.selectable_fields.iter().any(|f| f.as_str() == field);
                if !allowed {
                    return Err(ApiError::bad_request(format!(
                        "field selector {:?} is not supported for this resource",
                        field
                    )));
                }
            }
            options.field_selector = Some(parsed);
        }
        if let Some(limit) = request.param("limit") {
            options.limit = Some(
                limit
                    .parse::<usize>()
                    .map_err(|_| ApiError::bad_request("invalid limit"))?,
            );
        }
        options.continue_token = request.param("continue").map(str::to_string);
        options.resource_version = request.param("resourceVersion").map(str::to_string);
        Ok(options)
    }

    fn delete_preconditions(&self, request: &ApiRequest) -> Result<Preconditions, ApiError> {
        let mut preconditions = Preconditions::default();
        if !request.body.is_empty() {
            let options: Value = serde_json::from_slice(&request.body)
                .map_err(|err| ApiError::bad_request(format!("decoding DeleteOptions: {}", err)))?;
            if let Some(found) = options.get("preconditions") {
                preconditions.uid = found
                    .get("uid")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                preconditions.resource_version = found
                    .get("resourceVersion")
                    .and_then(Value::as_str)
                    .map(str::to_string);
            }
            // propagationPolicy is an opaque passthrough for the garbage
            // collector; nothing here consumes it
        }
        Ok(preconditions)
    }

    fn object_response(
        &self,
        code: u16,
        object: &Value,
        version: &ServingVersion,
        negotiated: Negotiated,
    ) -> ApiResponse {
        let payload = match negotiated.projection {
            Projection::None => object.clone(),
            Projection::PartialObjectMetadata => negotiation::to_partial_object_metadata(object),
            Projection::Table => negotiation::to_table(
                std::slice::from_ref(object),
                &version.columns,
                json!({}),
            ),
        };
        encode_response(code, &payload, negotiated.media)
    }

    fn storage_error(&self, err: StorageError, serving: &ServingInfo, name: &str) -> ApiError {
        match err {
            StorageError::NotFound(_) => ApiError::not_found(&serving.group_resource, name),
            StorageError::AlreadyExists(_) => {
                ApiError::already_exists(&serving.group_resource, name)
            }
            StorageError::Conflict(message) => {
                ApiError::conflict(&serving.group_resource, name, message)
            }
            other => other.into(),
        }
    }
}

fn scale_definition(
    version: &ServingVersion,
) -> Result<&crate::apiextensions::internal::CustomResourceSubresourceScale, ApiError> {
    version
        .subresources
        .as_ref()
        .and_then(|s| s.scale.as_ref())
        .ok_or_else(|| ApiError::internal("scale subresource not declared"))
}

fn wire_line(event: &crate::storage::WatchEvent) -> Vec<u8> {
    let mut line = serde_json::to_vec(&event.to_wire()).unwrap_or_default();
    line.push(b'\n');
    line
}

/// Copies (or removes) a top-level subtree from `source` into `target`.
fn copy_subtree(source: &Value, target: &mut Value, field: &str) {
    let Some(target_map) = target.as_object_mut() else {
        return;
    };
    match source.get(field) {
        Some(value) => {
            target_map.insert(field.to_string(), value.clone());
        }
        None => {
            target_map.remove(field);
        }
    }
}

/// The comparable desired state: everything except metadata (and status,
/// when it is its own subresource).
fn desired_state(object: &Value, exclude_status: bool) -> Value {
    let mut state = object.clone();
    if let Some(map) = state.as_object_mut() {
        map.remove("metadata");
        if exclude_status {
            map.remove("status");
        }
    }
    state
}

