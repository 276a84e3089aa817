//! The request-serving layer: request model, error taxonomy, negotiation,
//! admission seam, patch machinery, serving-info snapshot, the dynamic
//! dispatcher, the admin surface, and the facade wiring them to discovery
//! and OpenAPI publication.

pub mod admin;
pub mod admission;
pub mod config;
pub mod error;
pub mod handler;
pub mod negotiation;
pub mod patch;
pub mod request;
#[cfg(test)]
mod scenario_tests;
pub mod serving;

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::apiextensions::internal::CustomResourceDefinitionConditionType;
use crate::apiextensions::v1 as apiextensions_v1;
use crate::conversion::{ConverterFactory, StandardConverterFactory};
use crate::discovery::{
    APIGroup, APIResource, APIResourceList, DiscoveryPublisher, GroupVersionForDiscovery,
};
use crate::openapi::OpenApiPublisher;
use crate::registry::CrdRegistry;
use crate::storage::Backend;

pub use admission::{AdmissionAttributes, AdmissionChain, NoopAdmission, Operation};
pub use config::{AuthInfoResolver, DelegateHandler, ServerConfig};
pub use error::{ApiError, ErrorKind};
pub use handler::CrdHandler;
pub use request::{ApiRequest, ApiResponse, RequestInfo, ResponseBody, Verb, parse_request_info};
pub use serving::{ServingInfo, ServingSnapshot};

use admin::AdminHandler;
use negotiation::{MediaType, encode_error, negotiate_output};
use request::parse_request_info as parse_info;

/// The assembled extension server core: registry, dispatcher, admin
/// surface, discovery and OpenAPI publication. The network listener in
/// front of it is external; requests enter as resolved tuples.
pub struct ExtensionServer {
    /// The CRD observation bus.
    pub registry: Arc<CrdRegistry>,
    /// The dynamic dispatcher.
    pub handler: Arc<CrdHandler>,
    /// The published type catalogs.
    pub discovery: Arc<DiscoveryPublisher>,
    /// The published OpenAPI documents.
    pub openapi: Arc<OpenApiPublisher>,
    admin: AdminHandler,
    config: Arc<ServerConfig>,
    cancel: CancellationToken,
}

impl ExtensionServer {
    /// Builds a server with the production converter factory.
    pub fn new(backend: Arc<dyn Backend>, config: ServerConfig) -> Arc<ExtensionServer> {
        let factory: Arc<dyn ConverterFactory> = Arc::new(StandardConverterFactory {
            resolver: config.service_resolver.clone(),
            auth_info_resolver: config.auth_info_resolver.clone(),
            webhook_timeout: config.webhook_timeout,
        });
        Self::with_converter_factory(backend, config, factory)
    }

    /// Builds a server with an injected converter factory (tests supply
    /// in-process converters this way).
    pub fn with_converter_factory(
        backend: Arc<dyn Backend>,
        config: ServerConfig,
        converter_factory: Arc<dyn ConverterFactory>,
    ) -> Arc<ExtensionServer> {
        let config = Arc::new(config);
        let registry = CrdRegistry::new(backend.clone());
        let handler = CrdHandler::new(
            registry.clone(),
            backend,
            config.clone(),
            converter_factory,
        );
        Arc::new(ExtensionServer {
            admin: AdminHandler::new(registry.clone()),
            discovery: DiscoveryPublisher::new(),
            openapi: OpenApiPublisher::new(),
            registry,
            handler,
            config,
            cancel: CancellationToken::new(),
        })
    }

    /// The backend the server was built over.
    pub fn config(&self) -> &Arc<ServerConfig> {
        &self.config
    }

    /// Spawns the informer, the dispatcher's reconfiguration loop and all
    /// seven controllers, then waits for the initial CRD sync.
    pub async fn start(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        use crate::controller::{
            approval::ApprovalController, discovery::DiscoveryController,
            establishing::EstablishingController, finalizer::FinalizerController,
            naming::NamingController, nonstructural::NonStructuralSchemaController,
            openapi::SchemaPublicationController,
        };

        let mut handles = Vec::new();
        handles.push(tokio::spawn({
            let registry = self.registry.clone();
            let cancel = self.cancel.clone();
            async move { registry.run(cancel).await }
        }));
        while !self.registry.is_synced() {
            tokio::task::yield_now().await;
        }

        handles.push(tokio::spawn({
            let handler = self.handler.clone();
            let cancel = self.cancel.clone();
            async move { handler.run(cancel).await }
        }));

        let backend = self.registry.backend();
        handles.extend(NamingController::new(self.registry.clone()).spawn(self.cancel.clone()));
        handles.extend(
            NonStructuralSchemaController::new(self.registry.clone(), self.config.clone())
                .spawn(self.cancel.clone()),
        );
        handles.extend(ApprovalController::new(self.registry.clone()).spawn(self.cancel.clone()));
        handles.extend(
            EstablishingController::new(
                self.registry.clone(),
                self.handler.clone(),
                self.config.clone(),
            )
            .spawn(self.cancel.clone()),
        );
        handles.extend(
            FinalizerController::new(self.registry.clone(), backend).spawn(self.cancel.clone()),
        );
        handles.extend(
            DiscoveryController::new(self.registry.clone(), self.discovery.clone())
                .spawn(self.cancel.clone()),
        );
        handles.extend(
            SchemaPublicationController::new(self.registry.clone(), self.openapi.clone())
                .spawn(self.cancel.clone()),
        );
        handles
    }

    /// Stops every spawned task.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Routes a resolved request to discovery, OpenAPI, the admin surface or
    /// the dynamic dispatcher.
    pub async fn handle(&self, request: ApiRequest) -> ApiResponse {
        let segments: Vec<&str> = request.path.split('/').filter(|s| !s.is_empty()).collect();

        match segments.as_slice() {
            ["openapi", "v2"] => {
                return ApiResponse::json(200, &self.openapi.v2_document());
            }
            ["openapi", "v3"] => {
                return ApiResponse::json(200, &self.openapi.v3_index());
            }
            ["openapi", "v3", "apis", group] => {
                return match self.openapi.v3_group(group) {
                    Some(doc) => ApiResponse::json(200, &doc),
                    None => encode_error(
                        &ApiError::not_found_path(&request.path),
                        MediaType::Json,
                    ),
                };
            }
            ["apis"] => return self.serve_group_list(&request),
            ["apis", group] => return self.serve_group(&request, group),
            ["apis", group, version] => return self.serve_resource_list(&request, group, version),
            ["apis", "apiextensions.k8s.io", "v1", "customresourcedefinitions", ..] => {
                return self.serve_admin(request).await;
            }
            _ => {}
        }

        self.handler.handle(request).await
    }

    async fn serve_admin(&self, request: ApiRequest) -> ApiResponse {
        let negotiated = match negotiate_output(request.header("accept")) {
            Ok(n) => n,
            Err(err) => return encode_error(&err, MediaType::Json),
        };
        let info = match parse_info(&request.method, &request.path, &request.query) {
            Ok(info) => info,
            Err(err) => return encode_error(&err, negotiated.media),
        };
        if info.verb == Verb::Watch {
            return match self.admin.handle(&request, &info, negotiated).await {
                Ok(response) => response,
                Err(err) => encode_error(&err, negotiated.media),
            };
        }
        let work = self.admin.handle(&request, &info, negotiated);
        match tokio::time::timeout(self.config.request_timeout, work).await {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => encode_error(&err, negotiated.media),
            Err(_) => encode_error(
                &ApiError::timeout("the request did not complete within the allowed duration"),
                negotiated.media,
            ),
        }
    }

    fn wants_aggregated(&self, request: &ApiRequest) -> bool {
        request
            .header("accept")
            .map(|accept| {
                accept.contains(crate::discovery::AGGREGATED_DISCOVERY_PARAM)
                    && accept.contains("as=APIGroupDiscoveryList")
            })
            .unwrap_or(false)
    }

    fn serve_group_list(&self, request: &ApiRequest) -> ApiResponse {
        if self.wants_aggregated(request) {
            return ApiResponse::json(200, &self.discovery.aggregated());
        }
        let mut groups = self.discovery.groups();
        groups.groups.insert(0, admin_api_group());
        ApiResponse::json(200, &groups)
    }

    fn serve_group(&self, request: &ApiRequest, group: &str) -> ApiResponse {
        if group == apiextensions_v1::GROUP {
            return ApiResponse::json(200, &admin_api_group());
        }
        match self.discovery.group(group) {
            Some(doc) => ApiResponse::json(200, &doc),
            None => encode_error(&ApiError::not_found_path(&request.path), MediaType::Json),
        }
    }

    fn serve_resource_list(&self, request: &ApiRequest, group: &str, version: &str) -> ApiResponse {
        if group == apiextensions_v1::GROUP && version == apiextensions_v1::VERSION {
            return ApiResponse::json(200, &admin_resource_list());
        }
        match self.discovery.resources(group, version) {
            Some(doc) => ApiResponse::json(200, &doc),
            None => encode_error(&ApiError::not_found_path(&request.path), MediaType::Json),
        }
    }

    /// Test and bootstrap helper: waits until the named CRD reports
    /// Established.
    pub async fn wait_established(&self, name: &str, timeout: std::time::Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(crd) = self.registry.get(name) {
                if crd.is_condition_true(CustomResourceDefinitionConditionType::Established) {
                    return true;
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }
}

fn admin_api_group() -> APIGroup {
    APIGroup {
        type_meta: crate::common::TypeMeta::new("v1", "APIGroup"),
        name: apiextensions_v1::GROUP.to_string(),
        versions: vec![GroupVersionForDiscovery {
            group_version: apiextensions_v1::API_VERSION.to_string(),
            version: apiextensions_v1::VERSION.to_string(),
        }],
        preferred_version: Some(GroupVersionForDiscovery {
            group_version: apiextensions_v1::API_VERSION.to_string(),
            version: apiextensions_v1::VERSION.to_string(),
        }),
    }
}

fn admin_resource_list() -> APIResourceList {
    APIResourceList {
        type_meta: crate::common::TypeMeta::new("v1", "APIResourceList"),
        group_version: apiextensions_v1::API_VERSION.to_string(),
        resources: vec![
            APIResource {
                name: "customresourcedefinitions".to_string(),
                singular_name: "customresourcedefinition".to_string(),
                namespaced: false,
                kind: "CustomResourceDefinition".to_string(),
                verbs: [
                    "create", "delete", "get", "list", "patch", "update", "watch",
                ]
                .iter()
                .map(|s| s.to_string())
                .collect(),
                short_names: vec!["crd".to_string(), "crds".to_string()],
                ..Default::default()
            },
            APIResource {
                name: "customresourcedefinitions/status".to_string(),
                namespaced: false,
                kind: "CustomResourceDefinition".to_string(),
                verbs: ["get", "patch", "update"].iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            },
        ],
    }
}
