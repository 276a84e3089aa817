//! End-to-end scenarios driven through the assembled server: admin surface,
//! controllers, dispatcher, storage and conversion working together.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use http::Method;
use serde_json::{Value, json};

use super::request::ResponseBody;
use super::{ApiRequest, ApiResponse, ExtensionServer, ServerConfig};
use crate::apiextensions::internal::CustomResourceDefinitionConditionType;
use crate::common::GroupResource;
use crate::conversion::{
    ConversionError, Converter, ConverterFactory, SafeConverter,
};
use crate::storage::MemoryBackend;
use crate::unstructured;

const CRD_PATH: &str = "/apis/apiextensions.k8s.io/v1/customresourcedefinitions";
const ESTABLISH_TIMEOUT: Duration = Duration::from_secs(10);

async fn start_server() -> Arc<ExtensionServer> {
    let server = ExtensionServer::new(Arc::new(MemoryBackend::new()), ServerConfig::default());
    server.start().await;
    server
}

fn widget_manifest(versions: Value) -> Value {
    json!({
        "apiVersion": "apiextensions.k8s.io/v1",
        "kind": "CustomResourceDefinition",
        "metadata": {"name": "widgets.example.com"},
        "spec": {
            "group": "example.com",
            "names": {"plural": "widgets", "singular": "widget", "kind": "Widget", "listKind": "WidgetList"},
            "scope": "Namespaced",
            "versions": versions
        }
    })
}

fn simple_versions(schema: Value) -> Value {
    json!([{
        "name": "v1",
        "served": true,
        "storage": true,
        "schema": {"openAPIV3Schema": schema}
    }])
}

async fn create_crd(server: &Arc<ExtensionServer>, manifest: Value) {
    let response = server
        .handle(ApiRequest::with_json(Method::POST, CRD_PATH, &manifest))
        .await;
    assert_eq!(response.code, 201, "{:?}", response.body_json());
    assert!(
        server
            .wait_established("widgets.example.com", ESTABLISH_TIMEOUT)
            .await,
        "CRD never became established"
    );
}

fn body(response: &ApiResponse) -> Value {
    response.body_json().expect("buffered body")
}

async fn watch_stream(server: &Arc<ExtensionServer>, path: &str) -> tokio::sync::mpsc::Receiver<Vec<u8>> {
    let response = server
        .handle(ApiRequest::new(Method::GET, path).with_query("watch", "true"))
        .await;
    assert_eq!(response.code, 200);
    match response.body {
        ResponseBody::Stream(rx) => rx,
        ResponseBody::Bytes(bytes) => {
            panic!("expected stream, got {:?}", String::from_utf8_lossy(&bytes))
        }
    }
}

async fn next_event(rx: &mut tokio::sync::mpsc::Receiver<Vec<u8>>) -> Value {
    let bytes = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("watch event timed out")
        .expect("watch stream closed");
    serde_json::from_slice(&bytes).expect("watch event is JSON")
}

// ============================================================================
// S1/S2: expression rules on create and update
// ============================================================================

#[tokio::test]
async fn test_create_rejected_by_rule() {
    let server = start_server().await;
    create_crd(
        &server,
        widget_manifest(simple_versions(json!({
            "type": "object",
            "properties": {
                "spec": {
                    "type": "object",
                    "properties": {
                        "replicas": {
                            "type": "integer",
                            "x-kubernetes-validations": [
                                {"rule": "self >= 0", "message": "replicas must be non-negative"}
                            ]
                        }
                    }
                }
            }
        }))),
    )
    .await;

    let response = server
        .handle(ApiRequest::with_json(
            Method::POST,
            "/apis/example.com/v1/namespaces/default/widgets",
            &json!({
                "apiVersion": "example.com/v1",
                "kind": "Widget",
                "metadata": {"name": "a"},
                "spec": {"replicas": -1}
            }),
        ))
        .await;

    assert_eq!(response.code, 422);
    let status = body(&response);
    assert_eq!(status["reason"], "Invalid");
    let cause = &status["details"]["causes"][0];
    assert_eq!(cause["field"], "spec.replicas");
    assert_eq!(cause["reason"], "FieldValueInvalid");
    assert!(
        cause["message"]
            .as_str()
            .unwrap()
            .contains("replicas must be non-negative")
    );

    // a conforming object is admitted
    let response = server
        .handle(ApiRequest::with_json(
            Method::POST,
            "/apis/example.com/v1/namespaces/default/widgets",
            &json!({
                "apiVersion": "example.com/v1",
                "kind": "Widget",
                "metadata": {"name": "a"},
                "spec": {"replicas": 1}
            }),
        ))
        .await;
    assert_eq!(response.code, 201, "{:?}", body(&response));
}

#[tokio::test]
async fn test_update_transition_rule() {
    let server = start_server().await;
    create_crd(
        &server,
        widget_manifest(simple_versions(json!({
            "type": "object",
            "properties": {
                "spec": {
                    "type": "object",
                    "properties": {
                        "replicas": {
                            "type": "integer",
                            "x-kubernetes-validations": [{
                                "rule": "!has(oldSelf) || self >= oldSelf",
                                "optionalOldSelf": true,
                                "message": "replicas cannot decrease"
                            }]
                        }
                    }
                }
            }
        }))),
    )
    .await;

    let path = "/apis/example.com/v1/namespaces/default/widgets";
    let created = server
        .handle(ApiRequest::with_json(
            Method::POST,
            path,
            &json!({
                "apiVersion": "example.com/v1",
                "kind": "Widget",
                "metadata": {"name": "a"},
                "spec": {"replicas": 3}
            }),
        ))
        .await;
    assert_eq!(created.code, 201, "{:?}", body(&created));

    // growth is fine
    let grow = server
        .handle(ApiRequest::with_json(
            Method::PUT,
            &format!("{}/a", path),
            &json!({
                "apiVersion": "example.com/v1",
                "kind": "Widget",
                "metadata": {"name": "a"},
                "spec": {"replicas": 5}
            }),
        ))
        .await;
    assert_eq!(grow.code, 200, "{:?}", body(&grow));

    // shrinking trips the transition rule
    let shrink = server
        .handle(ApiRequest::with_json(
            Method::PUT,
            &format!("{}/a", path),
            &json!({
                "apiVersion": "example.com/v1",
                "kind": "Widget",
                "metadata": {"name": "a"},
                "spec": {"replicas": 2}
            }),
        ))
        .await;
    assert_eq!(shrink.code, 422);
    let cause = &body(&shrink)["details"]["causes"][0];
    assert_eq!(cause["field"], "spec.replicas");
    assert!(
        cause["message"]
            .as_str()
            .unwrap()
            .contains("replicas cannot decrease")
    );
}

// ============================================================================
// S3: multi-version read through an injected conversion webhook
// ============================================================================

/// Renames spec.count (v1beta1) to spec.replicas (v1) and back.
struct RenamingConverter;

#[async_trait]
impl Converter for RenamingConverter {
    async fn convert(
        &self,
        mut objects: Vec<Value>,
        target: &str,
    ) -> Result<Vec<Value>, ConversionError> {
        for object in &mut objects {
            if let Some(spec) = object.get_mut("spec").and_then(Value::as_object_mut) {
                if target.ends_with("/v1") {
                    if let Some(count) = spec.remove("count") {
                        spec.insert("replicas".to_string(), count);
                    }
                } else if let Some(replicas) = spec.remove("replicas") {
                    spec.insert("count".to_string(), replicas);
                }
            }
            unstructured::set_api_version(object, target);
        }
        Ok(objects)
    }
}

struct RenamingConverterFactory;

impl ConverterFactory for RenamingConverterFactory {
    fn converter_for(
        &self,
        crd: &crate::apiextensions::internal::CustomResourceDefinition,
    ) -> Result<SafeConverter, ConversionError> {
        Ok(SafeConverter::new(
            GroupResource::new(&crd.spec.group, &crd.spec.names.plural),
            Arc::new(RenamingConverter),
        ))
    }
}

#[tokio::test]
async fn test_multi_version_read_with_conversion() {
    let server = ExtensionServer::with_converter_factory(
        Arc::new(MemoryBackend::new()),
        ServerConfig::default(),
        Arc::new(RenamingConverterFactory),
    );
    server.start().await;

    let mut manifest = widget_manifest(json!([
        {
            "name": "v1beta1",
            "served": true,
            "storage": false,
            "schema": {"openAPIV3Schema": {"type": "object", "properties": {
                "spec": {"type": "object", "properties": {"count": {"type": "integer"}}}
            }}}
        },
        {
            "name": "v1",
            "served": true,
            "storage": true,
            "schema": {"openAPIV3Schema": {"type": "object", "properties": {
                "spec": {"type": "object", "properties": {"replicas": {"type": "integer"}}}
            }}}
        }
    ]));
    manifest["spec"]["conversion"] = json!({
        "strategy": "Webhook",
        "webhook": {
            "clientConfig": {"url": "https://conversion.example.com/convert"},
            "conversionReviewVersions": ["v1"]
        }
    });
    create_crd(&server, manifest).await;

    let created = server
        .handle(ApiRequest::with_json(
            Method::POST,
            "/apis/example.com/v1beta1/namespaces/default/widgets",
            &json!({
                "apiVersion": "example.com/v1beta1",
                "kind": "Widget",
                "metadata": {"name": "a"},
                "spec": {"count": 5}
            }),
        ))
        .await;
    assert_eq!(created.code, 201, "{:?}", body(&created));
    let created = body(&created);
    assert_eq!(created["apiVersion"], "example.com/v1beta1");
    assert_eq!(created["spec"]["count"], 5);
    let uid = created["metadata"]["uid"].as_str().unwrap().to_string();
    let rv = created["metadata"]["resourceVersion"]
        .as_str()
        .unwrap()
        .to_string();

    let fetched = server
        .handle(ApiRequest::new(
            Method::GET,
            "/apis/example.com/v1/namespaces/default/widgets/a",
        ))
        .await;
    assert_eq!(fetched.code, 200);
    let fetched = body(&fetched);
    assert_eq!(fetched["apiVersion"], "example.com/v1");
    assert_eq!(fetched["spec"]["replicas"], 5);
    assert!(fetched["spec"].get("count").is_none());
    assert_eq!(fetched["metadata"]["uid"], uid.as_str());
    assert_eq!(fetched["metadata"]["resourceVersion"], rv.as_str());
}

// ============================================================================
// S4: serving-info swap under open watches
// ============================================================================

#[tokio::test]
async fn test_serving_swap_keeps_watches_alive() {
    let server = start_server().await;
    create_crd(
        &server,
        widget_manifest(simple_versions(json!({"type": "object", "properties": {
            "spec": {"type": "object", "properties": {"replicas": {"type": "integer"}}}
        }}))),
    )
    .await;

    let collection = "/apis/example.com/v1/namespaces/default/widgets";
    let mut watches = Vec::new();
    for _ in 0..10 {
        watches.push(watch_stream(&server, collection).await);
    }

    let first = server
        .handle(ApiRequest::with_json(
            Method::POST,
            collection,
            &json!({"apiVersion": "example.com/v1", "kind": "Widget",
                    "metadata": {"name": "w1"}, "spec": {"replicas": 1}}),
        ))
        .await;
    assert_eq!(first.code, 201);
    for rx in watches.iter_mut() {
        let event = next_event(rx).await;
        assert_eq!(event["type"], "ADDED");
        assert_eq!(event["object"]["metadata"]["name"], "w1");
    }

    // add a served v2 to the CRD through the admin surface
    let current = body(
        &server
            .handle(ApiRequest::new(
                Method::GET,
                &format!("{}/widgets.example.com", CRD_PATH),
            ))
            .await,
    );
    let mut updated = current.clone();
    updated["spec"]["versions"]
        .as_array_mut()
        .unwrap()
        .push(json!({
            "name": "v2",
            "served": true,
            "storage": false,
            "schema": {"openAPIV3Schema": {"type": "object", "properties": {
                "spec": {"type": "object", "properties": {"replicas": {"type": "integer"}}}
            }}}
        }));
    let put = server
        .handle(ApiRequest::with_json(
            Method::PUT,
            &format!("{}/widgets.example.com", CRD_PATH),
            &updated,
        ))
        .await;
    assert_eq!(put.code, 200, "{:?}", body(&put));

    // new requests against v2 succeed once the swap lands
    let deadline = tokio::time::Instant::now() + ESTABLISH_TIMEOUT;
    loop {
        let response = server
            .handle(ApiRequest::new(
                Method::GET,
                "/apis/example.com/v2/namespaces/default/widgets",
            ))
            .await;
        if response.code == 200 {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "v2 never became servable: {:?}",
            body(&response)
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // the watches opened before the swap keep delivering without reconnect
    let second = server
        .handle(ApiRequest::with_json(
            Method::POST,
            collection,
            &json!({"apiVersion": "example.com/v1", "kind": "Widget",
                    "metadata": {"name": "w2"}, "spec": {"replicas": 1}}),
        ))
        .await;
    assert_eq!(second.code, 201);
    for rx in watches.iter_mut() {
        let event = next_event(rx).await;
        assert_eq!(event["type"], "ADDED");
        assert_eq!(event["object"]["metadata"]["name"], "w2");
    }
}

// ============================================================================
// S5: finalizer cleanup
// ============================================================================

#[tokio::test]
async fn test_finalizer_cleanup_purges_instances_then_crd() {
    let server = start_server().await;
    create_crd(
        &server,
        widget_manifest(simple_versions(json!({"type": "object", "properties": {
            "spec": {"type": "object", "properties": {"replicas": {"type": "integer"}}}
        }}))),
    )
    .await;

    let collection = "/apis/example.com/v1/namespaces/default/widgets";
    for name in ["a", "b", "c"] {
        let response = server
            .handle(ApiRequest::with_json(
                Method::POST,
                collection,
                &json!({"apiVersion": "example.com/v1", "kind": "Widget",
                        "metadata": {"name": name}, "spec": {"replicas": 1}}),
            ))
            .await;
        assert_eq!(response.code, 201);
    }

    let deleted = server
        .handle(ApiRequest::new(
            Method::DELETE,
            &format!("{}/widgets.example.com", CRD_PATH),
        ))
        .await;
    assert_eq!(deleted.code, 200);

    // the finalizer controller purges all three instances, then the CRD
    let deadline = tokio::time::Instant::now() + ESTABLISH_TIMEOUT;
    while server.registry.get("widgets.example.com").is_some() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "CRD was never cleaned up"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // the type is gone from the request surface
    let response = server.handle(ApiRequest::new(Method::GET, collection)).await;
    assert_eq!(response.code, 404);

    // and no orphan instances survive in storage
    let store = crate::storage::ResourceStore::new(
        server.registry.backend(),
        "example.com",
        "widgets",
        false,
    );
    let listed = store
        .list(None, &crate::storage::ListOptions::default())
        .await
        .unwrap();
    assert!(listed.items.is_empty());
}

// ============================================================================
// S6: protected-group approval
// ============================================================================

#[tokio::test]
async fn test_protected_group_approval_flow() {
    let server = start_server().await;
    let manifest = json!({
        "apiVersion": "apiextensions.k8s.io/v1",
        "kind": "CustomResourceDefinition",
        "metadata": {"name": "foos.foo.k8s.io"},
        "spec": {
            "group": "foo.k8s.io",
            "names": {"plural": "foos", "singular": "foo", "kind": "Foo", "listKind": "FooList"},
            "scope": "Namespaced",
            "versions": [{"name": "v1", "served": true, "storage": true,
                          "schema": {"openAPIV3Schema": {"type": "object"}}}]
        }
    });
    let response = server
        .handle(ApiRequest::with_json(Method::POST, CRD_PATH, &manifest))
        .await;
    assert_eq!(response.code, 201);
    assert!(server.wait_established("foos.foo.k8s.io", ESTABLISH_TIMEOUT).await);

    // nonconformant, but still established and serving
    let deadline = tokio::time::Instant::now() + ESTABLISH_TIMEOUT;
    loop {
        let crd = server.registry.get("foos.foo.k8s.io").unwrap();
        if let Some(condition) = crd.find_condition(
            CustomResourceDefinitionConditionType::KubernetesAPIApprovalPolicyConformant,
        ) {
            assert_eq!(condition.reason, "MissingAnnotation");
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "condition never set");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let list = server
        .handle(ApiRequest::new(Method::GET, "/apis/foo.k8s.io/v1/namespaces/default/foos"))
        .await;
    assert_eq!(list.code, 200);

    // adding a URL annotation flips the condition
    let mut updated = body(
        &server
            .handle(ApiRequest::new(Method::GET, &format!("{}/foos.foo.k8s.io", CRD_PATH)))
            .await,
    );
    updated["metadata"]["annotations"] = json!({
        "api-approved.kubernetes.io": "https://github.com/kubernetes/kubernetes/pull/78458"
    });
    let put = server
        .handle(ApiRequest::with_json(
            Method::PUT,
            &format!("{}/foos.foo.k8s.io", CRD_PATH),
            &updated,
        ))
        .await;
    assert_eq!(put.code, 200, "{:?}", body(&put));

    let deadline = tokio::time::Instant::now() + ESTABLISH_TIMEOUT;
    loop {
        let crd = server.registry.get("foos.foo.k8s.io").unwrap();
        if crd.is_condition_true(
            CustomResourceDefinitionConditionType::KubernetesAPIApprovalPolicyConformant,
        ) {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "condition never flipped");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// ============================================================================
// Pipeline behaviors
// ============================================================================

#[tokio::test]
async fn test_create_applies_defaults_and_prunes() {
    let server = start_server().await;
    create_crd(
        &server,
        widget_manifest(simple_versions(json!({"type": "object", "properties": {
            "spec": {"type": "object", "properties": {
                "replicas": {"type": "integer", "default": 1},
                "mode": {"type": "string", "default": "auto"}
            }}
        }}))),
    )
    .await;

    let response = server
        .handle(ApiRequest::with_json(
            Method::POST,
            "/apis/example.com/v1/namespaces/default/widgets",
            &json!({"apiVersion": "example.com/v1", "kind": "Widget",
                    "metadata": {"name": "a"},
                    "spec": {"unknown": true}}),
        ))
        .await;
    assert_eq!(response.code, 201, "{:?}", body(&response));
    let created = body(&response);
    assert_eq!(created["spec"]["replicas"], 1);
    assert_eq!(created["spec"]["mode"], "auto");
    assert!(created["spec"].get("unknown").is_none(), "unknown fields are pruned");
    assert!(!created["metadata"]["uid"].as_str().unwrap().is_empty());
    assert_eq!(created["metadata"]["generation"], 1);
}

#[tokio::test]
async fn test_status_subresource_scopes_and_generation() {
    let server = start_server().await;
    let mut manifest = widget_manifest(simple_versions(json!({"type": "object", "properties": {
        "spec": {"type": "object", "properties": {"replicas": {"type": "integer"}}},
        "status": {"type": "object", "properties": {"ready": {"type": "integer"}}}
    }})));
    manifest["spec"]["versions"][0]["subresources"] = json!({"status": {}});
    create_crd(&server, manifest).await;

    let path = "/apis/example.com/v1/namespaces/default/widgets";
    let created = body(
        &server
            .handle(ApiRequest::with_json(
                Method::POST,
                path,
                &json!({"apiVersion": "example.com/v1", "kind": "Widget",
                        "metadata": {"name": "a"}, "spec": {"replicas": 1}}),
            ))
            .await,
    );
    assert_eq!(created["metadata"]["generation"], 1);

    // a main-scope write cannot smuggle status in
    let mut with_status = created.clone();
    with_status["spec"]["replicas"] = json!(2);
    with_status["status"] = json!({"ready": 9});
    let updated = body(
        &server
            .handle(ApiRequest::with_json(
                Method::PUT,
                &format!("{}/a", path),
                &with_status,
            ))
            .await,
    );
    assert_eq!(updated["metadata"]["generation"], 2, "spec change bumps generation");
    assert!(updated.get("status").is_none(), "main scope must not write status");

    // the status scope writes status without touching generation
    let mut status_write = updated.clone();
    status_write["status"] = json!({"ready": 1});
    let response = server
        .handle(ApiRequest::with_json(
            Method::PUT,
            &format!("{}/a/status", path),
            &status_write,
        ))
        .await;
    assert_eq!(response.code, 200, "{:?}", body(&response));
    let after_status = body(&response);
    assert_eq!(after_status["status"]["ready"], 1);
    assert_eq!(after_status["metadata"]["generation"], 2);

    // and the status scope cannot change spec
    let mut sneaky = after_status.clone();
    sneaky["spec"]["replicas"] = json!(77);
    sneaky["status"] = json!({"ready": 2});
    let after_sneaky = body(
        &server
            .handle(ApiRequest::with_json(
                Method::PUT,
                &format!("{}/a/status", path),
                &sneaky,
            ))
            .await,
    );
    assert_eq!(after_sneaky["spec"]["replicas"], 2);
    assert_eq!(after_sneaky["status"]["ready"], 2);
}

#[tokio::test]
async fn test_optimistic_concurrency_conflict() {
    let server = start_server().await;
    create_crd(
        &server,
        widget_manifest(simple_versions(json!({"type": "object", "properties": {
            "spec": {"type": "object", "properties": {"replicas": {"type": "integer"}}}
        }}))),
    )
    .await;

    let path = "/apis/example.com/v1/namespaces/default/widgets";
    let created = body(
        &server
            .handle(ApiRequest::with_json(
                Method::POST,
                path,
                &json!({"apiVersion": "example.com/v1", "kind": "Widget",
                        "metadata": {"name": "a"}, "spec": {"replicas": 1}}),
            ))
            .await,
    );
    let stale_rv = created["metadata"]["resourceVersion"].as_str().unwrap();

    let mut first = created.clone();
    first["spec"]["replicas"] = json!(2);
    let winner = server
        .handle(ApiRequest::with_json(Method::PUT, &format!("{}/a", path), &first))
        .await;
    assert_eq!(winner.code, 200);

    // same resourceVersion again: exactly one writer wins
    let mut second = created.clone();
    second["spec"]["replicas"] = json!(3);
    second["metadata"]["resourceVersion"] = json!(stale_rv);
    let loser = server
        .handle(ApiRequest::with_json(Method::PUT, &format!("{}/a", path), &second))
        .await;
    assert_eq!(loser.code, 409);
    assert_eq!(body(&loser)["reason"], "Conflict");
}

#[tokio::test]
async fn test_deprecated_version_warning_header() {
    let server = start_server().await;
    create_crd(
        &server,
        widget_manifest(json!([
            {
                "name": "v1beta1",
                "served": true,
                "storage": false,
                "deprecated": true,
                "deprecationWarning": "example.com/v1beta1 Widget is deprecated; use example.com/v1",
                "schema": {"openAPIV3Schema": {"type": "object"}}
            },
            {
                "name": "v1",
                "served": true,
                "storage": true,
                "schema": {"openAPIV3Schema": {"type": "object"}}
            }
        ])),
    )
    .await;

    let response = server
        .handle(ApiRequest::new(
            Method::GET,
            "/apis/example.com/v1beta1/namespaces/default/widgets",
        ))
        .await;
    assert_eq!(response.code, 200);
    let warning = response
        .headers
        .iter()
        .find(|(name, _)| name == "warning")
        .map(|(_, value)| value.clone())
        .expect("deprecated version must warn");
    assert!(warning.contains("299"));
    assert!(warning.contains("is deprecated; use example.com/v1"));

    let fresh = server
        .handle(ApiRequest::new(
            Method::GET,
            "/apis/example.com/v1/namespaces/default/widgets",
        ))
        .await;
    assert!(fresh.headers.iter().all(|(name, _)| name != "warning"));
}

#[tokio::test]
async fn test_scale_subresource_projection() {
    let server = start_server().await;
    let mut manifest = widget_manifest(simple_versions(json!({"type": "object", "properties": {
        "spec": {"type": "object", "properties": {"replicas": {"type": "integer"}}},
        "status": {"type": "object", "properties": {"replicas": {"type": "integer"}}}
    }})));
    manifest["spec"]["versions"][0]["subresources"] = json!({
        "status": {},
        "scale": {"specReplicasPath": ".spec.replicas", "statusReplicasPath": ".status.replicas"}
    });
    create_crd(&server, manifest).await;

    let path = "/apis/example.com/v1/namespaces/default/widgets";
    server
        .handle(ApiRequest::with_json(
            Method::POST,
            path,
            &json!({"apiVersion": "example.com/v1", "kind": "Widget",
                    "metadata": {"name": "a"}, "spec": {"replicas": 2}}),
        ))
        .await;

    let scale = body(
        &server
            .handle(ApiRequest::new(Method::GET, &format!("{}/a/scale", path)))
            .await,
    );
    assert_eq!(scale["kind"], "Scale");
    assert_eq!(scale["spec"]["replicas"], 2);

    let mut desired = scale.clone();
    desired["spec"]["replicas"] = json!(5);
    let response = server
        .handle(ApiRequest::with_json(
            Method::PUT,
            &format!("{}/a/scale", path),
            &desired,
        ))
        .await;
    assert_eq!(response.code, 200, "{:?}", body(&response));
    assert_eq!(body(&response)["spec"]["replicas"], 5);

    let object = body(
        &server
            .handle(ApiRequest::new(Method::GET, &format!("{}/a", path)))
            .await,
    );
    assert_eq!(object["spec"]["replicas"], 5);
}

#[tokio::test]
async fn test_stored_versions_grow_and_shrink_via_status() {
    let server = start_server().await;
    create_crd(
        &server,
        widget_manifest(simple_versions(json!({"type": "object"}))),
    )
    .await;

    // flip storage to a new version v2
    let current = body(
        &server
            .handle(ApiRequest::new(Method::GET, &format!("{}/widgets.example.com", CRD_PATH)))
            .await,
    );
    let mut updated = current.clone();
    updated["spec"]["versions"] = json!([
        {"name": "v1", "served": true, "storage": false,
         "schema": {"openAPIV3Schema": {"type": "object"}}},
        {"name": "v2", "served": true, "storage": true,
         "schema": {"openAPIV3Schema": {"type": "object"}}}
    ]);
    let put = server
        .handle(ApiRequest::with_json(
            Method::PUT,
            &format!("{}/widgets.example.com", CRD_PATH),
            &updated,
        ))
        .await;
    assert_eq!(put.code, 200, "{:?}", body(&put));
    let after = body(&put);
    assert_eq!(after["status"]["storedVersions"], json!(["v1", "v2"]));

    // after migration an administrator drops v1 through the status
    // subresource
    let mut status_update = after.clone();
    status_update["status"]["storedVersions"] = json!(["v2"]);
    let response = server
        .handle(ApiRequest::with_json(
            Method::PUT,
            &format!("{}/widgets.example.com/status", CRD_PATH),
            &status_update,
        ))
        .await;
    assert_eq!(response.code, 200, "{:?}", body(&response));
    assert_eq!(body(&response)["status"]["storedVersions"], json!(["v2"]));
}

#[tokio::test]
async fn test_discovery_and_openapi_publication() {
    let server = start_server().await;
    create_crd(
        &server,
        widget_manifest(simple_versions(json!({"type": "object"}))),
    )
    .await;

    // the discovery controller republishes asynchronously
    let deadline = tokio::time::Instant::now() + ESTABLISH_TIMEOUT;
    loop {
        let groups = body(&server.handle(ApiRequest::new(Method::GET, "/apis")).await);
        let found = groups["groups"]
            .as_array()
            .unwrap()
            .iter()
            .any(|g| g["name"] == "example.com");
        if found {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "group never published");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let group = body(
        &server
            .handle(ApiRequest::new(Method::GET, "/apis/example.com"))
            .await,
    );
    assert_eq!(group["preferredVersion"]["version"], "v1");

    let resources = body(
        &server
            .handle(ApiRequest::new(Method::GET, "/apis/example.com/v1"))
            .await,
    );
    let widget = resources["resources"]
        .as_array()
        .unwrap()
        .iter()
        .find(|r| r["name"] == "widgets")
        .expect("widgets resource listed");
    assert_eq!(widget["kind"], "Widget");
    assert!(!widget["storageVersionHash"].as_str().unwrap().is_empty());

    let aggregated = body(
        &server
            .handle(ApiRequest::new(Method::GET, "/apis").with_header(
                "accept",
                "application/json;g=apidiscovery.k8s.io;v=v2;as=APIGroupDiscoveryList",
            ))
            .await,
    );
    assert_eq!(aggregated["kind"], "APIGroupDiscoveryList");

    let deadline = tokio::time::Instant::now() + ESTABLISH_TIMEOUT;
    loop {
        let openapi = body(&server.handle(ApiRequest::new(Method::GET, "/openapi/v2")).await);
        if openapi["definitions"].get("com.example.v1.Widget").is_some() {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "schema never published");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_yaml_negotiation_round_trip() {
    let server = start_server().await;
    create_crd(
        &server,
        widget_manifest(simple_versions(json!({"type": "object", "properties": {
            "spec": {"type": "object", "properties": {"replicas": {"type": "integer"}}}
        }}))),
    )
    .await;

    let yaml_body = concat!(
        "apiVersion: example.com/v1\n",
        "kind: Widget\n",
        "metadata:\n",
        "  name: a\n",
        "spec:\n",
        "  replicas: 2\n",
    );
    let mut request = ApiRequest::new(
        Method::POST,
        "/apis/example.com/v1/namespaces/default/widgets",
    )
    .with_header("content-type", "application/yaml")
    .with_header("accept", "application/yaml");
    request.body = yaml_body.as_bytes().to_vec();

    let response = server.handle(request).await;
    assert_eq!(response.code, 201);
    match response.body {
        ResponseBody::Bytes(bytes) => {
            let text = String::from_utf8_lossy(&bytes);
            assert!(text.contains("kind: Widget"), "{}", text);
            assert!(text.contains("replicas: 2"), "{}", text);
        }
        ResponseBody::Stream(_) => panic!("expected buffered body"),
    }

    // protobuf stays rejected for custom resources
    let rejected = server
        .handle(
            ApiRequest::new(
                Method::GET,
                "/apis/example.com/v1/namespaces/default/widgets",
            )
            .with_header("accept", "application/vnd.kubernetes.protobuf"),
        )
        .await;
    assert_eq!(rejected.code, 406);
}

#[tokio::test]
async fn test_unknown_resource_falls_through_to_delegate() {
    struct Teapot;
    #[async_trait]
    impl super::DelegateHandler for Teapot {
        async fn handle(&self, _request: ApiRequest) -> ApiResponse {
            ApiResponse::json(418, &json!({"delegated": true}))
        }
    }

    let mut config = ServerConfig::default();
    config.delegate = Some(Arc::new(Teapot));
    let server = ExtensionServer::new(Arc::new(MemoryBackend::new()), config);
    server.start().await;

    let response = server
        .handle(ApiRequest::new(
            Method::GET,
            "/apis/unknown.io/v1/namespaces/default/things",
        ))
        .await;
    assert_eq!(response.code, 418);
    assert_eq!(body(&response)["delegated"], true);
}
