//! Control API 集成测试
//!
//! 通过 `tower::ServiceExt::oneshot` 直接驱动 axum 路由，不监听端口

use axum::Router;
use axum::body::{Body, to_bytes};
use chrono::Utc;
use flare_allocator::api::{AppState, create_router};
use flare_allocator::registry::{InMemoryRegistry, SharedRegistry};
use flare_allocator::store::{HolePolicy, MemberSpec};
use flare_allocator::{
    AllocationEngine, AllocatorMetrics, ConfigStore, ControlApi, RegistryInstance,
    SelectionStrategy,
};
use http::{Request, StatusCode};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tower::ServiceExt;

struct Harness {
    router: Router,
    store: Arc<ConfigStore>,
}

fn harness(strict: bool) -> Harness {
    let store = Arc::new(ConfigStore::default());
    let metrics = Arc::new(AllocatorMetrics::new().unwrap());
    let registry: SharedRegistry = Arc::new(InMemoryRegistry::new());
    let engine = Arc::new(
        AllocationEngine::new(store.clone(), SelectionStrategy::WeightedRoundRobin)
            .with_metrics(metrics.clone()),
    );
    let control = Arc::new(
        ControlApi::new(store.clone())
            .with_strict_versioning(strict)
            .with_metrics(metrics.clone()),
    );
    let router = create_router(AppState {
        store: store.clone(),
        engine,
        control,
        registry,
        metrics,
    });
    Harness { router, store }
}

async fn send(
    router: &Router,
    method: &str,
    uri: &str,
    body: Option<String>,
) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(body.map(Body::from).unwrap_or_else(Body::empty))
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, value)
}

async fn post(router: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    send(router, "POST", uri, Some(body.to_string())).await
}

async fn seed_seven(router: &Router) {
    let members: Vec<Value> = (1..=7)
        .map(|i| json!({"IP": format!("10.0.0.{}:80", i), "Weight": 1.0}))
        .collect();
    let (status, body) = post(router, "/updateConfigMap", json!({ "helloServer": members })).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
}

/// 测试：全量替换返回新版本号
#[tokio::test]
async fn test_update_config_map() {
    let h = harness(false);
    let (status, body) = post(
        &h.router,
        "/updateConfigMap",
        json!({"svc": [
            {"IP": "10.0.0.1:80", "Weight": 0.8},
            {"IP": "10.0.0.2:80", "Weight": 0.2}
        ]}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"versions": {"svc": 1}}));

    let config = h.store.get("svc").unwrap();
    assert_eq!(config.members.len(), 2);
    assert_eq!(config.members[0].weight, 0.8);
}

/// 测试：缺少字段、未知字段和非法地址返回结构化错误
#[tokio::test]
async fn test_update_config_map_rejects_malformed_bodies() {
    let h = harness(false);

    let body = json!({"svc": [{"IP": "10.0.0.1:80"}]});
    let (status, body) = post(&h.router, "/updateConfigMap", body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "DESERIALIZATION_ERROR");
    assert!(body["timestamp"].is_number());

    let (status, body) = post(
        &h.router,
        "/updateConfigMap",
        json!({"svc": [{"IP": "10.0.0.1:80", "Weight": 1.0, "Group": 2}]}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "DESERIALIZATION_ERROR");

    let body = json!({"svc": [{"IP": "not-an-ip", "Weight": 1.0}]});
    let (status, body) = post(&h.router, "/updateConfigMap", body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_PARAMETER");

    let malformed = Some("{not json".to_string());
    let (status, _) = send(&h.router, "POST", "/updateConfigMap", malformed).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert!(h.store.names().is_empty());
}

/// 测试：分组大小之和不等于成员数时拒绝且配置不变
#[tokio::test]
async fn test_modify_group_validates_partition() {
    let h = harness(false);
    seed_seven(&h.router).await;

    let (status, body) = post(&h.router, "/modify-group", json!({"helloServer": [2, 2, 3]})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["versions"]["helloServer"], 2);

    let (status, body) = post(&h.router, "/modify-group", json!({"helloServer": [2, 2, 2]})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_PARTITION");
    assert_eq!(body["params"]["service"], "helloServer");

    let config = h.store.get("helloServer").unwrap();
    assert_eq!(config.group_sizes, vec![2, 2, 3]);
    assert_eq!(config.version, 2);
}

/// 测试：多服务请求中任一服务非法，整个请求不生效
#[tokio::test]
async fn test_multi_service_request_is_all_or_nothing() {
    let h = harness(false);
    post(
        &h.router,
        "/updateConfigMap",
        json!({
            "a": [{"IP": "10.0.0.1:80", "Weight": 1.0}, {"IP": "10.0.0.2:80", "Weight": 1.0}],
            "b": [{"IP": "10.0.1.1:80", "Weight": 1.0}]
        }),
    )
    .await;

    let (status, _) = post(&h.router, "/modify-group", json!({"a": [1, 1], "b": [2]})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(h.store.get("a").unwrap().group_sizes, vec![2]);
    assert_eq!(h.store.get("a").unwrap().version, 1);

    let (status, _) = post(&h.router, "/modify-group", json!({"a": [1, 1], "missing": [1]})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(h.store.get("a").unwrap().version, 1);
}

/// 测试：调和并发修改其中一个服务时，被拒绝的多服务请求不修改任何服务
#[test]
fn test_rejected_request_is_atomic_under_concurrent_reconcile() {
    let store = Arc::new(ConfigStore::default());
    let control = ControlApi::new(store.clone());

    let mut seed = BTreeMap::new();
    seed.insert(
        "a".to_string(),
        vec![MemberSpec::new("10.0.0.1:80", 1.0), MemberSpec::new("10.0.0.2:80", 1.0)],
    );
    seed.insert("b".to_string(), vec![MemberSpec::new("10.0.1.1:80", 1.0)]);
    control.replace_services(&seed, None).unwrap();

    let one = vec![RegistryInstance::new("b1", "10.0.1.1:80")];
    let two = vec![
        RegistryInstance::new("b1", "10.0.1.1:80"),
        RegistryInstance::new("b2", "10.0.1.2:80"),
    ];
    let policy = HolePolicy::new(Duration::ZERO);
    let stop = AtomicBool::new(false);

    std::thread::scope(|scope| {
        scope.spawn(|| {
            let mut flip = false;
            while !stop.load(Ordering::Acquire) {
                let observed = if flip { &one } else { &two };
                store.apply_membership("b", observed, &policy, Utc::now()).unwrap();
                flip = !flip;
            }
        });

        for i in 0..20_000 {
            let sizes = if i % 2 == 0 { vec![1, 1] } else { vec![2] };
            let mut request = BTreeMap::new();
            request.insert("a".to_string(), sizes);
            request.insert("b".to_string(), vec![1]);

            let before = store.get("a").unwrap().version;
            if control.resize_groups(&request, None).is_err() {
                assert_eq!(store.get("a").unwrap().version, before);
            }
        }
        stop.store(true, Ordering::Release);
    });

    let a = store.get("a").unwrap();
    assert_eq!(a.group_sizes.iter().sum::<usize>(), a.members.len());
}

/// 测试：裸整数修改全局块长度，对象形式修改单个服务
#[tokio::test]
async fn test_modify_block_length() {
    let h = harness(false);
    seed_seven(&h.router).await;

    let (status, body) = post(&h.router, "/modify-block-len", json!(4)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["versions"]["helloServer"], 2);
    assert_eq!(h.store.default_block_length(), 4);

    let (status, _) = post(&h.router, "/modify-block-len", json!({"helloServer": 8})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(h.store.get("helloServer").unwrap().block_length, 8);
    assert_eq!(h.store.default_block_length(), 4);

    for invalid in [json!(0), json!(-3), json!({"helloServer": 0})] {
        let (status, body) = post(&h.router, "/modify-block-len", invalid).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INVALID_PARAMETER");
    }
    assert_eq!(h.store.get("helloServer").unwrap().block_length, 8);
}

/// 测试：期望版本不一致返回 409
#[tokio::test]
async fn test_expected_version_conflict() {
    let h = harness(false);
    seed_seven(&h.router).await;

    let body = json!({"helloServer": [3, 4]});
    let (status, body) = post(&h.router, "/modify-group?version=7", body).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "VERSION_CONFLICT");
    assert_eq!(body["params"]["actual"], "1");

    let body = json!({"helloServer": [3, 4]});
    let (status, _) = post(&h.router, "/modify-group?version=1", body).await;
    assert_eq!(status, StatusCode::OK);

    // 期望版本只能用于单服务请求
    let body = json!({"helloServer": [7], "other": [1]});
    let (status, _) = post(&h.router, "/modify-group?version=2", body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let body = json!({"helloServer": [7]});
    let (status, body) = post(&h.router, "/modify-group?version=abc", body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "DESERIALIZATION_ERROR");
}

/// 测试：严格模式下必须携带期望版本
#[tokio::test]
async fn test_strict_versioning() {
    let h = harness(true);

    let body = json!({"svc": [{"IP": "10.0.0.1:80", "Weight": 1.0}]});
    let (status, _) = post(&h.router, "/updateConfigMap", body.clone()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = post(&h.router, "/updateConfigMap?version=0", body.clone()).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = post(&h.router, "/updateConfigMap?version=0", body).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "VERSION_CONFLICT");

    let (status, _) = post(&h.router, "/modify-block-len", json!(16)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(h.store.get("svc").unwrap().version, 1);
}

/// 测试：查询服务配置
#[tokio::test]
async fn test_svc_info() {
    let h = harness(false);
    seed_seven(&h.router).await;

    let (status, body) = send(&h.router, "GET", "/svc-info?name=helloServer", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "helloServer");
    assert_eq!(body["group_sizes"], json!([7]));
    assert_eq!(body["block_length"], 1024);
    assert_eq!(body["members"].as_array().unwrap().len(), 7);
    assert_eq!(body["members"][0]["health"]["state"], "healthy");

    let (status, body) = send(&h.router, "GET", "/svc-info?name=nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");

    let (status, _) = send(&h.router, "GET", "/svc-info", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

/// 测试：试算分配
#[tokio::test]
async fn test_select() {
    let h = harness(false);
    seed_seven(&h.router).await;
    post(&h.router, "/modify-group", json!({"helloServer": [2, 2, 3]})).await;

    let uri = "/select?service=helloServer&key=user-42";
    let (status, first) = send(&h.router, "GET", uri, None).await;
    assert_eq!(status, StatusCode::OK);
    let group = first["group"].as_u64().unwrap();
    assert!(group < 3);

    let (_, second) = send(&h.router, "GET", uri, None).await;
    assert_eq!(second["group"], first["group"]);

    let (status, body) = send(&h.router, "GET", "/select?service=missing&key=k", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");

    let (status, body) = send(&h.router, "GET", "/metrics", None).await;
    assert_eq!(status, StatusCode::OK);
    let text = body.as_str().unwrap();
    assert!(text.contains("allocator_selections_total"));
    assert!(text.contains("allocator_config_mutations_total"));
}

/// 测试：手动注册与注销
#[tokio::test]
async fn test_registry_endpoints() {
    let h = harness(false);

    let (status, body) = post(
        &h.router,
        "/registry/register",
        json!({"name": "helloServer", "address": "10.0.0.1:80"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let id = body["id"].as_str().unwrap().to_string();
    assert!(uuid::Uuid::parse_str(&id).is_ok());

    let (status, body) = post(
        &h.router,
        "/registry/register",
        json!({"name": "helloServer", "id": id, "address": "10.0.0.2:80"}),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "ALREADY_REGISTERED");

    let (status, _) = post(&h.router, "/registry/deregister", json!({ "id": id })).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = post(&h.router, "/registry/deregister", json!({ "id": id })).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_REGISTERED");
}

/// 测试：健康检查
#[tokio::test]
async fn test_health() {
    let h = harness(false);
    let (status, body) = send(&h.router, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["strategy"], "weighted_round_robin");
}
