//! Cache, coalescing and degradation behaviour against wiremock origins.

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
    response::Response,
};
use futures_util::future::join_all;
use http_body_util::BodyExt;
use serde_json::{Value, json};
use serde_json::value::RawValue;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};
use storefront_edge::cache::{CacheEntry, CacheError, CacheKey, CacheStore, MemoryStore};
use storefront_edge::config::{CacheStoreType, Config};
use storefront_edge::request::ProductRecommendationRequest;
use storefront_edge::server::build_router;
use storefront_edge::server::state::AppState;
use tower::ServiceExt;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PRODUCT_QUERY: &str = "shop=s.myshopify.com&productId=123&type=cart";

fn test_config(origin: &str) -> Config {
    Config {
        port: 0,
        is_dev: true,
        origin_url: origin.to_string(),
        think_origin_url: origin.to_string(),
        protected_origin_hosts: Vec::new(),
        upstream_auth_token: None,
        cache_store: CacheStoreType::Memory,
        valkey_url: None,
        cache_key_prefix: "edge:cache".to_string(),
        origin_timeout_ms: Some(500),
        strict_internal_errors: true,
    }
}

/// Router over an inspectable in-memory store.
fn app(config: Config) -> (Router, MemoryStore, AppState) {
    let store = MemoryStore::new();
    let state = AppState::new(config, Arc::new(store.clone())).unwrap();
    (build_router(state.clone()), store, state)
}

fn product_get() -> Request<Body> {
    Request::builder()
        .uri(format!("/api/v2/recommendation/product?{PRODUCT_QUERY}"))
        .body(Body::empty())
        .unwrap()
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(resp: Response) -> Value {
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

fn x_cache(resp: &Response) -> &str {
    resp.headers()["x-cache"].to_str().unwrap()
}

fn entry(payload: &str, age: Duration) -> CacheEntry {
    CacheEntry {
        payload: RawValue::from_string(payload.to_string()).unwrap(),
        written_at: SystemTime::now() - age,
        etag: "\"seeded\"".to_string(),
    }
}

fn product_key() -> CacheKey {
    ProductRecommendationRequest::from_query(Some(PRODUCT_QUERY))
        .unwrap()
        .cache_key()
}

// ── MISS / HIT ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn miss_then_hit() {
    let origin = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v2/recommendation/product"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"products": []})))
        .expect(1)
        .mount(&origin)
        .await;

    let (app, store, state) = app(test_config(&origin.uri()));

    let first = app.clone().oneshot(product_get()).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(x_cache(&first), "MISS");
    assert_eq!(first.headers()["content-type"], "application/json");
    assert!(first.headers().contains_key("etag"));
    assert_eq!(body_json(first).await, json!({"products": []}));

    state.gateway.drain().await;
    assert_eq!(store.len(), 1);
    assert!(store.get(&product_key()).await.unwrap().is_some());

    let second = app.oneshot(product_get()).await.unwrap();
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(x_cache(&second), "HIT");
    assert_eq!(body_json(second).await, json!({"products": []}));
}

#[tokio::test]
async fn equivalent_queries_share_one_entry() {
    let origin = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v2/recommendation/product"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"products": [1]})))
        .expect(1)
        .mount(&origin)
        .await;

    let (app, _store, state) = app(test_config(&origin.uri()));

    let uri = "/api/v2/recommendation/product?shop=S.myshopify.com&productId=1&type=cart&excludeProductIds=3,1,2";
    let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
    assert_eq!(x_cache(&app.clone().oneshot(req).await.unwrap()), "MISS");
    state.gateway.drain().await;

    let uri = "/api/v2/recommendation/product?type=cart&excludeProductIds=2,3,1&productId=1&shop=s.myshopify.com";
    let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
    assert_eq!(x_cache(&app.oneshot(req).await.unwrap()), "HIT");
}

#[tokio::test]
async fn fresh_seeded_entry_is_served_without_origin_call() {
    let origin = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"products": ["new"]})))
        .expect(0)
        .mount(&origin)
        .await;

    let (app, store, _state) = app(test_config(&origin.uri()));
    store
        .put(
            &product_key(),
            &entry(r#"{"products":["cached"]}"#, Duration::from_secs(60)),
            Duration::from_secs(3600),
        )
        .await
        .unwrap();

    let resp = app.oneshot(product_get()).await.unwrap();
    assert_eq!(x_cache(&resp), "HIT");
    assert_eq!(resp.headers()["etag"], "\"seeded\"");
    assert_eq!(body_json(resp).await, json!({"products": ["cached"]}));
}

#[tokio::test]
async fn aged_hit_advertises_remaining_freshness() {
    let origin = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"products": []})))
        .expect(1)
        .mount(&origin)
        .await;

    let (app, store, state) = app(test_config(&origin.uri()));
    store
        .put(
            &product_key(),
            &entry(r#"{"products":[]}"#, Duration::from_secs(3590)),
            Duration::from_secs(7200),
        )
        .await
        .unwrap();

    let hit = app.clone().oneshot(product_get()).await.unwrap();
    assert_eq!(x_cache(&hit), "HIT");
    let max_age: u64 = hit.headers()["cache-control"]
        .to_str()
        .unwrap()
        .strip_prefix("public, max-age=")
        .unwrap()
        .parse()
        .unwrap();
    assert!(max_age <= 10, "max-age={max_age}");

    // A freshly fetched response gets the whole window
    let other = Request::builder()
        .uri("/api/v2/recommendation/product?shop=s.myshopify.com&productId=456&type=cart")
        .body(Body::empty())
        .unwrap();
    let miss = app.oneshot(other).await.unwrap();
    assert_eq!(x_cache(&miss), "MISS");
    assert_eq!(miss.headers()["cache-control"], "public, max-age=3600");
    state.gateway.drain().await;
}

#[tokio::test]
async fn matching_if_none_match_returns_304() {
    let origin = MockServer::start().await;
    let (app, store, _state) = app(test_config(&origin.uri()));
    store
        .put(
            &product_key(),
            &entry(r#"{"products":[]}"#, Duration::ZERO),
            Duration::from_secs(3600),
        )
        .await
        .unwrap();

    let req = Request::builder()
        .uri(format!("/api/v2/recommendation/product?{PRODUCT_QUERY}"))
        .header("if-none-match", "\"seeded\"")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_MODIFIED);
    assert_eq!(x_cache(&resp), "HIT");
}

// ── Coalescing ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn concurrent_misses_make_one_origin_call() {
    let origin = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v2/recommendation/cart"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"products": [7, 8]}))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&origin)
        .await;

    let (app, store, state) = app(test_config(&origin.uri()));

    let requests = (0..10).map(|i| {
        // Same cart, submitted in different product orders
        let products = if i % 2 == 0 { json!([1, 2]) } else { json!([2, 1]) };
        let body = json!({"shop": "s.myshopify.com", "type": "cart", "products": products});
        app.clone().oneshot(post("/api/v2/recommendation/cart", body))
    });
    let responses = join_all(requests).await;

    for resp in responses {
        let resp = resp.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(x_cache(&resp), "MISS");
        assert_eq!(body_json(resp).await, json!({"products": [7, 8]}));
    }

    assert_eq!(state.gateway.in_flight(), 0);
    state.gateway.drain().await;
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn different_keys_are_not_coalesced() {
    let origin = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v2/funnel/upsell"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"offers": []}))
                .set_delay(Duration::from_millis(100)),
        )
        .expect(2)
        .mount(&origin)
        .await;

    let (app, _store, _state) = app(test_config(&origin.uri()));

    let a = post(
        "/api/v2/funnel/upsell",
        json!({"shop": "s.myshopify.com", "type": "upsell", "productId": "1"}),
    );
    let b = post(
        "/api/v2/funnel/upsell",
        json!({"shop": "s.myshopify.com", "type": "downsell", "productId": "1"}),
    );
    let (a, b) = tokio::join!(app.clone().oneshot(a), app.oneshot(b));
    assert_eq!(a.unwrap().status(), StatusCode::OK);
    assert_eq!(b.unwrap().status(), StatusCode::OK);
}

// ── Degradation ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn origin_failure_serves_stale_entry() {
    let origin = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&origin)
        .await;

    let (app, store, _state) = app(test_config(&origin.uri()));
    // Older than the 1h freshness window, younger than the 24h hard TTL
    store
        .put(
            &product_key(),
            &entry(r#"{"products":["old"]}"#, Duration::from_secs(2 * 3600)),
            Duration::from_secs(3600),
        )
        .await
        .unwrap();

    let resp = app.oneshot(product_get()).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(x_cache(&resp), "STALE");
    assert_eq!(resp.headers()["cache-control"], "no-cache");
    assert_eq!(body_json(resp).await, json!({"products": ["old"]}));
}

#[tokio::test]
async fn stale_entry_is_refreshed_when_origin_recovers() {
    let origin = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"products": ["new"]})))
        .expect(1)
        .mount(&origin)
        .await;

    let (app, store, state) = app(test_config(&origin.uri()));
    store
        .put(
            &product_key(),
            &entry(r#"{"products":["old"]}"#, Duration::from_secs(2 * 3600)),
            Duration::from_secs(3600),
        )
        .await
        .unwrap();

    let resp = app.oneshot(product_get()).await.unwrap();
    assert_eq!(x_cache(&resp), "MISS");
    assert_eq!(body_json(resp).await, json!({"products": ["new"]}));

    state.gateway.drain().await;
    let refreshed = store.get(&product_key()).await.unwrap().unwrap();
    assert_eq!(refreshed.payload.get(), r#"{"products":["new"]}"#);
}

#[tokio::test]
async fn origin_error_without_fallback_is_503() {
    let origin = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&origin)
        .await;

    let (app, store, state) = app(test_config(&origin.uri()));

    let resp = app.oneshot(product_get()).await.unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(resp).await["error"], "Origin returned an error");

    state.gateway.drain().await;
    assert!(store.is_empty(), "failed fetches must not be cached");
}

#[tokio::test]
async fn origin_timeout_is_reported_distinctly() {
    let origin = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"products": []}))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&origin)
        .await;

    let mut config = test_config(&origin.uri());
    config.origin_timeout_ms = Some(100);
    let (app, _store, _state) = app(config);

    let resp = app.oneshot(product_get()).await.unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(resp).await["error"], "Origin request timed out");
}

/// Store that fails every operation.
struct BrokenStore;

#[async_trait]
impl CacheStore for BrokenStore {
    async fn get(&self, _key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
        Err(CacheError::Read("connection refused".to_string()))
    }

    async fn put(
        &self,
        _key: &CacheKey,
        _entry: &CacheEntry,
        _ttl: Duration,
    ) -> Result<(), CacheError> {
        Err(CacheError::Write("connection refused".to_string()))
    }

    async fn delete(&self, _key: &CacheKey) -> Result<(), CacheError> {
        Err(CacheError::Write("connection refused".to_string()))
    }

    fn kind(&self) -> &'static str {
        "broken"
    }
}

#[tokio::test]
async fn failing_cache_store_never_fails_requests() {
    let origin = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"products": []})))
        .expect(2)
        .mount(&origin)
        .await;

    let state = AppState::new(test_config(&origin.uri()), Arc::new(BrokenStore)).unwrap();
    let app = build_router(state.clone());

    for _ in 0..2 {
        let resp = app.clone().oneshot(product_get()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(x_cache(&resp), "MISS");
        state.gateway.drain().await;
    }
}

// ── Storefront actions ──────────────────────────────────────────────────────

/// Memory store that counts reads and writes.
#[derive(Default)]
struct CountingStore {
    inner: MemoryStore,
    gets: AtomicUsize,
    puts: AtomicUsize,
}

#[async_trait]
impl CacheStore for CountingStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(key).await
    }

    async fn put(&self, key: &CacheKey, entry: &CacheEntry, ttl: Duration) -> Result<(), CacheError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.inner.put(key, entry, ttl).await
    }

    async fn delete(&self, key: &CacheKey) -> Result<(), CacheError> {
        self.inner.delete(key).await
    }

    fn kind(&self) -> &'static str {
        "counting"
    }
}

#[tokio::test]
async fn cart_actions_bypass_cache_and_coalescer() {
    let origin = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/storefront"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"applied": true}))
                .set_delay(Duration::from_millis(100)),
        )
        .expect(2)
        .mount(&origin)
        .await;

    let store = Arc::new(CountingStore::default());
    let state = AppState::new(test_config(&origin.uri()), store.clone()).unwrap();
    let app = build_router(state.clone());
    let body = json!({
        "shop": "s.myshopify.com",
        "cart": {"items": [{"variant_id": 1, "quantity": 1}]},
        "actionType": "add_free_gift",
    });

    // Two identical concurrent actions both reach the origin
    let (a, b) = tokio::join!(
        app.clone().oneshot(post("/api/storefront", body.clone())),
        app.clone().oneshot(post("/api/storefront", body.clone())),
    );
    for resp in [a.unwrap(), b.unwrap()] {
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(x_cache(&resp), "BYPASS");
        assert_eq!(resp.headers()["cache-control"], "no-store");
    }

    state.gateway.drain().await;
    assert_eq!(store.gets.load(Ordering::SeqCst), 0);
    assert_eq!(store.puts.load(Ordering::SeqCst), 0);
    assert!(store.inner.is_empty());
}

#[tokio::test]
async fn cart_action_failure_is_never_masked_by_stale_data() {
    let origin = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/storefront"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"rules": []})))
        .up_to_n_times(1)
        .mount(&origin)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/storefront"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&origin)
        .await;

    let (app, _store, state) = app(test_config(&origin.uri()));
    let cart = json!({"items": [{"variant_id": 1, "quantity": 1}]});

    let read = post("/api/storefront", json!({"shop": "s.myshopify.com", "cart": cart}));
    assert_eq!(x_cache(&app.clone().oneshot(read).await.unwrap()), "MISS");
    state.gateway.drain().await;

    let action = post(
        "/api/storefront",
        json!({"shop": "s.myshopify.com", "cart": cart, "actionType": "remove"}),
    );
    let resp = app.oneshot(action).await.unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(x_cache(&resp), "BYPASS");
}

#[tokio::test]
async fn storefront_reads_are_cached() {
    let origin = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/storefront"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"rules": []})))
        .expect(1)
        .mount(&origin)
        .await;

    let (app, _store, state) = app(test_config(&origin.uri()));

    let first = post(
        "/api/storefront",
        json!({"shop": "s.myshopify.com", "cart": {"items": [{"id": 1}, {"id": 2}]}}),
    );
    let resp = app.clone().oneshot(first).await.unwrap();
    assert_eq!(x_cache(&resp), "MISS");
    assert_eq!(resp.headers()["cache-control"], "public, max-age=300");
    state.gateway.drain().await;

    let reordered = post(
        "/api/storefront",
        json!({"cart": {"items": [{"id": 2}, {"id": 1}]}, "shop": "s.myshopify.com"}),
    );
    assert_eq!(x_cache(&app.oneshot(reordered).await.unwrap()), "HIT");
}

// ── Origin routing and auth ─────────────────────────────────────────────────

#[tokio::test]
async fn handle_requests_go_to_think_origin() {
    let primary = MockServer::start().await;
    let think = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/recommendations/handle/s.myshopify.com/blue-shirt"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"handles": ["red-shirt"]})))
        .expect(1)
        .mount(&think)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&primary)
        .await;

    let mut config = test_config(&primary.uri());
    config.think_origin_url = think.uri();
    let (app, _store, _state) = app(config);

    let req = Request::builder()
        .uri("/recommendations/handle/S.myshopify.com/Blue-Shirt")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["cache-control"], "public, max-age=600");
    assert_eq!(body_json(resp).await, json!({"handles": ["red-shirt"]}));
}

#[tokio::test]
async fn protected_origin_receives_upstream_auth() {
    let origin = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v2/funnel/upsell"))
        .and(header("authorization", "Bearer edge-secret"))
        .and(header("x-edge-endpoint", "upsell_funnel"))
        .and(header("x-shop-domain", "s.myshopify.com"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"offers": []})))
        .expect(1)
        .mount(&origin)
        .await;

    let mut config = test_config(&origin.uri());
    config.protected_origin_hosts = vec!["127.0.0.1".to_string()];
    config.upstream_auth_token = Some("edge-secret".to_string());
    let (app, _store, _state) = app(config);

    let req = post(
        "/api/v2/funnel/upsell",
        json!({"shop": "s.myshopify.com", "type": "upsell", "items": [{"productId": 1}]}),
    );
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn handle_origin_never_receives_upstream_auth() {
    let origin = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"handles": []})))
        .expect(1)
        .mount(&origin)
        .await;

    let mut config = test_config(&origin.uri());
    config.protected_origin_hosts = vec!["127.0.0.1".to_string()];
    config.upstream_auth_token = Some("edge-secret".to_string());
    let (app, _store, _state) = app(config);

    let req = Request::builder()
        .uri("/recommendations/handle/s.myshopify.com/shirt")
        .body(Body::empty())
        .unwrap();
    assert_eq!(app.oneshot(req).await.unwrap().status(), StatusCode::OK);

    let received = origin.received_requests().await.unwrap();
    assert!(!received[0].headers.contains_key("authorization"));
}

#[tokio::test]
async fn origin_etag_is_forwarded() {
    let origin = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("etag", "\"origin-v7\"")
                .set_body_json(json!({"products": []})),
        )
        .mount(&origin)
        .await;

    let (app, _store, _state) = app(test_config(&origin.uri()));
    let resp = app.oneshot(product_get()).await.unwrap();
    assert_eq!(resp.headers()["etag"], "\"origin-v7\"");
}
