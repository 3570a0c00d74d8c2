//! 缓存系统集成测试
//!
//! 覆盖基本读写、TTL过期、LRU淘汰、统计口径与引擎层的
//! 适配器直通缓存

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use transflow::config::CacheConfig;
use transflow::engine::{EngineDependencies, OrchestrationEngine};
use transflow::storage::cache::{fingerprint, AiCallCache};
use transflow::storage::repository::MemorySegmentRepository;

mod common;

use common::{fast_engine_config, init_tracing, test_credentials, MockAiAdapter};

fn cache(enabled: bool, capacity: usize, ttl: Duration) -> AiCallCache {
    init_tracing();
    AiCallCache::new(
        &CacheConfig {
            enabled,
            capacity,
            default_ttl: ttl,
        },
        None,
    )
}

#[tokio::test]
async fn basic_set_get_delete_cycle() {
    let cache = cache(true, 16, Duration::from_secs(60));
    let key = fingerprint::translation_key("gpt-4o", "en", "zh", "hello", "{}");

    assert!(cache.get(&key).await.is_none());

    cache.set(key.clone(), json!("你好"), None).await;
    assert_eq!(cache.get(&key).await, Some(json!("你好")));
    assert!(cache.has(&key).await);

    assert!(cache.delete(&key).await);
    assert!(cache.get(&key).await.is_none());
}

#[tokio::test]
async fn entries_expire_after_ttl() {
    let cache = cache(true, 16, Duration::from_secs(60));
    let key = "short-lived".to_string();

    cache
        .set(key.clone(), json!(1), Some(Duration::from_millis(30)))
        .await;
    assert!(cache.get(&key).await.is_some());

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(cache.get(&key).await.is_none());
    assert_eq!(cache.stats().await.expired, 1);
}

#[tokio::test]
async fn lru_eviction_respects_recency() {
    let cache = cache(true, 2, Duration::from_secs(60));

    cache.set("a".to_string(), json!(1), None).await;
    cache.set("b".to_string(), json!(2), None).await;
    // 触碰a，使b成为淘汰候选
    assert!(cache.get("a").await.is_some());
    cache.set("c".to_string(), json!(3), None).await;

    assert!(cache.has("a").await);
    assert!(!cache.has("b").await);
    assert!(cache.has("c").await);
    assert_eq!(cache.len().await, 2);
}

#[tokio::test]
async fn stats_track_hits_and_misses() {
    let cache = cache(true, 16, Duration::from_secs(60));

    cache.set("k".to_string(), json!("v"), None).await;
    let _ = cache.get("k").await;
    let _ = cache.get("k").await;
    let _ = cache.get("absent").await;

    let stats = cache.stats().await;
    assert_eq!(stats.hits, 2);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.sets, 1);
    assert!((stats.hit_rate() - 2.0 / 3.0).abs() < 1e-9);
}

#[tokio::test]
async fn clear_empties_and_counts_evictions() {
    let cache = cache(true, 16, Duration::from_secs(60));
    cache.set("a".to_string(), json!(1), None).await;
    cache.set("b".to_string(), json!(2), None).await;

    cache.clear().await;

    assert!(cache.is_empty().await);
    assert_eq!(cache.stats().await.evictions_by_clear, 2);
}

#[tokio::test]
async fn disabled_cache_never_stores() {
    let cache = cache(false, 16, Duration::from_secs(60));

    cache.set("k".to_string(), json!("v"), None).await;
    assert!(cache.get("k").await.is_none());
    assert!(!cache.is_enabled());
}

#[tokio::test]
async fn engine_caches_api_key_validation() {
    init_tracing();
    let adapter = Arc::new(MockAiAdapter::new());
    let engine = OrchestrationEngine::new(
        fast_engine_config(),
        EngineDependencies {
            adapter: adapter.clone(),
            repository: Arc::new(MemorySegmentRepository::new()),
            credentials: test_credentials(),
            notifier: None,
            templates: None,
            terminology: None,
        },
    );

    for _ in 0..3 {
        let valid = engine
            .validate_api_key()
            .await
            .expect("validation should succeed");
        assert!(valid);
    }

    // 同一提供商的重复验证走缓存
    assert_eq!(adapter.validate_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn engine_caches_model_listing() {
    init_tracing();
    let adapter = Arc::new(MockAiAdapter::new());
    let engine = OrchestrationEngine::new(
        fast_engine_config(),
        EngineDependencies {
            adapter: adapter.clone(),
            repository: Arc::new(MemorySegmentRepository::new()),
            credentials: test_credentials(),
            notifier: None,
            templates: None,
            terminology: None,
        },
    );

    let first = engine.available_models().await.expect("models");
    let second = engine.available_models().await.expect("models");

    assert_eq!(first.len(), 1);
    assert_eq!(second[0].id, "mock-model");
    assert_eq!(adapter.models_calls.load(Ordering::SeqCst), 1);

    // 清空缓存后重新触达适配器
    engine.clear_cache().await;
    engine.available_models().await.expect("models");
    assert_eq!(adapter.models_calls.load(Ordering::SeqCst), 2);
}
