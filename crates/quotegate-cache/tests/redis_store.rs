//! Integration tests for the Redis store.
//!
//! Tests use testcontainers to spin up a real Redis instance.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use quotegate_cache::{CacheManager, KeyType, KvStore, RedisConfig, TtlPolicy, connect_store};
use quotegate_core::{FixedClock, OperationError};
use serde::{Deserialize, Serialize};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::redis::Redis;
use tokio::sync::OnceCell;

static SHARED_REDIS: OnceCell<(ContainerAsync<Redis>, String)> = OnceCell::const_new();

async fn get_redis_url() -> String {
    let (_, url) = SHARED_REDIS
        .get_or_init(|| async {
            let container = Redis::default()
                .start()
                .await
                .expect("start redis container");

            let host_port = container.get_host_port_ipv4(6379).await.expect("get port");
            let url = format!("redis://127.0.0.1:{}", host_port);

            (container, url)
        })
        .await;

    url.clone()
}

async fn redis_store() -> Arc<dyn KvStore> {
    let config = RedisConfig {
        enabled: true,
        url: get_redis_url().await,
        pool_size: 4,
        timeout_ms: 5000,
    };
    let store = connect_store(&config).await;
    assert_eq!(store.mode(), "redis");
    store
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Bar {
    close: f64,
}
quotegate_cache::register_type!(Bar, "Bar");

#[derive(Serialize)]
struct Args<'a> {
    symbol: &'a str,
}

#[tokio::test]
async fn test_redis_scalar_set_get_ttl() {
    let store = redis_store().await;

    store
        .set_ex("it:scalar", b"value", Duration::from_secs(60))
        .await
        .unwrap();

    assert_eq!(store.get("it:scalar").await.unwrap(), Some(b"value".to_vec()));
    assert_eq!(store.key_type("it:scalar").await.unwrap(), KeyType::String);

    let ttl = store.ttl("it:scalar").await.unwrap().unwrap();
    assert!(ttl <= Duration::from_secs(60) && ttl >= Duration::from_secs(58));

    store.delete("it:scalar").await.unwrap();
    assert!(!store.exists("it:scalar").await.unwrap());
    assert_eq!(store.ttl("it:scalar").await.unwrap(), None);
}

#[tokio::test]
async fn test_redis_list_push_range() {
    let store = redis_store().await;
    store.delete("it:list").await.unwrap();

    store
        .rpush("it:list", &[b"a".to_vec(), b"b".to_vec()])
        .await
        .unwrap();
    store.rpush("it:list", &[b"c".to_vec()]).await.unwrap();
    assert!(store.expire("it:list", Duration::from_secs(30)).await.unwrap());

    assert_eq!(store.key_type("it:list").await.unwrap(), KeyType::List);
    assert_eq!(
        store.lrange("it:list").await.unwrap(),
        vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]
    );
    assert!(!store.expire("it:missing", Duration::from_secs(30)).await.unwrap());
}

#[tokio::test]
async fn test_redis_replace_list_is_not_appended() {
    let store = redis_store().await;
    store.set_ex("it:replace", b"scalar", Duration::from_secs(60)).await.unwrap();

    store
        .replace_list("it:replace", &[b"a".to_vec(), b"b".to_vec()], Duration::from_secs(30))
        .await
        .unwrap();
    store
        .replace_list("it:replace", &[b"c".to_vec()], Duration::from_secs(30))
        .await
        .unwrap();

    assert_eq!(store.key_type("it:replace").await.unwrap(), KeyType::List);
    assert_eq!(store.lrange("it:replace").await.unwrap(), vec![b"c".to_vec()]);
    let ttl = store.ttl("it:replace").await.unwrap().unwrap();
    assert!(ttl <= Duration::from_secs(30) && ttl >= Duration::from_secs(28));
}

#[tokio::test]
async fn test_cache_manager_over_redis() {
    let store = redis_store().await;
    let manager = CacheManager::new(Arc::clone(&store), Arc::new(FixedClock::new(false)), "it");
    let calls = &AtomicUsize::new(0);
    let policy = TtlPolicy::from_secs(60, 600);

    for _ in 0..2 {
        let bars: Vec<Bar> = manager
            .cached("history", &Args { symbol: "AAPL" }, policy, move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, OperationError>(vec![Bar { close: 1.0 }, Bar { close: 2.0 }])
            })
            .await
            .unwrap();
        assert_eq!(bars, vec![Bar { close: 1.0 }, Bar { close: 2.0 }]);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let key = manager.key_for("history", &Args { symbol: "AAPL" }).unwrap();
    assert_eq!(store.key_type(key.as_str()).await.unwrap(), KeyType::List);
    let ttl = store.ttl(key.as_str()).await.unwrap().unwrap();
    assert!(ttl > Duration::from_secs(60));
}
