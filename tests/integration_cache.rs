use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use reqflow::TransportFuture;
use reqflow::cache::CacheKey;
use reqflow::prelude::*;
use tokio::time::sleep;

/// Transport that answers `v1`, `v2`, ... and counts its calls.
fn versioned_transport(
    calls: Arc<AtomicUsize>,
) -> impl Fn(RequestDescriptor) -> TransportFuture + Send + Sync {
    move |_request: RequestDescriptor| -> TransportFuture {
        let calls = calls.clone();
        Box::pin(async move {
            let version = calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(ResponseEnvelope::new(
                StatusCode::OK,
                HeaderMap::new(),
                Bytes::from(format!("v{version}")),
            ))
        })
    }
}

#[tokio::test]
async fn cache_first_serves_fresh_entry_without_transport() {
    let calls = Arc::new(AtomicUsize::new(0));
    let client = HttpClient::builder(versioned_transport(calls.clone()))
        .base_url("https://api.example.com")
        .default_cache_strategy(CacheStrategy::CacheFirst)
        .default_cache_ttl(Duration::from_secs(60))
        .try_build()
        .expect("client should build");

    let first = client.get("/v1/items").send().await.expect("first dispatch");
    let second = client.get("/v1/items").send().await.expect("second dispatch");

    assert_eq!(first.text_lossy(), "v1");
    assert_eq!(second.text_lossy(), "v1");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(client.metrics_snapshot().cache_hits, 1);
}

#[tokio::test]
async fn cache_first_refetches_and_overwrites_after_ttl_expiry() {
    let calls = Arc::new(AtomicUsize::new(0));
    let client = HttpClient::builder(versioned_transport(calls.clone()))
        .base_url("https://api.example.com")
        .default_cache_strategy(CacheStrategy::CacheFirst)
        .default_cache_ttl(Duration::from_millis(20))
        .try_build()
        .expect("client should build");

    let first = client.get("/v1/items").send().await.expect("first dispatch");
    assert_eq!(first.text_lossy(), "v1");

    sleep(Duration::from_millis(60)).await;

    let second = client.get("/v1/items").send().await.expect("second dispatch");
    assert_eq!(second.text_lossy(), "v2");
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    // The refetch replaced the stale entry.
    let third = client.get("/v1/items").send().await.expect("third dispatch");
    assert_eq!(third.text_lossy(), "v2");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn cache_only_miss_is_a_not_found_error() {
    let calls = Arc::new(AtomicUsize::new(0));
    let client = HttpClient::builder(versioned_transport(calls.clone()))
        .base_url("https://api.example.com")
        .try_build()
        .expect("client should build");

    let error = client
        .get("/v1/items")
        .cache_strategy(CacheStrategy::CacheOnly)
        .send()
        .await
        .expect_err("dispatch should fail");
    assert_eq!(error.kind, ErrorKind::NotFound);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn cache_only_serves_stale_entries() {
    let calls = Arc::new(AtomicUsize::new(0));
    let client = HttpClient::builder(versioned_transport(calls.clone()))
        .base_url("https://api.example.com")
        .default_cache_ttl(Duration::from_millis(10))
        .try_build()
        .expect("client should build");

    client.get("/v1/items").send().await.expect("seed dispatch");
    sleep(Duration::from_millis(40)).await;

    // Stale is still better than nothing when the network is off the table.
    let cached = client
        .get("/v1/items")
        .cache_strategy(CacheStrategy::CacheOnly)
        .send()
        .await
        .expect("cache-only dispatch");
    assert_eq!(cached.text_lossy(), "v1");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn network_first_falls_back_to_cached_entry_on_failure() {
    let calls = Arc::new(AtomicUsize::new(0));
    let transport = {
        let calls = calls.clone();
        move |_request: RequestDescriptor| {
            let calls = calls.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Ok(ResponseEnvelope::new(
                        StatusCode::OK,
                        HeaderMap::new(),
                        Bytes::from_static(b"v1"),
                    ))
                } else {
                    Err(TransportFault::new(
                        TransportFaultCode::ConnectionRefused,
                        "upstream went away",
                    ))
                }
            }
        }
    };
    let client = HttpClient::builder(transport)
        .base_url("https://api.example.com")
        .default_cache_strategy(CacheStrategy::NetworkFirst)
        .retry_policy(RetryPolicy::disabled())
        .try_build()
        .expect("client should build");

    let fresh = client.get("/v1/items").send().await.expect("seed dispatch");
    assert_eq!(fresh.text_lossy(), "v1");

    let fallback = client
        .get("/v1/items")
        .send()
        .await
        .expect("fallback dispatch");
    assert_eq!(fallback.text_lossy(), "v1");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn network_only_never_reads_the_cache() {
    let calls = Arc::new(AtomicUsize::new(0));
    let client = HttpClient::builder(versioned_transport(calls.clone()))
        .base_url("https://api.example.com")
        .default_cache_ttl(Duration::from_secs(60))
        .try_build()
        .expect("client should build");

    client
        .get("/v1/items")
        .cache_strategy(CacheStrategy::CacheFirst)
        .send()
        .await
        .expect("seed dispatch");

    let response = client
        .get("/v1/items")
        .cache_strategy(CacheStrategy::NetworkOnly)
        .send()
        .await
        .expect("network-only dispatch");
    assert_eq!(response.text_lossy(), "v2");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn stale_while_revalidate_serves_stale_then_refreshes() {
    let calls = Arc::new(AtomicUsize::new(0));
    let client = HttpClient::builder(versioned_transport(calls.clone()))
        .base_url("https://api.example.com")
        .default_cache_ttl(Duration::from_secs(60))
        .try_build()
        .expect("client should build");

    client.get("/v1/items").send().await.expect("seed dispatch");

    let served = client
        .get("/v1/items")
        .cache_strategy(CacheStrategy::StaleWhileRevalidate)
        .send()
        .await
        .expect("swr dispatch");
    // The caller gets the cached value; the refresh runs behind it.
    assert_eq!(served.text_lossy(), "v1");

    let mut refreshed = String::new();
    for _ in 0..100 {
        sleep(Duration::from_millis(10)).await;
        let cached = client
            .get("/v1/items")
            .cache_strategy(CacheStrategy::CacheOnly)
            .send()
            .await
            .expect("cache-only dispatch");
        refreshed = cached.text_lossy();
        if refreshed == "v2" {
            break;
        }
    }
    assert_eq!(refreshed, "v2");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn query_order_does_not_split_cache_entries() {
    let calls = Arc::new(AtomicUsize::new(0));
    let client = HttpClient::builder(versioned_transport(calls.clone()))
        .base_url("https://api.example.com")
        .default_cache_strategy(CacheStrategy::CacheFirst)
        .try_build()
        .expect("client should build");

    client
        .get("/v1/items")
        .query_pair("page", "1")
        .query_pair("sort", "name")
        .send()
        .await
        .expect("first dispatch");
    client
        .get("/v1/items")
        .query_pair("sort", "name")
        .query_pair("page", "1")
        .send()
        .await
        .expect("second dispatch");

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn custom_cache_key_collapses_distinct_urls() {
    let calls = Arc::new(AtomicUsize::new(0));
    let client = HttpClient::builder(versioned_transport(calls.clone()))
        .base_url("https://api.example.com")
        .default_cache_strategy(CacheStrategy::CacheFirst)
        .try_build()
        .expect("client should build");

    for path in ["/v1/items/1", "/v1/items/2"] {
        let response = client
            .get(path)
            .cache_key(|_request| CacheKey::new("items"))
            .send()
            .await
            .expect("dispatch");
        assert_eq!(response.text_lossy(), "v1");
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn clear_cache_forces_a_refetch() {
    let calls = Arc::new(AtomicUsize::new(0));
    let client = HttpClient::builder(versioned_transport(calls.clone()))
        .base_url("https://api.example.com")
        .default_cache_strategy(CacheStrategy::CacheFirst)
        .try_build()
        .expect("client should build");

    client.get("/v1/items").send().await.expect("first dispatch");
    client.clear_cache();
    let response = client.get("/v1/items").send().await.expect("second dispatch");

    assert_eq!(response.text_lossy(), "v2");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
