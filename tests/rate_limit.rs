//! Rate limiter behavior under concurrent callers sharing one SQLite file.

mod common;

use common::test_config;
use exopedia::config::RateLimitConfig;
use exopedia::ratelimit::RateLimiter;
use exopedia::{db, migrate};
use std::sync::Arc;
use tempfile::TempDir;

async fn file_limiter(tmp: &TempDir, max_requests: u32) -> Arc<RateLimiter> {
    let config = test_config(tmp.path());
    let pool = db::connect(&config).await.unwrap();
    migrate::apply(&pool).await.unwrap();
    Arc::new(RateLimiter::new(
        pool,
        &RateLimitConfig {
            max_requests,
            window_minutes: 5,
        },
    ))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_clients_are_all_admitted() {
    let tmp = TempDir::new().unwrap();
    let limiter = file_limiter(&tmp, 1000).await;

    for round in 0..20 {
        let mut handles = Vec::new();
        for i in 0..8 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                let client = format!("198.51.100.{}", round * 8 + i);
                limiter.check_and_record(&client, "create").await
            }));
        }
        for handle in handles {
            let allowed = handle.await.unwrap().unwrap();
            assert!(allowed, "round {} refused a client under the limit", round);
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_burst_from_one_client_stops_at_limit() {
    let tmp = TempDir::new().unwrap();
    let limiter = file_limiter(&tmp, 5).await;

    let mut handles = Vec::new();
    for _ in 0..24 {
        let limiter = limiter.clone();
        handles.push(tokio::spawn(async move {
            limiter.check_and_record("203.0.113.50", "create").await
        }));
    }

    let mut admitted = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap() {
            admitted += 1;
        }
    }
    assert_eq!(admitted, 5);

    assert!(limiter.check_and_record("203.0.113.51", "create").await.unwrap());
}
