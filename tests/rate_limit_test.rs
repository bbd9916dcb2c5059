//! Integration tests for the global limiter and per-route rate rules.

mod common;

use common::*;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::time::{Duration, Instant};

#[tokio::test]
async fn test_global_limit_per_ip() {
    let server = TestServer::start_with(|config| {
        config.rate_limit.global_max = 3;
    })
    .await;

    for _ in 0..3 {
        let response = server
            .client()
            .get(server.url("/"))
            .header("X-Forwarded-For", "10.0.0.1")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = server
        .client()
        .get(server.url("/"))
        .header("X-Forwarded-For", "10.0.0.1")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key("retry-after"));
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["message"], "global_rate_limit_exceeded");
    assert!(body["data"]["retry_after"].is_string());

    // Another caller has its own quota
    let response = server
        .client()
        .get(server.url("/"))
        .header("X-Forwarded-For", "10.0.0.2")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_global_limit_disabled() {
    let server = TestServer::start_with(|config| {
        config.rate_limit.enabled = false;
        config.rate_limit.global_max = 1;
    })
    .await;

    for _ in 0..3 {
        let response = server.client().get(server.url("/")).send().await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}

#[tokio::test]
async fn test_login_progressive_delay() {
    let server = TestServer::start().await;

    for _ in 0..4 {
        let started = Instant::now();
        let response = server
            .post("/api/auth/login")
            .header("X-Forwarded-For", "5.6.7.8")
            .json(&json!({ "id_token": "bad" }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    let started = Instant::now();
    let response = server
        .post("/api/auth/login")
        .header("X-Forwarded-For", "5.6.7.8")
        .json(&json!({ "id_token": "bad" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(started.elapsed() >= Duration::from_secs(2));
}

#[tokio::test]
async fn test_verify_email_quota() {
    let server = TestServer::start().await;

    for _ in 0..3 {
        let response = server
            .post("/api/auth/protected/verify-email")
            .header("X-Forwarded-For", "7.7.7.7")
            .bearer_auth(USER_TOKEN)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    // The quota is checked before authentication
    let response = server
        .post("/api/auth/protected/verify-email")
        .header("X-Forwarded-For", "7.7.7.7")
        .bearer_auth("forged")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let body: Value = response.json().await.unwrap();
    assert_eq!(
        body["message"],
        "You have reached the request limit. Please try again later."
    );
}

#[tokio::test]
async fn test_concurrent_requests_respect_quota() {
    let server = TestServer::start().await;

    let requests = (0..20).map(|_| {
        server
            .post("/api/auth/protected/verify-email")
            .header("X-Forwarded-For", "8.8.4.4")
            .bearer_auth(USER_TOKEN)
            .send()
    });
    let responses = futures::future::join_all(requests).await;

    let passed = responses
        .into_iter()
        .map(|r| r.unwrap().status())
        .filter(|status| *status != StatusCode::TOO_MANY_REQUESTS)
        .count();
    assert_eq!(passed, 3);
}

#[tokio::test]
async fn test_change_password_block() {
    let server = TestServer::start().await;

    for _ in 0..10 {
        let response = server
            .post("/api/auth/protected/change-password")
            .header("X-Forwarded-For", "1.2.3.4")
            .bearer_auth(USER_TOKEN)
            .json(&json!({ "new_password": "N3w!Secret", "confirm_password": "mismatch" }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    let response = server
        .post("/api/auth/protected/change-password")
        .header("X-Forwarded-For", "1.2.3.4")
        .bearer_auth(USER_TOKEN)
        .json(&json!({ "new_password": "N3w!Secret", "confirm_password": "N3w!Secret" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()["retry-after"], "1800");

    let body: Value = response.json().await.unwrap();
    assert_eq!(
        body["message"],
        "Too many attempts. Please try again after 30m0s."
    );
    assert_eq!(body["data"]["block_duration"], 1_800_000_000_000u64);
}

#[tokio::test]
async fn test_logout_resets_counters() {
    let server = TestServer::start().await;

    for _ in 0..3 {
        server
            .post("/api/auth/protected/verify-email")
            .header("X-Forwarded-For", "9.9.9.9")
            .bearer_auth(USER_TOKEN)
            .send()
            .await
            .unwrap();
    }

    let response = server
        .post("/api/user/protected/logout")
        .header("X-Forwarded-For", "9.9.9.9")
        .bearer_auth(USER_TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = server
        .post("/api/auth/protected/verify-email")
        .header("X-Forwarded-For", "9.9.9.9")
        .bearer_auth(USER_TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_failed_logout_keeps_counters() {
    let server = TestServer::start().await;

    for _ in 0..3 {
        server
            .post("/api/auth/protected/verify-email")
            .header("X-Forwarded-For", "9.9.9.8")
            .bearer_auth(USER_TOKEN)
            .send()
            .await
            .unwrap();
    }

    server.store.reject_revocations();
    let response = server
        .post("/api/user/protected/logout")
        .header("X-Forwarded-For", "9.9.9.8")
        .bearer_auth(USER_TOKEN)
        .send()
        .await
        .unwrap();
    assert!(response.status().is_server_error());

    let response = server
        .post("/api/auth/protected/verify-email")
        .header("X-Forwarded-For", "9.9.9.8")
        .bearer_auth(USER_TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}
