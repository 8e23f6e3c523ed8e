//! Shared helpers: an in-process license server on an OS-assigned port.

#![allow(dead_code)]

use callguard_license::ManualClock;
use callguard_server::{build_router, AdminToken, AppState};
use callguard_store::LicenseStore;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::{Client, Response};
use serde_json::{json, Value};
use std::sync::Arc;

pub const ADMIN_TOKEN: &str = "test-admin-token-0123456789";
pub const FP_A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
pub const FP_B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
}

pub struct TestServer {
    pub base: String,
    pub clock: Arc<ManualClock>,
    pub http: Client,
}

/// Spin up the HTTP server backed by an in-memory store, returning a handle
/// with its base URL and the clock the store reads.
pub async fn spawn_test_server() -> TestServer {
    let clock = Arc::new(ManualClock::new(start_time()));
    let store = LicenseStore::open_in_memory(clock.clone()).unwrap();
    let app = build_router(AppState::new(store, AdminToken::new(ADMIN_TOKEN)));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    TestServer {
        base: format!("http://127.0.0.1:{}", port),
        clock,
        http: Client::new(),
    }
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    pub async fn admin_get(&self, path: &str) -> Response {
        self.http
            .get(self.url(path))
            .bearer_auth(ADMIN_TOKEN)
            .send()
            .await
            .unwrap()
    }

    pub async fn admin_post(&self, path: &str, body: Value) -> Response {
        self.http
            .post(self.url(path))
            .bearer_auth(ADMIN_TOKEN)
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    pub async fn admin_put(&self, path: &str, body: Option<Value>) -> Response {
        let mut req = self.http.put(self.url(path)).bearer_auth(ADMIN_TOKEN);
        if let Some(body) = body {
            req = req.json(&body);
        }
        req.send().await.unwrap()
    }

    /// Issues a license and returns its key.
    pub async fn generate(&self, max_concurrent_calls: u32, validity_days: u32, is_trial: bool) -> String {
        let resp = self
            .admin_post(
                "/api/license/generate",
                json!({
                    "client_name": "Acme Telecom",
                    "client_email": "ops@acme.example",
                    "max_concurrent_calls": max_concurrent_calls,
                    "max_agents": 3,
                    "validity_days": validity_days,
                    "is_trial": is_trial
                }),
            )
            .await;
        assert_eq!(resp.status(), 201);
        let body: Value = resp.json().await.unwrap();
        body["license_key"].as_str().unwrap().to_string()
    }

    pub async fn activate(&self, key: &str, fingerprint: &str) -> Response {
        self.http
            .post(self.url(&format!("/api/license/{key}/activate")))
            .json(&json!({ "hardware_fingerprint": fingerprint }))
            .send()
            .await
            .unwrap()
    }

    pub async fn heartbeat(&self, key: &str, fingerprint: &str, active_calls: u32, calls_processed: u64) -> Response {
        self.http
            .post(self.url(&format!("/api/license/{key}/heartbeat")))
            .json(&json!({
                "hardware_fingerprint": fingerprint,
                "active_calls": active_calls,
                "active_agents": 1,
                "calls_processed": calls_processed,
                "server_ip": "10.1.2.3",
                "cpu": 35.5,
                "ram": 61.0,
                "disk": 72.25
            }))
            .send()
            .await
            .unwrap()
    }

    pub async fn info(&self, key: &str) -> Value {
        let resp = self.admin_get(&format!("/api/license/{key}/info")).await;
        assert_eq!(resp.status(), 200);
        resp.json().await.unwrap()
    }
}

/// Reads an error response and returns its machine-readable code.
pub async fn error_code(resp: Response) -> String {
    let body: Value = resp.json().await.unwrap();
    body["error"]["code"].as_str().unwrap().to_string()
}
