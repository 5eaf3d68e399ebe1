//! Common test utilities for in-process API testing.
//!
//! This module provides a test fixture that builds the real router over a
//! temporary SQLite database, with API-key auth configured for one operator
//! and one non-operator account.

#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::FixedOffset;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use walkin_core::config::{ApiKeyCredential, AuthConfig, OperatorsConfig};
use walkin_core::{
    create_audit_system, create_authenticator, create_authorizer, load_config_from_str,
    AuditStore, AuthMethod, CallDispatcher, Config, QueueBroadcaster, QueueStateManager,
    QueueStore, SqliteAuditStore, SqliteQueueStore,
};

/// API key of the configured operator.
pub const OPERATOR_KEY: &str = "operator-secret";

/// API key of an authenticated user who is not an operator.
pub const KIOSK_KEY: &str = "kiosk-secret";

/// Test fixture for API testing.
///
/// # Example
///
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_issue_ticket() {
///     let fixture = TestFixture::new().await;
///
///     let response = fixture.post("/api/v1/tickets", None).await;
///
///     assert_eq!(response.status, 201);
/// }
/// ```
pub struct TestFixture {
    /// The Axum router for testing
    pub router: Router,
    /// Direct handle on the queue store, for seeding and assertions
    pub store: Arc<SqliteQueueStore>,
    /// Queue event bus shared with the router
    pub events: QueueBroadcaster,
    /// Temporary directory for the test database
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl TestFixture {
    /// Create a new test fixture with API-key auth.
    pub async fn new() -> Self {
        Self::with_auth(api_key_auth()).await
    }

    /// Create a test fixture where every caller is anonymous.
    pub async fn without_auth() -> Self {
        Self::with_auth(AuthConfig {
            method: AuthMethod::None,
            credentials: vec![],
        })
        .await
    }

    async fn with_auth(auth: AuthConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");

        let base = load_config_from_str("[auth]\nmethod = \"none\"\n").expect("valid config");
        let mut config = Config {
            auth,
            operators: OperatorsConfig {
                allow: vec!["admin@example.com".to_string()],
            },
            ..base
        };
        config.database.path = db_path.clone();
        config.scheduler.enabled = false;

        let authenticator = Arc::from(
            create_authenticator(&config.auth).expect("Failed to create authenticator"),
        );
        let authorizer = Arc::from(create_authorizer(&config.operators));

        let audit_store: Arc<dyn AuditStore> = Arc::new(
            SqliteAuditStore::new(&db_path).expect("Failed to create audit store"),
        );
        let store = Arc::new(SqliteQueueStore::new(&db_path).expect("Failed to create queue store"));

        let (audit_handle, audit_writer) = create_audit_system(Arc::clone(&audit_store), 100);
        tokio::spawn(audit_writer.run());

        let events = QueueBroadcaster::default();
        let tz = FixedOffset::east_opt(7 * 3600).expect("valid offset");
        let queue_store = Arc::clone(&store) as Arc<dyn QueueStore>;

        let queue = QueueStateManager::new(Arc::clone(&queue_store), tz)
            .with_events(events.clone())
            .with_audit(audit_handle.clone());
        let dispatcher = CallDispatcher::new(queue_store)
            .with_events(events.clone())
            .with_audit(audit_handle);

        let state = Arc::new(walkin_server::state::AppState::new(
            config,
            authenticator,
            authorizer,
            audit_store,
            Arc::new(queue),
            Arc::new(dispatcher),
            events.clone(),
        ));

        let router = walkin_server::api::create_router(state);

        Self {
            router,
            store,
            events,
            temp_dir,
        }
    }

    /// Send a GET request to the test server.
    pub async fn get(&self, path: &str, api_key: Option<&str>) -> TestResponse {
        self.request("GET", path, api_key).await
    }

    /// Send a POST request without a body.
    pub async fn post(&self, path: &str, api_key: Option<&str>) -> TestResponse {
        self.request("POST", path, api_key).await
    }

    /// GET a path and return the raw text body.
    pub async fn get_text(&self, path: &str) -> (StatusCode, String) {
        let request = Request::builder()
            .method("GET")
            .uri(path)
            .body(Body::empty())
            .unwrap();
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();
        (status, String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Send a request to the test server.
    async fn request(&self, method: &str, path: &str, api_key: Option<&str>) -> TestResponse {
        let mut request_builder = Request::builder().method(method).uri(path);
        if let Some(key) = api_key {
            request_builder = request_builder.header("Authorization", format!("Bearer {}", key));
        }

        let request = request_builder.body(Body::empty()).unwrap();

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        TestResponse { status, body }
    }
}

fn api_key_auth() -> AuthConfig {
    AuthConfig {
        method: AuthMethod::ApiKey,
        credentials: vec![
            ApiKeyCredential {
                key: OPERATOR_KEY.to_string(),
                user_id: "admin@example.com".to_string(),
            },
            ApiKeyCredential {
                key: KIOSK_KEY.to_string(),
                user_id: "kiosk@example.com".to_string(),
            },
        ],
    }
}

/// Helper to assert a response has expected status.
#[macro_export]
macro_rules! assert_status {
    ($response:expr, $status:expr) => {
        assert_eq!(
            $response.status, $status,
            "Expected status {:?}, got {:?}. Body: {}",
            $status,
            $response.status,
            serde_json::to_string_pretty(&$response.body).unwrap_or_default()
        );
    };
}
