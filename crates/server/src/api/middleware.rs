//! Authentication, authorization and metrics middleware for API routes.

use axum::{
    body::Body,
    extract::{FromRequestParts, State},
    http::{request::Parts, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;
use walkin_core::{AuthError, AuthRequest, Identity, Operator};

use crate::metrics::{
    normalize_path, AUTH_FAILURES_TOTAL, HTTP_REQUESTS_IN_FLIGHT, HTTP_REQUESTS_TOTAL,
    HTTP_REQUEST_DURATION,
};
use crate::state::AppState;

/// Metrics middleware that tracks HTTP request duration and counts.
///
/// This middleware records:
/// - Request duration (histogram)
/// - Request count (counter)
/// - Requests in flight (gauge)
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let path = normalize_path(request.uri().path());

    HTTP_REQUESTS_IN_FLIGHT.inc();

    let response = next.run(request).await;

    HTTP_REQUESTS_IN_FLIGHT.dec();

    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    HTTP_REQUEST_DURATION
        .with_label_values(&[&method, &path, &status])
        .observe(duration);
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[&method, &path, &status])
        .inc();

    response
}

/// Authentication middleware that resolves the caller's identity.
///
/// Customers carry no credentials, so a request without any continues as
/// anonymous. Credentials that are present but wrong are rejected with 401.
/// Operator checks happen later, in the [`OperatorUser`] extractor.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let authenticator = state.authenticator();

    if authenticator.method_name() == "none" {
        request.extensions_mut().insert(Identity::anonymous());
        return Ok(next.run(request).await);
    }

    // Extract headers into HashMap for AuthRequest
    let headers: HashMap<String, String> = request
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_lowercase(), v.to_string()))
        })
        .collect();

    // Get source IP (default to localhost if not available)
    let source_ip = request
        .extensions()
        .get::<std::net::SocketAddr>()
        .map(|addr| addr.ip())
        .unwrap_or(std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST));

    let auth_request = AuthRequest { headers, source_ip };

    match authenticator.authenticate(&auth_request).await {
        Ok(identity) => {
            request.extensions_mut().insert(identity);
            Ok(next.run(request).await)
        }
        Err(AuthError::NotAuthenticated) => {
            request.extensions_mut().insert(Identity::anonymous());
            Ok(next.run(request).await)
        }
        Err(AuthError::InvalidCredentials(_)) => {
            AUTH_FAILURES_TOTAL
                .with_label_values(&["invalid_credentials"])
                .inc();
            Err(StatusCode::UNAUTHORIZED)
        }
        Err(_) => {
            // Other auth errors (service unavailable, config error)
            AUTH_FAILURES_TOTAL
                .with_label_values(&["internal_error"])
                .inc();
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Body returned when an operator endpoint refuses the caller.
#[derive(Debug, Serialize)]
pub struct AuthErrorResponse {
    pub success: bool,
    pub message: String,
}

/// Rejection for [`OperatorUser`].
#[derive(Debug)]
pub struct OperatorRejection {
    status: StatusCode,
    message: String,
}

impl IntoResponse for OperatorRejection {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(AuthErrorResponse {
                success: false,
                message: self.message,
            }),
        )
            .into_response()
    }
}

/// Extractor for an authorized operator.
///
/// Runs the configured [`walkin_core::OperatorAuthorizer`] against the
/// identity left by [`auth_middleware`]. Anonymous callers get 401, known
/// identities outside the operator list get 403.
#[derive(Debug, Clone)]
pub struct OperatorUser(pub Operator);

impl FromRequestParts<Arc<AppState>> for OperatorUser {
    type Rejection = OperatorRejection;

    fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> impl Future<Output = Result<Self, Self::Rejection>> + Send {
        let identity = parts
            .extensions
            .get::<Identity>()
            .cloned()
            .unwrap_or_else(Identity::anonymous);

        let result = state
            .authorizer()
            .authorize(&identity)
            .map(OperatorUser)
            .map_err(|e| {
                let (status, reason) = match e {
                    AuthError::NotAuthenticated => (StatusCode::UNAUTHORIZED, "unauthenticated"),
                    AuthError::Forbidden(_) => (StatusCode::FORBIDDEN, "not_operator"),
                    _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
                };
                AUTH_FAILURES_TOTAL.with_label_values(&[reason]).inc();
                debug!(user_id = %identity.user_id, reason, "Operator access refused");
                OperatorRejection {
                    status,
                    message: e.to_string(),
                }
            });
        std::future::ready(result)
    }
}
