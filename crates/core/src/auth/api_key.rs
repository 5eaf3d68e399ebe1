//! API Key authentication.

use async_trait::async_trait;

use super::{AuthError, AuthRequest, Authenticator, Identity};
use crate::config::ApiKeyCredential;

/// Authenticator that maps configured API keys to user ids.
///
/// Accepts the key in either:
/// - `Authorization: Bearer <key>` header
/// - `X-API-Key: <key>` header
pub struct ApiKeyAuthenticator {
    credentials: Vec<ApiKeyCredential>,
}

impl ApiKeyAuthenticator {
    pub fn new(credentials: Vec<ApiKeyCredential>) -> Self {
        Self { credentials }
    }

    fn extract_key(request: &AuthRequest) -> Option<&str> {
        if let Some(auth_header) = request.headers.get("authorization") {
            if let Some(key) = auth_header
                .strip_prefix("Bearer ")
                .or_else(|| auth_header.strip_prefix("bearer "))
            {
                return Some(key.trim());
            }
        }

        request.headers.get("x-api-key").map(|key| key.trim())
    }
}

#[async_trait]
impl Authenticator for ApiKeyAuthenticator {
    async fn authenticate(&self, request: &AuthRequest) -> Result<Identity, AuthError> {
        let provided = Self::extract_key(request).ok_or(AuthError::NotAuthenticated)?;

        // Compare against every credential so timing does not reveal which one matched
        let mut matched: Option<&ApiKeyCredential> = None;
        for credential in &self.credentials {
            if constant_time_eq(provided.as_bytes(), credential.key.as_bytes()) {
                matched = Some(credential);
            }
        }

        match matched {
            Some(credential) => Ok(Identity {
                user_id: credential.user_id.clone(),
                method: "api_key".to_string(),
                claims: std::collections::HashMap::new(),
            }),
            None => Err(AuthError::InvalidCredentials("Invalid API key".to_string())),
        }
    }

    fn method_name(&self) -> &'static str {
        "api_key"
    }
}

/// Constant-time byte comparison to prevent timing attacks.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;

    fn authenticator() -> ApiKeyAuthenticator {
        ApiKeyAuthenticator::new(vec![
            ApiKeyCredential {
                key: "front-desk-key".to_string(),
                user_id: "desk@example.com".to_string(),
            },
            ApiKeyCredential {
                key: "manager-key".to_string(),
                user_id: "manager@example.com".to_string(),
            },
        ])
    }

    fn make_request(headers: Vec<(&str, &str)>) -> AuthRequest {
        AuthRequest {
            headers: headers
                .into_iter()
                .map(|(k, v)| (k.to_lowercase(), v.to_string()))
                .collect(),
            source_ip: "127.0.0.1".parse::<IpAddr>().unwrap(),
        }
    }

    #[tokio::test]
    async fn test_bearer_token_maps_to_user() {
        let request = make_request(vec![("Authorization", "Bearer manager-key")]);

        let identity = authenticator().authenticate(&request).await.unwrap();

        assert_eq!(identity.user_id, "manager@example.com");
        assert_eq!(identity.method, "api_key");
        assert!(!identity.is_anonymous());
    }

    #[tokio::test]
    async fn test_x_api_key_header() {
        let request = make_request(vec![("X-API-Key", "front-desk-key")]);

        let identity = authenticator().authenticate(&request).await.unwrap();

        assert_eq!(identity.user_id, "desk@example.com");
    }

    #[tokio::test]
    async fn test_bearer_lowercase() {
        let request = make_request(vec![("Authorization", "bearer front-desk-key")]);

        let identity = authenticator().authenticate(&request).await.unwrap();
        assert_eq!(identity.user_id, "desk@example.com");
    }

    #[tokio::test]
    async fn test_invalid_key() {
        let request = make_request(vec![("Authorization", "Bearer wrong-key")]);

        let result = authenticator().authenticate(&request).await;

        assert!(matches!(result, Err(AuthError::InvalidCredentials(_))));
    }

    #[tokio::test]
    async fn test_missing_header() {
        let result = authenticator().authenticate(&make_request(vec![])).await;

        assert!(matches!(result, Err(AuthError::NotAuthenticated)));
    }

    #[tokio::test]
    async fn test_non_bearer_authorization_falls_back_to_api_key_header() {
        let request = make_request(vec![
            ("Authorization", "Basic Zm9vOmJhcg=="),
            ("X-API-Key", "manager-key"),
        ]);

        let identity = authenticator().authenticate(&request).await.unwrap();
        assert_eq!(identity.user_id, "manager@example.com");
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"hello", b"hello"));
        assert!(!constant_time_eq(b"hello", b"world"));
        assert!(!constant_time_eq(b"hello", b"hell"));
        assert!(constant_time_eq(b"", b""));
    }
}
