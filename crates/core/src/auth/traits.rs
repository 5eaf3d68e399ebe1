use async_trait::async_trait;
use thiserror::Error;

use super::types::{AuthRequest, Identity};
use super::Operator;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Authentication required")]
    NotAuthenticated,

    #[error("Not authorized as an operator: {0}")]
    Forbidden(String),

    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("Authentication service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),
}

#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Authenticate a request and return the identity.
    ///
    /// A request without credentials yields [`AuthError::NotAuthenticated`];
    /// callers decide whether to continue anonymously.
    async fn authenticate(&self, request: &AuthRequest) -> Result<Identity, AuthError>;

    /// Name of this authentication method
    fn method_name(&self) -> &'static str;
}

/// Decides which identities may act as queue operators.
pub trait OperatorAuthorizer: Send + Sync {
    /// Mint an [`Operator`] capability for `identity`, or refuse.
    fn authorize(&self, identity: &Identity) -> Result<Operator, AuthError>;

    fn name(&self) -> &'static str;
}
