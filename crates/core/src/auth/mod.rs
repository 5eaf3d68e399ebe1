mod api_key;
mod none;
mod operator;
mod traits;
mod types;

pub use api_key::*;
pub use none::*;
pub use operator::*;
pub use traits::*;
pub use types::*;

use crate::config::{AuthConfig, AuthMethod, OperatorsConfig};

/// Factory function to create authenticator from config
pub fn create_authenticator(config: &AuthConfig) -> Result<Box<dyn Authenticator>, AuthError> {
    match config.method {
        AuthMethod::None => Ok(Box::new(NoneAuthenticator::new())),
        AuthMethod::ApiKey => {
            if config.credentials.is_empty() {
                return Err(AuthError::ConfigurationError(
                    "auth.credentials must list at least one key when using api_key auth"
                        .to_string(),
                ));
            }
            Ok(Box::new(ApiKeyAuthenticator::new(config.credentials.clone())))
        }
    }
}

/// Factory function to create the operator authorizer from config
pub fn create_authorizer(config: &OperatorsConfig) -> Box<dyn OperatorAuthorizer> {
    Box::new(AllowListAuthorizer::new(&config.allow))
}
