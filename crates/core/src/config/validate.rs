use super::{
    types::{AuthMethod, Config},
    ConfigError,
};
use crate::queue::MAX_BATCH_SIZE;

/// Validate configuration
///
/// Checks:
/// - server port is not 0
/// - `queue.utc_offset` parses as a fixed offset
/// - delete batch size is within 1..=500 and attempt counts are non-zero
/// - api_key auth has at least one credential, each with a key and user id
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    if config.queue.time_zone().is_none() {
        return Err(ConfigError::ValidationError(format!(
            "queue.utc_offset {:?} is not a UTC offset like \"+07:00\"",
            config.queue.utc_offset
        )));
    }

    if config.queue.delete_batch_size == 0 || config.queue.delete_batch_size > MAX_BATCH_SIZE {
        return Err(ConfigError::ValidationError(format!(
            "queue.delete_batch_size must be between 1 and {}",
            MAX_BATCH_SIZE
        )));
    }

    if config.queue.delete_batch_attempts == 0 {
        return Err(ConfigError::ValidationError(
            "queue.delete_batch_attempts cannot be 0".to_string(),
        ));
    }

    if config.queue.max_transaction_attempts == 0 {
        return Err(ConfigError::ValidationError(
            "queue.max_transaction_attempts cannot be 0".to_string(),
        ));
    }

    if config.auth.method == AuthMethod::ApiKey {
        if config.auth.credentials.is_empty() {
            return Err(ConfigError::ValidationError(
                "auth.credentials must not be empty when auth.method = \"api_key\"".to_string(),
            ));
        }
        if let Some(index) = config
            .auth
            .credentials
            .iter()
            .position(|c| c.key.trim().is_empty() || c.user_id.trim().is_empty())
        {
            return Err(ConfigError::ValidationError(format!(
                "auth.credentials[{}] needs both a key and a user_id",
                index
            )));
        }
    }

    Ok(())
}
