use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;

/// Request information for authentication
#[derive(Debug, Clone)]
pub struct AuthRequest {
    /// Header names are lowercase
    pub headers: HashMap<String, String>,
    pub source_ip: IpAddr,
}

/// Authenticated identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub method: String,
    pub claims: HashMap<String, serde_json::Value>,
}

impl Identity {
    pub const ANONYMOUS_USER: &'static str = "anonymous";

    pub fn anonymous() -> Self {
        Self {
            user_id: Self::ANONYMOUS_USER.to_string(),
            method: "none".to_string(),
            claims: HashMap::new(),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.method == "none" && self.user_id == Self::ANONYMOUS_USER
    }
}
