//! Operator capability and the allow-list authorizer.

use std::collections::HashSet;

use super::{AuthError, Identity, OperatorAuthorizer};

/// Proof that an identity may perform operator actions.
///
/// Only an [`OperatorAuthorizer`] inside this crate can mint one, so holding
/// an `Operator` means authorization already happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operator {
    id: String,
}

impl Operator {
    pub(crate) fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    /// The operator's user id as authenticated.
    pub fn id(&self) -> &str {
        &self.id
    }
}

/// Authorizes identities whose user id appears in a configured list.
///
/// Matching is case-insensitive, as user ids are typically email addresses.
pub struct AllowListAuthorizer {
    allowed: HashSet<String>,
}

impl AllowListAuthorizer {
    pub fn new<I, S>(allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            allowed: allowed
                .into_iter()
                .map(|id| id.as_ref().trim().to_lowercase())
                .filter(|id| !id.is_empty())
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.allowed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.allowed.is_empty()
    }
}

impl OperatorAuthorizer for AllowListAuthorizer {
    fn authorize(&self, identity: &Identity) -> Result<Operator, AuthError> {
        if identity.is_anonymous() {
            return Err(AuthError::NotAuthenticated);
        }

        if self.allowed.contains(&identity.user_id.to_lowercase()) {
            Ok(Operator::new(identity.user_id.clone()))
        } else {
            Err(AuthError::Forbidden(identity.user_id.clone()))
        }
    }

    fn name(&self) -> &'static str {
        "allow_list"
    }
}
