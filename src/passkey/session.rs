//! Principal and per-browser session context
//!
//! Ceremonies never read ambient state; the HTTP layer builds a
//! [`SessionContext`] for each request and passes it in explicitly.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{PasskeyError, Result};

const MAX_PRINCIPAL_LEN: usize = 256;

/// The authenticated account name a credential set belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Principal(String);

impl Principal {
    /// Validate and wrap a principal name
    ///
    /// # Errors
    /// Returns a validation error for empty, oversized or control-character
    /// names, and for names starting with `_` (reserved for internal indexes)
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name: String = name.into();
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(PasskeyError::validation("Principal cannot be empty"));
        }
        if name.len() > MAX_PRINCIPAL_LEN {
            return Err(PasskeyError::validation("Principal is too long"));
        }
        if name.chars().any(char::is_control) {
            return Err(PasskeyError::validation(
                "Principal contains control characters",
            ));
        }
        if name.starts_with('_') {
            return Err(PasskeyError::validation("Principal cannot start with '_'"));
        }
        Ok(Self(name))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Principal {
    type Error = PasskeyError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Principal> for String {
    fn from(value: Principal) -> Self {
        value.0
    }
}

/// State carried between the requests of one browser session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionContext {
    pub session_id: String,
    pub principal: Option<Principal>,
    /// Set once a passkey assertion has succeeded in this session
    pub passkey_authenticated: bool,
    pub authenticated_at: Option<DateTime<Utc>>,
}

impl SessionContext {
    #[must_use]
    pub fn new(principal: Option<Principal>) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            principal,
            passkey_authenticated: false,
            authenticated_at: None,
        }
    }

    /// Key under which this session's challenges are tracked
    #[must_use]
    pub fn challenge_subject(&self) -> String {
        match &self.principal {
            Some(principal) => principal.as_str().to_string(),
            None => format!("anon:{}", self.session_id),
        }
    }

    /// Record a successful passkey assertion for `principal`
    pub fn mark_passkey_authenticated(&mut self, principal: Principal, at: DateTime<Utc>) {
        self.principal = Some(principal);
        self.passkey_authenticated = true;
        self.authenticated_at = Some(at);
    }

    /// Adopt the principal asserted by the upstream login layer
    ///
    /// A different principal than the one recorded starts a fresh session so
    /// passkey state never carries across accounts.
    #[must_use]
    pub fn for_principal(self, principal: Option<Principal>) -> Self {
        match (&self.principal, principal) {
            (Some(current), Some(incoming)) if *current != incoming => Self::new(Some(incoming)),
            (_, Some(incoming)) => Self {
                principal: Some(incoming),
                ..self
            },
            (_, None) => self,
        }
    }
}
