use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Auth failures, as recorded in [`SessionState::auth_error`] and returned
/// from [`SessionManager`](super::SessionManager) operations.
///
/// `Clone` so the latest error can live in the observable state; transport
/// errors are kept as their message for that reason.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    /// Credentials carry no name, email or identifier, or no password
    #[error("Enter a name or email and a password")]
    IncompleteCredentials,
    /// Login endpoint answered with a non-2xx status
    #[error("Invalid credentials")]
    InvalidCredentials,
    /// Registration endpoint answered 409
    #[error("Email already exists")]
    Conflict,
    #[error("Registration failed: HTTP status {0}")]
    RegistrationFailed(u16),
    /// Account created, but no token could be obtained for it
    #[error("Account created; log in to continue")]
    RegisteredWithoutToken,
    /// No response at all (connection, TLS, timeout)
    #[error("{operation} failed: {message}")]
    NetworkFailure {
        operation: &'static str,
        message: String,
    },
    /// 2xx response whose body is not the expected JSON shape
    #[error("Unexpected response from identity service: {0}")]
    MalformedResponse(String),
    #[error("No access token found")]
    NoTokenPresent,
    /// Remote logout failed; the local session was still cleared
    #[error("An error occurred while logging out: {0}")]
    LogoutFailed(String),
    /// Refresh failed; the session has been logged out
    #[error("Session expired, please log in again")]
    RefreshFailed,
    /// Durable storage could not be written
    #[error("Could not save session: {0}")]
    Storage(String),
}

// ============================================================================
// Data Structures
// ============================================================================

/// The authenticated user as returned by the identity service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(s) => s,
        Id::Number(n) => n.to_string(),
    })
}

/// Login/registration payload: a password plus at least one identifier.
///
/// Debug output masks the password.
#[derive(Clone, Default, Serialize)]
pub struct Credentials {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    pub password: String,
}

impl Credentials {
    pub fn with_email(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: Some(email.into()),
            password: password.into(),
            ..Self::default()
        }
    }

    pub fn with_identifier(identifier: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            identifier: Some(identifier.into()),
            password: password.into(),
            ..Self::default()
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn is_complete(&self) -> bool {
        let present = |field: &Option<String>| field.as_deref().is_some_and(|v| !v.trim().is_empty());
        (present(&self.name) || present(&self.email) || present(&self.identifier))
            && !self.password.is_empty()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("name", &self.name)
            .field("email", &self.email)
            .field("identifier", &self.identifier)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Progress of storage rehydration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InitState {
    #[default]
    Pending,
    Running,
    Ready,
}

/// Observable state of a [`SessionManager`](super::SessionManager).
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    /// Present iff logged in
    pub user: Option<User>,
    /// True iff `user` is present and a token is held
    pub is_logged_in: bool,
    /// Latest failure; cleared when a new operation starts
    pub auth_error: Option<AuthError>,
    /// True while at least one auth request is in flight
    pub is_loading: bool,
    pub init: InitState,
    pub(crate) pending: usize,
}

impl SessionState {
    pub fn is_initialized(&self) -> bool {
        self.init == InitState::Ready
    }
}

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LoginResponse {
    pub user: User,
    pub access_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RegisterResponse {
    pub user: User,
    #[serde(default)]
    pub access_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RefreshResponse {
    pub access_token: String,
}
