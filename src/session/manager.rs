use reqwest::header::CONTENT_TYPE;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use url::Url;

use super::types::{
    AuthError, Credentials, InitState, LoginResponse, RefreshResponse, RegisterResponse,
    SessionState, User,
};
use crate::config::{Config, ConfigError};
use crate::storage::{Database, StoredSession};
use crate::util::{read_limited_bytes, BodyError, MAX_RESPONSE_SIZE};

const REGISTER: &str = "register";
const LOGIN: &str = "login";
const LOGOUT: &str = "logout";
const REFRESH: &str = "refresh";

/// Owns the authentication session: current user, access token and the
/// flags a UI renders from.
///
/// Construct it once, call [`initialize`](Self::initialize) to rehydrate the
/// persisted session, and share it (e.g. behind an `Arc`). Every state change
/// is published to receivers obtained from [`subscribe`](Self::subscribe).
///
/// The access token never leaves this type; requests to protected endpoints
/// get it through [`authorize`](Self::authorize).
pub struct SessionManager {
    client: reqwest::Client,
    db: Database,
    base_url: Url,
    timeout: Duration,
    token: RwLock<Option<SecretString>>,
    /// Bumped whenever the held token changes
    token_epoch: AtomicU64,
    refresh_gate: Mutex<()>,
    state: watch::Sender<SessionState>,
}

/// Marks an auth call in flight for as long as it is alive.
///
/// Counting instead of toggling keeps overlapping calls from clearing each
/// other's loading flag, and `Drop` covers cancelled futures too.
struct InFlight<'a> {
    state: &'a watch::Sender<SessionState>,
}

impl<'a> InFlight<'a> {
    fn start(state: &'a watch::Sender<SessionState>) -> Self {
        state.send_modify(|s| {
            s.pending += 1;
            s.is_loading = true;
            s.auth_error = None;
        });
        Self { state }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.state.send_modify(|s| {
            s.pending = s.pending.saturating_sub(1);
            s.is_loading = s.pending > 0;
        });
    }
}

impl SessionManager {
    pub fn new(client: reqwest::Client, db: Database, config: &Config) -> Result<Self, ConfigError> {
        let base_url = config.auth_url()?;
        let (state, _) = watch::channel(SessionState::default());
        Ok(Self {
            client,
            db,
            base_url,
            timeout: config.request_timeout(),
            token: RwLock::new(None),
            token_epoch: AtomicU64::new(0),
            refresh_gate: Mutex::new(()),
            state,
        })
    }

    // ========================================================================
    // Observation
    // ========================================================================

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn is_logged_in(&self) -> bool {
        self.state.borrow().is_logged_in
    }

    pub fn user(&self) -> Option<User> {
        self.state.borrow().user.clone()
    }

    pub fn auth_error(&self) -> Option<AuthError> {
        self.state.borrow().auth_error.clone()
    }

    /// Resolves once [`initialize`](Self::initialize) has finished.
    pub async fn wait_initialized(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(SessionState::is_initialized).await;
    }

    /// Attach the bearer token, if one is held, to a caller-built request.
    pub fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self
            .token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            Some(token) => request.bearer_auth(token.expose_secret()),
            None => request,
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Rehydrate the session from durable storage.
    ///
    /// Only the first call does anything. A stored user record that fails to
    /// parse, a blank token, or a token stored without its user (or the
    /// reverse), wipes the persisted session and leaves the manager logged out. No request is
    /// made; an expired token is only discovered by the first protected call.
    pub async fn initialize(&self) {
        let claimed = self.state.send_if_modified(|s| {
            if s.init != InitState::Pending {
                return false;
            }
            s.init = InitState::Running;
            true
        });
        if !claimed {
            tracing::debug!("Session already initialized");
            return;
        }

        match self.db.load_session().await {
            Ok(StoredSession {
                access_token: Some(token),
                user: Some(user_json),
            }) if !token.trim().is_empty() => match serde_json::from_str::<User>(&user_json) {
                Ok(user) => {
                    tracing::info!(user_id = %user.id, "Restored persisted session");
                    self.set_token(Some(SecretString::from(token)));
                    self.state.send_modify(|s| {
                        s.user = Some(user);
                        s.is_logged_in = true;
                    });
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Stored user record is corrupt, clearing session");
                    self.wipe_storage().await;
                }
            },
            Ok(stored) if !stored.is_empty() => {
                tracing::warn!(
                    has_token = stored.access_token.is_some(),
                    has_user = stored.user.is_some(),
                    "Incomplete persisted session, clearing"
                );
                self.wipe_storage().await;
            }
            Ok(_) => tracing::debug!("No persisted session"),
            Err(e) => tracing::warn!(error = %e, "Failed to read persisted session"),
        }

        self.state.send_modify(|s| s.init = InitState::Ready);
    }

    /// Log in and persist the returned user and token.
    ///
    /// # Errors
    ///
    /// - [`AuthError::IncompleteCredentials`] before any request
    /// - [`AuthError::InvalidCredentials`] for any non-2xx answer
    /// - [`AuthError::NetworkFailure`] when no answer arrived in time
    ///
    /// On error the previous session (if any) is left exactly as it was.
    pub async fn login(&self, credentials: &Credentials) -> Result<User, AuthError> {
        let _in_flight = InFlight::start(&self.state);
        let result = self.login_inner(credentials).await;
        self.record(&result);
        result
    }

    async fn login_inner(&self, credentials: &Credentials) -> Result<User, AuthError> {
        if !credentials.is_complete() {
            return Err(AuthError::IncompleteCredentials);
        }

        let response = self.post(LOGIN, Some(credentials), false, "Log in").await?;
        if !response.status().is_success() {
            tracing::info!(status = %response.status(), "Login rejected");
            return Err(AuthError::InvalidCredentials);
        }

        let LoginResponse { user, access_token } = self.read_json(response, "Log in").await?;
        let access_token = require_token(access_token)?;
        self.establish(user.clone(), access_token).await?;
        tracing::info!(user_id = %user.id, "Logged in");
        Ok(user)
    }

    /// Create an account and log straight into it.
    ///
    /// If the registration response carries no token, one is requested from
    /// the refresh endpoint using the cookie the registration set. When that
    /// fails too the account exists but the session stays logged out
    /// ([`AuthError::RegisteredWithoutToken`]).
    pub async fn register(&self, credentials: &Credentials) -> Result<User, AuthError> {
        let _in_flight = InFlight::start(&self.state);
        let result = self.register_inner(credentials).await;
        self.record(&result);
        result
    }

    async fn register_inner(&self, credentials: &Credentials) -> Result<User, AuthError> {
        if !credentials.is_complete() {
            return Err(AuthError::IncompleteCredentials);
        }

        let response = self
            .post(REGISTER, Some(credentials), false, "Registration")
            .await?;
        let status = response.status();
        if status == reqwest::StatusCode::CONFLICT {
            return Err(AuthError::Conflict);
        }
        if !status.is_success() {
            return Err(AuthError::RegistrationFailed(status.as_u16()));
        }

        let RegisterResponse { user, access_token } =
            self.read_json(response, "Registration").await?;
        let access_token = match access_token {
            Some(token) => require_token(token)?,
            None => match self.request_refresh().await {
                Ok(token) => token,
                Err(e) => {
                    tracing::warn!(error = %e, "Registered, but no token could be obtained");
                    return Err(AuthError::RegisteredWithoutToken);
                }
            },
        };

        self.establish(user.clone(), access_token).await?;
        tracing::info!(user_id = %user.id, "Registered and logged in");
        Ok(user)
    }

    /// End the session.
    ///
    /// Without a held token nothing is sent. Otherwise the identity service is
    /// notified; whatever it answers, the in-memory session and durable
    /// storage are cleared afterwards.
    ///
    /// # Errors
    ///
    /// [`AuthError::NoTokenPresent`] or [`AuthError::LogoutFailed`]. Both are
    /// soft: the session is logged out either way.
    pub async fn logout(&self) -> Result<(), AuthError> {
        let _in_flight = InFlight::start(&self.state);

        let result = if self.has_token() {
            match self.post(LOGOUT, None, true, "Log out").await {
                Ok(response) if response.status().is_success() => Ok(()),
                Ok(response) => Err(AuthError::LogoutFailed(format!(
                    "HTTP status {}",
                    response.status().as_u16()
                ))),
                Err(e) => Err(AuthError::LogoutFailed(e.to_string())),
            }
        } else {
            Err(AuthError::NoTokenPresent)
        };

        if let Err(e) = &result {
            tracing::warn!(error = %e, "Remote logout did not complete");
        }

        self.set_token(None);
        self.wipe_storage().await;
        self.state.send_modify(|s| {
            s.user = None;
            s.is_logged_in = false;
        });
        tracing::info!("Logged out");

        self.record(&result);
        result
    }

    /// Exchange the refresh cookie for a new access token.
    ///
    /// Callers that arrive while a refresh is running wait for it and share
    /// its outcome instead of sending another request. Any failure logs the
    /// session out.
    pub async fn refresh_access_token(&self) -> Result<(), AuthError> {
        let observed = self.token_epoch.load(Ordering::Acquire);
        let _gate = self.refresh_gate.lock().await;
        if self.token_epoch.load(Ordering::Acquire) != observed {
            tracing::debug!("Token changed while waiting for refresh, reusing outcome");
            return if self.has_token() {
                Ok(())
            } else {
                Err(AuthError::RefreshFailed)
            };
        }

        let in_flight = InFlight::start(&self.state);
        let refreshed = match self.request_refresh().await {
            Ok(token) => self
                .db
                .save_access_token(&token)
                .await
                .map(|()| token)
                .map_err(|e| AuthError::Storage(e.to_string())),
            Err(e) => Err(e),
        };

        match refreshed {
            Ok(token) => {
                self.set_token(Some(SecretString::from(token)));
                tracing::info!("Access token refreshed");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "Token refresh failed, logging out");
                drop(in_flight);
                let _ = self.logout().await;
                let result = Err(AuthError::RefreshFailed);
                self.record(&result);
                result
            }
        }
    }

    // ========================================================================
    // Internals
    // ========================================================================

    async fn request_refresh(&self) -> Result<String, AuthError> {
        let response = self.post(REFRESH, None, false, "Token refresh").await?;
        if !response.status().is_success() {
            return Err(AuthError::MalformedResponse(format!(
                "refresh answered HTTP status {}",
                response.status().as_u16()
            )));
        }
        let RefreshResponse { access_token } = self.read_json(response, "Token refresh").await?;
        require_token(access_token)
    }

    /// Persist first, then publish: a storage failure leaves memory untouched.
    async fn establish(&self, user: User, access_token: String) -> Result<(), AuthError> {
        let user_json =
            serde_json::to_string(&user).map_err(|e| AuthError::Storage(e.to_string()))?;
        self.db
            .save_session(&access_token, &user_json)
            .await
            .map_err(|e| AuthError::Storage(e.to_string()))?;

        self.set_token(Some(SecretString::from(access_token)));
        self.state.send_modify(|s| {
            s.user = Some(user);
            s.is_logged_in = true;
        });
        Ok(())
    }

    async fn wipe_storage(&self) {
        if let Err(e) = self.db.clear_session().await {
            tracing::warn!(error = %e, "Failed to clear persisted session");
        }
    }

    fn has_token(&self) -> bool {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn set_token(&self, token: Option<SecretString>) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = token;
        self.token_epoch.fetch_add(1, Ordering::AcqRel);
    }

    fn record<T>(&self, result: &Result<T, AuthError>) {
        if let Err(e) = result {
            let e = e.clone();
            self.state.send_modify(|s| s.auth_error = Some(e));
        }
    }

    async fn post(
        &self,
        endpoint: &str,
        body: Option<&Credentials>,
        with_token: bool,
        operation: &'static str,
    ) -> Result<reqwest::Response, AuthError> {
        let network = |message: String| AuthError::NetworkFailure { operation, message };

        let url = self
            .base_url
            .join(endpoint)
            .map_err(|e| network(e.to_string()))?;
        let mut request = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json");
        if let Some(body) = body {
            let bytes = serde_json::to_vec(body).map_err(|e| network(e.to_string()))?;
            request = request.body(bytes);
        }
        if with_token {
            request = self.authorize(request);
        }

        tracing::debug!(endpoint = %endpoint, "Sending auth request");
        tokio::time::timeout(self.timeout, request.send())
            .await
            .map_err(|_| network("request timed out".to_string()))?
            .map_err(|e| network(e.to_string()))
    }

    /// Read and decode a JSON body under the same deadline as the request.
    async fn read_json<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
        operation: &'static str,
    ) -> Result<T, AuthError> {
        let network = |message: String| AuthError::NetworkFailure { operation, message };

        let bytes = tokio::time::timeout(
            self.timeout,
            read_limited_bytes(response, MAX_RESPONSE_SIZE),
        )
        .await
        .map_err(|_| network("response body timed out".to_string()))?
        .map_err(|e| match e {
            BodyError::Network(e) => network(e.to_string()),
            too_large @ BodyError::TooLarge(_) => {
                AuthError::MalformedResponse(too_large.to_string())
            }
        })?;
        serde_json::from_slice(&bytes).map_err(|e| AuthError::MalformedResponse(e.to_string()))
    }
}

/// A token the service sent but that cannot authenticate anything.
fn require_token(token: String) -> Result<String, AuthError> {
    if token.trim().is_empty() {
        return Err(AuthError::MalformedResponse("empty access token".to_string()));
    }
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn manager() -> SessionManager {
        let db = Database::open(":memory:").await.unwrap();
        SessionManager::new(reqwest::Client::new(), db, &Config::default()).unwrap()
    }

    #[tokio::test]
    async fn test_in_flight_counts_overlapping_calls() {
        let m = manager().await;
        let first = InFlight::start(&m.state);
        let second = InFlight::start(&m.state);
        drop(first);
        assert!(m.state().is_loading);
        drop(second);
        assert!(!m.state().is_loading);
    }

    #[tokio::test]
    async fn test_in_flight_clears_previous_error() {
        let m = manager().await;
        m.record::<()>(&Err(AuthError::InvalidCredentials));
        assert_eq!(m.auth_error(), Some(AuthError::InvalidCredentials));

        let _call = InFlight::start(&m.state);
        assert_eq!(m.auth_error(), None);
    }

    #[tokio::test]
    async fn test_incomplete_credentials_rejected_without_request() {
        let m = manager().await;
        let result = m.login(&Credentials::with_email("", "pw")).await;
        assert_eq!(result, Err(AuthError::IncompleteCredentials));
        assert!(!m.is_logged_in());
        assert!(!m.state().is_loading);
    }

    #[tokio::test]
    async fn test_authorize_without_token_leaves_request_alone() {
        let m = manager().await;
        let request = m
            .authorize(reqwest::Client::new().get("https://example.com/"))
            .build()
            .unwrap();
        assert!(request.headers().get("authorization").is_none());

        m.set_token(Some(SecretString::from("abc".to_string())));
        let request = m
            .authorize(reqwest::Client::new().get("https://example.com/"))
            .build()
            .unwrap();
        assert_eq!(request.headers()["authorization"], "Bearer abc");
    }

    #[test]
    fn test_require_token_rejects_blank() {
        assert_eq!(require_token("abc".into()), Ok("abc".to_string()));
        assert!(matches!(
            require_token(String::new()),
            Err(AuthError::MalformedResponse(_))
        ));
        assert!(matches!(
            require_token("  ".into()),
            Err(AuthError::MalformedResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_initialize_runs_once() {
        let m = manager().await;
        assert_eq!(m.state().init, InitState::Pending);
        m.initialize().await;
        assert_eq!(m.state().init, InitState::Ready);

        // Persist something afterwards; a second initialize must not pick it up
        m.db.save_session("t", r#"{"id":"1"}"#).await.unwrap();
        m.initialize().await;
        assert!(!m.is_logged_in());
    }
}
