//! Authentication session: login, registration, logout and token refresh,
//! with the user and access token persisted across restarts.

mod manager;
mod types;

pub use manager::SessionManager;
pub use types::{AuthError, Credentials, InitState, SessionState, User};
