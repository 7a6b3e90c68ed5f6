//! Session-aware client for Reddit-style listing feeds.
//!
//! Two explicitly constructed state containers do the work:
//!
//! - [`SessionManager`] owns the login session and its persisted token
//! - [`FeedStore`] pages through one topic's listing and merges the results
//!
//! Both publish their state through `tokio::sync::watch` channels.

pub mod config;
pub mod feed;
pub mod session;
pub mod storage;
pub mod util;

pub use config::{Config, ConfigError};
pub use feed::{FeedError, FeedItem, FeedStore};
pub use session::{AuthError, Credentials, SessionManager, User};
pub use storage::Database;
