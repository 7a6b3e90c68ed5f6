//! Utility functions shared by the session and feed clients.
//!
//! - **URL validation**: base URLs must be HTTPS unless they point at loopback
//! - **HTTP**: shared client construction and size-bounded body reads

mod http;
mod url_validator;

pub use http::{build_client, read_limited_bytes, BodyError, MAX_RESPONSE_SIZE};
pub use url_validator::{validate_base_url, UrlValidationError};
