use futures::StreamExt;
use reqwest::redirect::Policy;
use std::time::Duration;
use thiserror::Error;

/// Largest response body either service is allowed to send.
pub const MAX_RESPONSE_SIZE: usize = 5 * 1024 * 1024; // 5MB

/// Failure while reading a bounded response body.
#[derive(Debug, Error)]
pub enum BodyError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Response too large (exceeds {0} bytes)")]
    TooLarge(usize),
}

/// Build the shared HTTP client.
///
/// The cookie store carries the identity service's refresh cookie between
/// `login` and `refresh`; it is never readable by callers.
pub fn build_client() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .cookie_store(true)
        .redirect(Policy::limited(5))
        .connect_timeout(Duration::from_secs(10))
        .user_agent(concat!("sift/", env!("CARGO_PKG_VERSION")))
        .build()
}

/// Read a response body, failing once it grows past `limit` bytes.
pub async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, BodyError> {
    // Fast path: check Content-Length header
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(BodyError::TooLarge(limit));
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(BodyError::TooLarge(limit));
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}
