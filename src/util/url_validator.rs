use std::net::IpAddr;
use thiserror::Error;
use url::Url;

/// Errors that can occur during base URL validation.
#[derive(Error, Debug)]
pub enum UrlValidationError {
    /// The URL string could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL uses a scheme other than http or https.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    /// Plain HTTP to a non-loopback host.
    #[error("Insecure URL: HTTPS required (except localhost)")]
    Insecure,
}

/// Validates a service base URL.
///
/// Credentials and bearer tokens travel to these hosts, so plain `http` is
/// only accepted for loopback hosts (`localhost`, `127.0.0.1`, `::1`), which
/// is what a local identity service and the test servers use.
///
/// The returned URL always ends with `/` so relative endpoint paths can be
/// joined onto it without dropping the last path segment.
///
/// # Examples
///
/// ```
/// use sift::util::validate_base_url;
///
/// let url = validate_base_url("https://www.reddit.com").unwrap();
/// assert_eq!(url.as_str(), "https://www.reddit.com/");
///
/// assert!(validate_base_url("http://localhost:3001").is_ok());
/// assert!(validate_base_url("http://example.com").is_err());
/// assert!(validate_base_url("file:///etc/passwd").is_err());
/// ```
pub fn validate_base_url(url_str: &str) -> Result<Url, UrlValidationError> {
    let mut url = Url::parse(url_str)?;

    match url.scheme() {
        "https" => {}
        "http" => {
            if !url.host_str().is_some_and(is_loopback_host) {
                return Err(UrlValidationError::Insecure);
            }
        }
        scheme => return Err(UrlValidationError::UnsupportedScheme(scheme.to_owned())),
    }

    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }

    Ok(url)
}

fn is_loopback_host(host: &str) -> bool {
    if host == "localhost" {
        return true;
    }

    // Strip brackets from IPv6 addresses for parsing
    let host_for_parse = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);

    host_for_parse
        .parse::<IpAddr>()
        .is_ok_and(|ip| ip.is_loopback())
}
