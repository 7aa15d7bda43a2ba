//! Public key resolution from a remote key endpoint.
//!
//! The key endpoint answers a request with a JSON object mapping key IDs to
//! PEM-encoded public keys:
//!
//! ```json
//! { "kid-1": "-----BEGIN PUBLIC KEY-----\n...", "kid-2": "..." }
//! ```
//!
//! [`KeyResolver::resolve`] fetches that object and extracts the entry for
//! one key ID. A missing entry is not an error at this level: the caller
//! decides what "no such key" means.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::core::sanitize_kid;
use crate::error::KeyringError;

/// Port used when the fetch options do not name one.
pub const DEFAULT_PORT: u16 = 443;

/// Content type sent when the fetch options do not override it.
pub const DEFAULT_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Maximum key response body size in bytes (1 MB).
pub const DEFAULT_MAX_RESPONSE_BYTES: usize = 1_048_576;

/// HTTP request timeout for key endpoints in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Where and how to fetch the public keys for a token.
///
/// `host` and `path` are mandatory; they are checked when a key is
/// resolved rather than at construction so that options can be built up
/// field by field. Implements a custom `Debug` that redacts header values,
/// which commonly carry credentials for the key endpoint.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyFetchOptions {
    /// Host name or address of the key endpoint.
    pub host: String,
    /// Request path, including any query string.
    pub path: String,
    /// Port to connect to; defaults to 443.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// HTTP method; defaults to GET.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Extra request headers. These override the default content type.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

impl KeyFetchOptions {
    /// Options for the key endpoint at `host` and `path` with every other
    /// setting left at its default.
    pub fn new(host: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            path: path.into(),
            ..Self::default()
        }
    }

    /// Connect to `port` instead of 443.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Use `method` instead of GET.
    #[must_use]
    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    /// Send an extra request header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// The cache key for `kid` fetched with these options.
    ///
    /// Keys fetched from the same host and path share a namespace; port,
    /// method and headers do not take part. Host and path are
    /// length-prefixed so that no `kid` can spell out another endpoint's key.
    pub fn cache_key(&self, kid: &str) -> String {
        format!(
            "{}:{}|{}:{}|{}",
            self.host.len(),
            self.host,
            self.path.len(),
            self.path,
            kid
        )
    }
}

impl fmt::Debug for KeyFetchOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let headers: BTreeMap<&str, &str> = self
            .headers
            .keys()
            .map(|name| (name.as_str(), "[REDACTED]"))
            .collect();
        f.debug_struct("KeyFetchOptions")
            .field("host", &self.host)
            .field("path", &self.path)
            .field("port", &self.port)
            .field("method", &self.method)
            .field("headers", &headers)
            .finish()
    }
}

/// URL scheme used to reach the key endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Scheme {
    /// TLS-protected HTTP.
    #[default]
    Https,
    /// Plain HTTP, for endpoints on a trusted local network.
    Http,
}

impl Scheme {
    fn as_str(self) -> &'static str {
        match self {
            Self::Https => "https",
            Self::Http => "http",
        }
    }
}

/// Transport settings shared by every fetch a resolver makes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverConfig {
    /// URL scheme for the key endpoint.
    pub scheme: Scheme,
    /// Upper bound on a whole request, connect to last body byte.
    pub timeout: Duration,
    /// Largest response body accepted from the key endpoint.
    pub max_response_bytes: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            scheme: Scheme::Https,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
        }
    }
}

impl ResolverConfig {
    /// Use `scheme` to reach key endpoints.
    #[must_use]
    pub fn with_scheme(mut self, scheme: Scheme) -> Self {
        self.scheme = scheme;
        self
    }

    /// Bound every request by `timeout`.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Reject response bodies larger than `bytes`.
    #[must_use]
    pub fn with_max_response_bytes(mut self, bytes: usize) -> Self {
        self.max_response_bytes = bytes;
        self
    }
}

/// Fetches public key material from remote key endpoints.
///
/// Cheap to clone; clones share one connection pool.
#[derive(Debug, Clone)]
pub struct KeyResolver {
    client: reqwest::Client,
    config: ResolverConfig,
}

impl KeyResolver {
    /// Build a resolver with the given transport settings.
    ///
    /// Redirects are never followed, so an endpoint cannot bounce the
    /// request to a different (or unencrypted) origin.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be initialised.
    pub fn new(config: ResolverConfig) -> Result<Self, KeyringError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| KeyringError::ConfigurationError {
                field: "client".to_string(),
                reason: format!("could not be initialised ({})", sanitize_reqwest_error(&e)),
            })?;

        Ok(Self { client, config })
    }

    /// The transport settings this resolver was built with.
    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Fetch the key set described by `options` and return the entry for
    /// `kid`, or `None` if the endpoint does not publish that key.
    ///
    /// Exactly one request is made; nothing is retried.
    ///
    /// # Errors
    ///
    /// Returns [`KeyringError::ConfigurationError`] before any network call
    /// if `host` or `path` is missing or another option is unusable,
    /// [`KeyringError::TransportError`] if the endpoint cannot be reached
    /// or its body cannot be read, [`KeyringError::HttpStatusError`] for
    /// any status other than 200, and [`KeyringError::JsonParseError`] if
    /// the body is not a JSON object.
    pub async fn resolve(
        &self,
        kid: &str,
        options: &KeyFetchOptions,
    ) -> Result<Option<String>, KeyringError> {
        let request = self.build_request(options)?;
        let display_url = sanitize_url_for_display(request.url());
        debug!(url = %display_url, kid = %sanitize_kid(kid), "fetching public keys");

        let response = self.client.execute(request).await.map_err(|e| {
            let reason = sanitize_reqwest_error(&e);
            warn!(url = %display_url, %reason, "public key fetch failed");
            KeyringError::TransportError {
                url: display_url.clone(),
                reason,
            }
        })?;

        let status = response.status();
        if status != StatusCode::OK {
            warn!(
                url = %display_url,
                status = status.as_u16(),
                "key endpoint returned an error status"
            );
            return Err(KeyringError::HttpStatusError {
                url: display_url,
                status: status.as_u16(),
            });
        }

        let body = read_bounded_response(response, &display_url, self.config.max_response_bytes)
            .await?;

        let keys: Map<String, Value> =
            serde_json::from_slice(&body).map_err(|e| KeyringError::JsonParseError {
                segment: "key response".to_string(),
                reason: e.to_string(),
            })?;
        debug!(url = %display_url, keys = keys.len(), "public keys fetched");

        Ok(extract_key(keys, kid))
    }

    /// Validate `options`, apply defaults and build the request.
    fn build_request(&self, options: &KeyFetchOptions) -> Result<reqwest::Request, KeyringError> {
        let host = options.host.trim();
        if host.is_empty() {
            return Err(KeyringError::ConfigurationError {
                field: "host".to_string(),
                reason: "is required".to_string(),
            });
        }
        let path = options.path.trim();
        if path.is_empty() {
            return Err(KeyringError::ConfigurationError {
                field: "path".to_string(),
                reason: "is required".to_string(),
            });
        }

        let url = build_url(self.config.scheme, host, options.port, path)?;
        let method = parse_method(options.method.as_deref())?;
        let headers = build_headers(&options.headers)?;

        self.client
            .request(method, url)
            .headers(headers)
            .build()
            .map_err(|e| KeyringError::ConfigurationError {
                field: "request".to_string(),
                reason: format!("could not be built ({})", sanitize_reqwest_error(&e)),
            })
    }
}

fn build_url(
    scheme: Scheme,
    host: &str,
    port: Option<u16>,
    path: &str,
) -> Result<Url, KeyringError> {
    let separator = if path.starts_with('/') { "" } else { "/" };
    let raw = format!(
        "{}://{host}:{}{separator}{path}",
        scheme.as_str(),
        port.unwrap_or(DEFAULT_PORT)
    );

    Url::parse(&raw).map_err(|_| KeyringError::ConfigurationError {
        field: "host".to_string(),
        reason: "does not form a valid URL with the given path".to_string(),
    })
}

fn parse_method(method: Option<&str>) -> Result<Method, KeyringError> {
    match method {
        None => Ok(Method::GET),
        Some(name) => Method::from_bytes(name.trim().to_ascii_uppercase().as_bytes()).map_err(
            |_| KeyringError::ConfigurationError {
                field: "method".to_string(),
                reason: format!("'{name}' is not a valid HTTP method"),
            },
        ),
    }
}

/// Default headers overlaid with the caller's.
///
/// Header names are case-insensitive, so a caller's `content-type` in any
/// casing replaces the default.
fn build_headers(extra: &BTreeMap<String, String>) -> Result<HeaderMap, KeyringError> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(DEFAULT_CONTENT_TYPE));

    for (name, value) in extra {
        let header_name =
            HeaderName::from_bytes(name.as_bytes()).map_err(|_| KeyringError::ConfigurationError {
                field: "headers".to_string(),
                reason: format!("'{name}' is not a valid header name"),
            })?;
        // The value is left out of the message; it may be a credential.
        let header_value =
            HeaderValue::from_str(value).map_err(|_| KeyringError::ConfigurationError {
                field: "headers".to_string(),
                reason: format!("value for '{name}' is not a valid header value"),
            })?;
        headers.insert(header_name, header_value);
    }

    Ok(headers)
}

/// Read a response body with a size limit to prevent resource exhaustion.
async fn read_bounded_response(
    mut response: reqwest::Response,
    display_url: &str,
    limit: usize,
) -> Result<Vec<u8>, KeyringError> {
    let too_large = || KeyringError::TransportError {
        url: display_url.to_string(),
        reason: format!("response exceeds maximum size of {limit} bytes"),
    };

    if response
        .content_length()
        .is_some_and(|len| len > limit as u64)
    {
        return Err(too_large());
    }

    let mut body = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| KeyringError::TransportError {
            url: display_url.to_string(),
            reason: sanitize_reqwest_error(&e),
        })?
    {
        if body.len() + chunk.len() > limit {
            return Err(too_large());
        }
        body.extend_from_slice(&chunk);
    }

    Ok(body)
}

/// Take the key material for `kid` out of a fetched key set.
fn extract_key(mut keys: Map<String, Value>, kid: &str) -> Option<String> {
    match keys.remove(kid) {
        Some(Value::String(material)) => Some(material),
        Some(_) => {
            warn!(kid = %sanitize_kid(kid), "key endpoint entry is not a string; ignoring it");
            None
        }
        None => None,
    }
}

/// Sanitize a `reqwest` error into a user-friendly reason string.
///
/// Maps common error types to generic messages rather than forwarding
/// raw error strings that may leak internal system details.
fn sanitize_reqwest_error(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        "connection timed out".to_string()
    } else if err.is_connect() {
        "failed to connect to server".to_string()
    } else if err.is_redirect() {
        "too many redirects".to_string()
    } else if err.is_body() || err.is_decode() {
        "failed to read response body".to_string()
    } else if err.is_builder() {
        "invalid request".to_string()
    } else {
        "request failed".to_string()
    }
}

/// Sanitize a URL for safe display in error messages.
///
/// Strips credentials (userinfo), query parameters, and fragment
/// components. Only scheme, host, port, and path are preserved.
fn sanitize_url_for_display(url: &Url) -> String {
    let mut sanitized = url.clone();
    let _ = sanitized.set_username("");
    let _ = sanitized.set_password(None);
    sanitized.set_query(None);
    sanitized.set_fragment(None);
    sanitized.to_string()
}
