//! Domain error types for jwt-keyring.
//!
//! All business-logic errors are defined here using `thiserror`.
//! These errors are converted to user-friendly messages at the CLI boundary.
//!
//! `KeyringError` is `Clone` because a single key fetch may be awaited by
//! several concurrent decoders, each of which receives its own copy of the
//! outcome.

use thiserror::Error;

/// Errors that can occur while issuing, resolving keys for, or verifying
/// a token.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyringError {
    /// The key fetch options are missing a mandatory field or carry a
    /// value that cannot be used to build a request.
    #[error("invalid key fetch options: {field} {reason}")]
    ConfigurationError {
        /// The offending option (e.g., "host", "path", "method").
        field: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// The key endpoint could not be reached or its body could not be read.
    #[error("failed to fetch public keys from '{url}': {reason}")]
    TransportError {
        /// The key endpoint URL, stripped of credentials and query.
        url: String,
        /// Description of the transport failure.
        reason: String,
    },

    /// The key endpoint answered with something other than 200.
    #[error("key endpoint '{url}' returned HTTP {status}")]
    HttpStatusError {
        /// The key endpoint URL, stripped of credentials and query.
        url: String,
        /// The observed status code.
        status: u16,
    },

    /// Failed to parse JSON content.
    #[error("failed to parse {segment} as JSON: {reason}")]
    JsonParseError {
        /// Which document failed to parse ("header", "claims", "key response").
        segment: String,
        /// Description of the parsing failure.
        reason: String,
    },

    /// The token does not have the expected three-part structure.
    #[error("invalid token format: expected 'header.claims.signature' structure")]
    InvalidTokenFormat,

    /// The key endpoint answered but does not publish the requested key.
    #[error("no public key found for id '{kid}'")]
    KeyNotFound {
        /// The key ID from the token header.
        kid: String,
    },

    /// The signature does not match the header and claims.
    #[error("unable to verify token")]
    SignatureVerificationFailed,

    /// A PEM key could not be used for RS256.
    #[error("invalid key material: {reason}")]
    InvalidKeyMaterial {
        /// Description of why the key was rejected.
        reason: String,
    },
}
