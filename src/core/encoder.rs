//! Token issuing.
//!
//! A token is three dot-separated segments, each base64-encoded with the
//! standard alphabet:
//!
//! ```text
//! base64({"alg":"RS256","kid":<kid>}) "." base64(<claims json>) "." base64(<signature>)
//! ```
//!
//! The signature is RS256 over the exact text `header "." claims`.

use serde::Serialize;

use crate::core::encode_segment;
use crate::core::signature::{self, ALGORITHM_NAME};
use crate::error::KeyringError;

/// The header written into every issued token.
#[derive(Debug, Serialize)]
struct TokenHeader<'a> {
    alg: &'a str,
    kid: &'a str,
}

/// Issue a token for `claims`, signed with `private_key_pem` and labelled
/// with `kid` so that verifiers can look up the matching public key.
///
/// Encoding is synchronous and deterministic: the same key, kid and claims
/// always produce the same token.
///
/// # Errors
///
/// Returns [`KeyringError::InvalidKeyMaterial`] if the private key is not a
/// usable RSA key, or [`KeyringError::JsonParseError`] if `claims` cannot be
/// represented as JSON (for example, a map with non-string keys).
pub fn encode<C>(private_key_pem: &str, kid: &str, claims: &C) -> Result<String, KeyringError>
where
    C: Serialize + ?Sized,
{
    let key = signature::signing_key(private_key_pem)?;

    let header = TokenHeader {
        alg: ALGORITHM_NAME,
        kid,
    };
    let header = encode_json(&header, "header")?;
    let claims = encode_json(claims, "claims")?;

    let signing_input = format!("{header}.{claims}");
    let signature = signature::sign(&signing_input, &key)?;

    Ok(format!("{signing_input}.{signature}"))
}

/// Serialize `value` to JSON and encode it as a token segment.
fn encode_json<T: Serialize + ?Sized>(value: &T, segment: &str) -> Result<String, KeyringError> {
    let json = serde_json::to_vec(value).map_err(|e| KeyringError::JsonParseError {
        segment: segment.to_string(),
        reason: e.to_string(),
    })?;
    Ok(encode_segment(&json))
}
