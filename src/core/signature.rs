//! RS256 signature computation and verification.
//!
//! Tokens carry their signature in the standard base64 alphabet, while
//! `jsonwebtoken`'s primitives speak unpadded base64url. The helpers here
//! translate between the two so the rest of the codec only ever sees the
//! wire form.
//!
//! The algorithm is fixed. Nothing read from a token header can change
//! which algorithm is used to verify it.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, crypto};

use crate::core::{decode_segment, encode_segment, sanitize_jwt_error};
use crate::error::KeyringError;

/// The only signature algorithm tokens are issued and verified with.
pub const ALGORITHM: Algorithm = Algorithm::RS256;

/// Name written into the `alg` header field.
pub const ALGORITHM_NAME: &str = "RS256";

/// Load a PEM-encoded RSA private key (PKCS#1 or PKCS#8).
///
/// # Errors
///
/// Returns [`KeyringError::InvalidKeyMaterial`] if the PEM cannot be
/// parsed or does not hold an RSA key.
pub fn signing_key(private_key_pem: &str) -> Result<EncodingKey, KeyringError> {
    EncodingKey::from_rsa_pem(private_key_pem.as_bytes()).map_err(|e| {
        KeyringError::InvalidKeyMaterial {
            reason: format!("private key: {}", sanitize_jwt_error(e.kind())),
        }
    })
}

/// Load a PEM-encoded RSA public key (SPKI or PKCS#1).
///
/// # Errors
///
/// Returns [`KeyringError::InvalidKeyMaterial`] if the PEM cannot be
/// parsed or does not hold an RSA key.
pub fn verifying_key(public_key_pem: &str) -> Result<DecodingKey, KeyringError> {
    DecodingKey::from_rsa_pem(public_key_pem.as_bytes()).map_err(|e| {
        KeyringError::InvalidKeyMaterial {
            reason: format!("public key: {}", sanitize_jwt_error(e.kind())),
        }
    })
}

/// Sign `signing_input` and return the signature as a token segment.
///
/// # Errors
///
/// Returns [`KeyringError::InvalidKeyMaterial`] if the key is rejected by
/// the RSA implementation (for example, a modulus that is too small).
pub fn sign(signing_input: &str, key: &EncodingKey) -> Result<String, KeyringError> {
    let url_safe = crypto::sign(signing_input.as_bytes(), key, ALGORITHM).map_err(|e| {
        KeyringError::InvalidKeyMaterial {
            reason: format!("private key: {}", sanitize_jwt_error(e.kind())),
        }
    })?;

    let raw = URL_SAFE_NO_PAD
        .decode(url_safe)
        .map_err(|_| KeyringError::InvalidKeyMaterial {
            reason: "private key: signature could not be encoded".to_string(),
        })?;

    Ok(encode_segment(&raw))
}

/// Check a signature segment against `signing_input`.
///
/// Returns `Ok(false)` for any signature that does not verify, including
/// one that is not valid base64.
///
/// # Errors
///
/// Returns [`KeyringError::InvalidKeyMaterial`] if the key cannot be used
/// for RS256.
pub fn verify(
    signing_input: &str,
    signature_segment: &str,
    key: &DecodingKey,
) -> Result<bool, KeyringError> {
    let Some(raw) = decode_segment(signature_segment) else {
        return Ok(false);
    };
    let url_safe = URL_SAFE_NO_PAD.encode(raw);

    crypto::verify(&url_safe, signing_input.as_bytes(), key, ALGORITHM).map_err(|e| {
        KeyringError::InvalidKeyMaterial {
            reason: format!("public key: {}", sanitize_jwt_error(e.kind())),
        }
    })
}
