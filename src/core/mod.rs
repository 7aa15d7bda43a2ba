//! Core business logic for issuing and verifying tokens.
//!
//! This module contains the domain logic separated from CLI concerns.
//! All types and functions here are testable without the CLI layer.

pub mod decoder;
pub mod encoder;
pub mod memo;
pub mod resolver;
pub mod signature;

use base64::Engine;
use base64::alphabet;
use base64::engine::DecodePaddingMode;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD};

/// Decoder for token segments.
///
/// Segments are written with the standard alphabet and padding, but
/// existing issuers are not consistent about padding, so both forms are
/// accepted on the way in.
const SEGMENT_DECODER: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Encode raw bytes as a token segment (standard alphabet, padded).
pub(crate) fn encode_segment(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode a token segment back into raw bytes.
pub(crate) fn decode_segment(segment: &str) -> Option<Vec<u8>> {
    SEGMENT_DECODER.decode(segment).ok()
}

/// Map a `jsonwebtoken` error kind to a short reason string.
///
/// Avoids forwarding raw library messages, which can echo key material
/// back to the caller.
pub(crate) fn sanitize_jwt_error(kind: &jsonwebtoken::errors::ErrorKind) -> String {
    use jsonwebtoken::errors::ErrorKind;

    match kind {
        ErrorKind::InvalidKeyFormat => "key is not a PEM-encoded RSA key".to_string(),
        ErrorKind::InvalidRsaKey(_) => "RSA key was rejected".to_string(),
        ErrorKind::RsaFailedSigning => "RSA signing failed".to_string(),
        ErrorKind::InvalidAlgorithm => "key does not match the RS256 algorithm".to_string(),
        ErrorKind::Base64(_) => "invalid base64 encoding".to_string(),
        ErrorKind::Crypto(_) => "cryptographic operation failed".to_string(),
        _ => "unexpected signing error".to_string(),
    }
}

/// Sanitize a `kid` value for safe inclusion in error messages and logs.
///
/// Replaces control characters (including ANSI escape sequences) with
/// the Unicode replacement character to prevent terminal injection,
/// then truncates to 128 characters to limit message length.
pub(crate) fn sanitize_kid(kid: &str) -> String {
    const MAX_CHARS: usize = 128;

    let mut clean: String = kid
        .chars()
        .take(MAX_CHARS)
        .map(|c| if c.is_control() { '\u{FFFD}' } else { c })
        .collect();
    if kid.chars().count() > MAX_CHARS {
        clean.push_str("...(truncated)");
    }
    clean
}
