//! Token verification.
//!
//! [`Decoder::decode`] runs a strictly sequential pipeline and stops at the
//! first failure:
//!
//! 1. split the token into header, claims and signature segments;
//! 2. decode and parse the header;
//! 3. resolve the public key named by the header's `kid`, through the
//!    shared [`KeyCache`];
//! 4. verify the RS256 signature over the original `header.claims` text;
//! 5. only then decode and parse the claims.
//!
//! The claims segment is left encoded until the signature has been checked,
//! so a tampered claims segment is always reported as a verification
//! failure rather than as a decoding error.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::core::memo::{MemoCache, Memoized};
use crate::core::resolver::{KeyFetchOptions, KeyResolver};
use crate::core::{decode_segment, sanitize_kid, signature};
use crate::error::KeyringError;

/// Cache of resolved public keys, keyed by host, path and key ID.
///
/// Create one per process (or per test) and share it by `Arc`; clearing it
/// is visible to every decoder built on it.
pub type KeyCache = MemoCache<String, KeyringError>;

/// A request for the public key with a given ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRequest {
    /// Key ID taken from the token header.
    pub kid: String,
    /// Where to fetch the key set from.
    pub options: KeyFetchOptions,
}

/// The segments of a token, borrowed from the token text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Segments<'a> {
    header: &'a str,
    claims: &'a str,
    signature: &'a str,
    /// `header "." claims`, exactly as it appears in the token.
    signing_input: &'a str,
}

/// Verifies tokens against public keys resolved through a shared cache.
pub struct Decoder {
    public_keys: Memoized<KeyRequest, String, KeyringError>,
}

impl Decoder {
    /// A decoder that fetches keys with `resolver`, caching them in `cache`.
    pub fn new(resolver: KeyResolver, cache: Arc<KeyCache>) -> Self {
        let resolver = Arc::new(resolver);
        Self::with_lookup(
            move |request: KeyRequest| {
                let resolver = Arc::clone(&resolver);
                async move { resolver.resolve(&request.kid, &request.options).await }
            },
            cache,
        )
    }

    /// A decoder that obtains key material from an arbitrary lookup.
    ///
    /// The lookup answers `Ok(None)` when it has no key for the request;
    /// that outcome is reported as [`KeyringError::KeyNotFound`] and, like
    /// every error, is not cached.
    pub fn with_lookup<L, Fut>(lookup: L, cache: Arc<KeyCache>) -> Self
    where
        L: Fn(KeyRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<String>, KeyringError>> + Send + 'static,
    {
        let public_keys = Memoized::with_cache(
            move |request: KeyRequest| {
                let kid = sanitize_kid(&request.kid);
                let pending = lookup(request);
                async move {
                    pending
                        .await?
                        .filter(|material| !material.is_empty())
                        .ok_or(KeyringError::KeyNotFound { kid })
                }
            },
            |request: &KeyRequest| request.options.cache_key(&request.kid),
            cache,
        );

        Self { public_keys }
    }

    /// The cache backing this decoder.
    pub fn cache(&self) -> &Arc<KeyCache> {
        self.public_keys.cache()
    }

    /// Forget every cached public key; later decodes fetch keys again.
    pub fn clear_public_key_cache(&self) {
        self.public_keys.cache().clear();
    }

    /// Verify `token` and return its claims.
    ///
    /// The signature is always checked with RS256, whatever the header's
    /// `alg` says. Claims are only parsed once the signature has verified.
    ///
    /// # Errors
    ///
    /// - [`KeyringError::InvalidTokenFormat`] if the token does not have
    ///   three non-empty segments, the header is not base64, or the header
    ///   has no string `kid`;
    /// - [`KeyringError::JsonParseError`] if the header or claims are not
    ///   JSON (or the claims do not fit `C`);
    /// - any error from resolving the key, unchanged;
    /// - [`KeyringError::KeyNotFound`] if the key endpoint does not publish
    ///   the token's `kid`;
    /// - [`KeyringError::InvalidKeyMaterial`] if the published key is not a
    ///   usable RSA public key;
    /// - [`KeyringError::SignatureVerificationFailed`] if the signature does
    ///   not match.
    pub async fn decode<C>(&self, token: &str, options: &KeyFetchOptions) -> Result<C, KeyringError>
    where
        C: DeserializeOwned,
    {
        let segments = split_token(token)?;
        let header = parse_header(segments.header)?;
        let kid = header_kid(&header)?;

        let public_key = self
            .public_keys
            .call(KeyRequest {
                kid: kid.to_string(),
                options: options.clone(),
            })
            .await?;

        let key = signature::verifying_key(&public_key)?;
        if !signature::verify(segments.signing_input, segments.signature, &key)? {
            debug!(kid = %sanitize_kid(kid), "token signature did not verify");
            return Err(KeyringError::SignatureVerificationFailed);
        }

        parse_claims(segments.claims)
    }
}

impl fmt::Debug for Decoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Decoder")
            .field("cache", self.public_keys.cache())
            .finish()
    }
}

/// Split a token into its three segments.
fn split_token(token: &str) -> Result<Segments<'_>, KeyringError> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 || parts.iter().any(|part| part.is_empty()) {
        return Err(KeyringError::InvalidTokenFormat);
    }

    let signing_input_len = parts[0].len() + 1 + parts[1].len();
    Ok(Segments {
        header: parts[0],
        claims: parts[1],
        signature: parts[2],
        signing_input: &token[..signing_input_len],
    })
}

/// Base64-decode the header segment and parse it as JSON.
fn parse_header(segment: &str) -> Result<Value, KeyringError> {
    let bytes = decode_segment(segment).ok_or(KeyringError::InvalidTokenFormat)?;
    parse_json(&bytes, "header")
}

/// The `kid` named by a parsed header.
fn header_kid(header: &Value) -> Result<&str, KeyringError> {
    header
        .get("kid")
        .and_then(Value::as_str)
        .filter(|kid| !kid.is_empty())
        .ok_or(KeyringError::InvalidTokenFormat)
}

/// Base64-decode the claims segment and parse it as JSON.
///
/// Only reached for a verified token, so an undecodable segment means the
/// issuer signed bytes that are not claims; that is reported as a parse
/// failure.
fn parse_claims<C: DeserializeOwned>(segment: &str) -> Result<C, KeyringError> {
    let bytes = decode_segment(segment).ok_or_else(|| KeyringError::JsonParseError {
        segment: "claims".to_string(),
        reason: "invalid base64 encoding".to_string(),
    })?;
    parse_json(&bytes, "claims")
}

fn parse_json<T: DeserializeOwned>(bytes: &[u8], segment: &str) -> Result<T, KeyringError> {
    serde_json::from_slice(bytes).map_err(|e| KeyringError::JsonParseError {
        segment: segment.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde::Deserialize;
    use serde_json::json;

    use super::*;
    use crate::core::encode_segment;
    use crate::core::encoder::encode;

    const PRIVATE_KEY: &str = include_str!("../../tests/fixtures/rsa_private.pem");
    const PUBLIC_KEY: &str = include_str!("../../tests/fixtures/rsa_public.pem");
    const OTHER_PRIVATE_KEY: &str = include_str!("../../tests/fixtures/rsa_other_private.pem");
    const OTHER_PUBLIC_KEY: &str = include_str!("../../tests/fixtures/rsa_other_public.pem");
    const KNOWN_ANSWER: &str = include_str!("../../tests/fixtures/known_answer.token");

    fn options() -> KeyFetchOptions {
        KeyFetchOptions::new("keys.example.com", "/keys")
    }

    /// A decoder whose lookup serves `keys` from memory and counts calls.
    fn decoder_with_keys(keys: &[(&str, &str)], calls: Arc<AtomicUsize>) -> Decoder {
        let keys: Vec<(String, String)> = keys
            .iter()
            .map(|(kid, pem)| ((*kid).to_string(), (*pem).to_string()))
            .collect();
        Decoder::with_lookup(
            move |request: KeyRequest| {
                calls.fetch_add(1, Ordering::SeqCst);
                let found = keys
                    .iter()
                    .find(|(kid, _)| *kid == request.kid)
                    .map(|(_, pem)| pem.clone());
                async move { Ok::<_, KeyringError>(found) }
            },
            Arc::new(KeyCache::new()),
        )
    }

    fn standard_decoder() -> Decoder {
        decoder_with_keys(&[("kid-1", PUBLIC_KEY)], Arc::new(AtomicUsize::new(0)))
    }

    /// Re-sign a hand-built header and claims with the test key.
    fn forge(header: &str, claims: &str, private_key: &str) -> String {
        let signing_input = format!(
            "{}.{}",
            encode_segment(header.as_bytes()),
            encode_segment(claims.as_bytes())
        );
        let key = signature::signing_key(private_key).unwrap();
        let sig = signature::sign(&signing_input, &key).unwrap();
        format!("{signing_input}.{sig}")
    }

    // --- Splitting ---

    #[test]
    fn test_split_token_keeps_signing_input_verbatim() {
        let segments = split_token("aGVhZA==.Ym9keQ==.c2ln").unwrap();
        assert_eq!(segments.header, "aGVhZA==");
        assert_eq!(segments.claims, "Ym9keQ==");
        assert_eq!(segments.signature, "c2ln");
        assert_eq!(segments.signing_input, "aGVhZA==.Ym9keQ==");
    }

    #[test]
    fn test_split_token_with_two_parts_fails() {
        let err = split_token("eyJhbGciOiJSUzI1NiJ9.eyJzdWIiOiIxMjM0In0=").unwrap_err();
        assert!(matches!(err, KeyringError::InvalidTokenFormat));
    }

    #[test]
    fn test_split_token_with_four_parts_fails() {
        let err = split_token("a.b.c.d").unwrap_err();
        assert!(matches!(err, KeyringError::InvalidTokenFormat));
    }

    #[test]
    fn test_split_token_empty_string_fails() {
        let err = split_token("").unwrap_err();
        assert!(matches!(err, KeyringError::InvalidTokenFormat));
    }

    #[test]
    fn test_split_token_with_empty_signature_fails() {
        let err = split_token("eyJhbGciOiJub25lIn0=.e30=.").unwrap_err();
        assert!(matches!(err, KeyringError::InvalidTokenFormat));
    }

    // --- Header parsing ---

    #[test]
    fn test_parse_header_invalid_base64_fails() {
        let err = parse_header("!!!invalid!!!").unwrap_err();
        assert!(matches!(err, KeyringError::InvalidTokenFormat));
    }

    #[test]
    fn test_parse_header_invalid_json_fails() {
        // base64("not json")
        let err = parse_header("bm90IGpzb24=").unwrap_err();
        assert!(matches!(
            err,
            KeyringError::JsonParseError { segment, .. } if segment == "header"
        ));
    }

    #[test]
    fn test_parse_header_truncated_json_fails() {
        // base64(r#"{"alg":"RS256","ki"#)
        let err = parse_header(&encode_segment(br#"{"alg":"RS256","ki"#)).unwrap_err();
        assert!(matches!(err, KeyringError::JsonParseError { .. }));
    }

    #[test]
    fn test_header_kid_requires_string() {
        assert!(matches!(
            header_kid(&json!({"alg": "RS256"})).unwrap_err(),
            KeyringError::InvalidTokenFormat
        ));
        assert!(matches!(
            header_kid(&json!({"alg": "RS256", "kid": 7})).unwrap_err(),
            KeyringError::InvalidTokenFormat
        ));
        assert!(matches!(
            header_kid(&json!("kid-1")).unwrap_err(),
            KeyringError::InvalidTokenFormat
        ));
        assert_eq!(header_kid(&json!({"kid": "kid-1"})).unwrap(), "kid-1");
    }

    // --- Full pipeline ---

    #[tokio::test]
    async fn test_decode_round_trip() {
        let claims = json!({"id": "test1234", "email": "x@example.com"});
        let token = encode(PRIVATE_KEY, "kid-1", &claims).unwrap();

        let decoded: Value = standard_decoder().decode(&token, &options()).await.unwrap();
        assert_eq!(decoded, claims);
    }

    #[tokio::test]
    async fn test_decode_into_typed_claims() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct Claims {
            id: String,
            email: String,
        }

        let decoded: Claims = standard_decoder()
            .decode(KNOWN_ANSWER.trim(), &options())
            .await
            .unwrap();
        assert_eq!(
            decoded,
            Claims {
                id: "test1234".to_string(),
                email: "x@example.com".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_decode_tampered_claims_fails_verification() {
        let token = encode(PRIVATE_KEY, "kid-1", &json!({"role": "user"})).unwrap();
        let parts: Vec<&str> = token.split('.').collect();
        let forged_claims = encode_segment(br#"{"role":"admin"}"#);
        let tampered = format!("{}.{}.{}", parts[0], forged_claims, parts[2]);

        let err = standard_decoder()
            .decode::<Value>(&tampered, &options())
            .await
            .unwrap_err();
        assert!(matches!(err, KeyringError::SignatureVerificationFailed));
    }

    #[tokio::test]
    async fn test_decode_claims_with_invalid_base64_fails_verification() {
        let token = encode(PRIVATE_KEY, "kid-1", &json!({"role": "user"})).unwrap();
        let parts: Vec<&str> = token.split('.').collect();
        let tampered = format!("{}.{}!.{}", parts[0], parts[1], parts[2]);

        let err = standard_decoder()
            .decode::<Value>(&tampered, &options())
            .await
            .unwrap_err();
        assert!(matches!(err, KeyringError::SignatureVerificationFailed));
    }

    #[tokio::test]
    async fn test_decode_tampered_signature_fails_verification() {
        let token = encode(PRIVATE_KEY, "kid-1", &json!({"role": "user"})).unwrap();
        let (signing_input, signature) = token.rsplit_once('.').unwrap();
        let mut chars: Vec<char> = signature.chars().collect();
        chars[10] = if chars[10] == 'A' { 'B' } else { 'A' };
        let tampered = format!("{signing_input}.{}", chars.into_iter().collect::<String>());

        let err = standard_decoder()
            .decode::<Value>(&tampered, &options())
            .await
            .unwrap_err();
        assert!(matches!(err, KeyringError::SignatureVerificationFailed));
    }

    #[tokio::test]
    async fn test_decode_token_signed_by_other_key_fails_verification() {
        let token = encode(OTHER_PRIVATE_KEY, "kid-1", &json!({"sub": "1"})).unwrap();
        let err = standard_decoder()
            .decode::<Value>(&token, &options())
            .await
            .unwrap_err();
        assert!(matches!(err, KeyringError::SignatureVerificationFailed));
    }

    #[tokio::test]
    async fn test_decode_ignores_header_algorithm() {
        // Correctly RS256-signed, but the header claims another algorithm.
        for alg in ["none", "HS256"] {
            let header = format!(r#"{{"alg":"{alg}","kid":"kid-1"}}"#);
            let token = forge(&header, r#"{"sub":"1"}"#, PRIVATE_KEY);
            let decoded: Value = standard_decoder().decode(&token, &options()).await.unwrap();
            assert_eq!(decoded, json!({"sub": "1"}));
        }
    }

    #[tokio::test]
    async fn test_decode_alg_none_without_signature_is_rejected() {
        let header = encode_segment(br#"{"alg":"none","kid":"kid-1"}"#);
        let claims = encode_segment(br#"{"sub":"1"}"#);
        let token = format!("{header}.{claims}.AAAA");

        let err = standard_decoder()
            .decode::<Value>(&token, &options())
            .await
            .unwrap_err();
        assert!(matches!(err, KeyringError::SignatureVerificationFailed));
    }

    #[tokio::test]
    async fn test_decode_unknown_kid_is_key_not_found() {
        let token = encode(PRIVATE_KEY, "kid-9", &json!({})).unwrap();
        let err = standard_decoder()
            .decode::<Value>(&token, &options())
            .await
            .unwrap_err();
        assert!(matches!(err, KeyringError::KeyNotFound { kid } if kid == "kid-9"));
    }

    #[tokio::test]
    async fn test_decode_empty_key_material_is_key_not_found() {
        let decoder = decoder_with_keys(&[("kid-1", "")], Arc::new(AtomicUsize::new(0)));
        let token = encode(PRIVATE_KEY, "kid-1", &json!({})).unwrap();

        let err = decoder.decode::<Value>(&token, &options()).await.unwrap_err();
        assert!(matches!(err, KeyringError::KeyNotFound { .. }));
        assert!(decoder.cache().is_empty());
    }

    #[tokio::test]
    async fn test_decode_unusable_public_key_is_invalid_key_material() {
        let decoder = decoder_with_keys(&[("kid-1", "not a pem")], Arc::new(AtomicUsize::new(0)));
        let token = encode(PRIVATE_KEY, "kid-1", &json!({})).unwrap();

        let err = decoder.decode::<Value>(&token, &options()).await.unwrap_err();
        assert!(matches!(err, KeyringError::InvalidKeyMaterial { .. }));
    }

    #[tokio::test]
    async fn test_decode_signed_non_json_claims_is_parse_error() {
        let token = forge(r#"{"alg":"RS256","kid":"kid-1"}"#, "not json", PRIVATE_KEY);
        let err = standard_decoder()
            .decode::<Value>(&token, &options())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            KeyringError::JsonParseError { segment, .. } if segment == "claims"
        ));
    }

    #[tokio::test]
    async fn test_decode_lookup_error_is_surfaced_unchanged() {
        let decoder = Decoder::with_lookup(
            |_request: KeyRequest| async {
                Err::<Option<String>, _>(KeyringError::HttpStatusError {
                    url: "https://keys.example.com/keys".to_string(),
                    status: 503,
                })
            },
            Arc::new(KeyCache::new()),
        );
        let token = encode(PRIVATE_KEY, "kid-1", &json!({})).unwrap();

        let err = decoder.decode::<Value>(&token, &options()).await.unwrap_err();
        assert_eq!(
            err,
            KeyringError::HttpStatusError {
                url: "https://keys.example.com/keys".to_string(),
                status: 503,
            }
        );
    }

    #[tokio::test]
    async fn test_decode_malformed_token_never_calls_lookup() {
        let calls = Arc::new(AtomicUsize::new(0));
        let decoder = decoder_with_keys(&[("kid-1", PUBLIC_KEY)], Arc::clone(&calls));

        for token in ["", "a.b", "a.b.c.d", "!!!.e30=.c2ln", "bm90IGpzb24=.e30=.c2ln"] {
            assert!(decoder.decode::<Value>(token, &options()).await.is_err());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    // --- Caching ---

    #[tokio::test]
    async fn test_decode_caches_key_per_host_path_and_kid() {
        let calls = Arc::new(AtomicUsize::new(0));
        let decoder = decoder_with_keys(&[("kid-1", PUBLIC_KEY)], Arc::clone(&calls));
        let token = encode(PRIVATE_KEY, "kid-1", &json!({"n": 1})).unwrap();

        let first: Value = decoder.decode(&token, &options()).await.unwrap();
        let second: Value = decoder.decode(&token, &options()).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(decoder.cache().contains(&options().cache_key("kid-1")));

        let elsewhere = KeyFetchOptions::new("keys.example.com", "/other-keys");
        let _: Value = decoder.decode(&token, &elsewhere).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_decode_missing_key_is_not_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let decoder = decoder_with_keys(&[], Arc::clone(&calls));
        let token = encode(PRIVATE_KEY, "kid-1", &json!({})).unwrap();

        decoder.decode::<Value>(&token, &options()).await.unwrap_err();
        decoder.decode::<Value>(&token, &options()).await.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_clear_public_key_cache_forces_refetch() {
        let calls = Arc::new(AtomicUsize::new(0));
        let decoder = decoder_with_keys(&[("kid-1", PUBLIC_KEY)], Arc::clone(&calls));
        let token = encode(PRIVATE_KEY, "kid-1", &json!({})).unwrap();

        decoder.decode::<Value>(&token, &options()).await.unwrap();
        decoder.clear_public_key_cache();
        decoder.decode::<Value>(&token, &options()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_kid_with_separator_cannot_reuse_other_endpoint_key() {
        // Endpoint B at "/keys|x" publishes the other key as "k"; endpoint A
        // at "/keys" only publishes "kid-1".
        let decoder = Decoder::with_lookup(
            |request: KeyRequest| {
                let found = match (request.options.path.as_str(), request.kid.as_str()) {
                    ("/keys|x", "k") => Some(OTHER_PUBLIC_KEY.to_string()),
                    ("/keys", "kid-1") => Some(PUBLIC_KEY.to_string()),
                    _ => None,
                };
                async move { Ok::<_, KeyringError>(found) }
            },
            Arc::new(KeyCache::new()),
        );
        let endpoint_a = options();
        let endpoint_b = KeyFetchOptions::new("keys.example.com", "/keys|x");

        let legitimate = encode(OTHER_PRIVATE_KEY, "k", &json!({"role": "user"})).unwrap();
        let _: Value = decoder.decode(&legitimate, &endpoint_b).await.unwrap();

        let forged = encode(OTHER_PRIVATE_KEY, "x|k", &json!({"role": "admin"})).unwrap();
        let err = decoder
            .decode::<Value>(&forged, &endpoint_a)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            KeyringError::KeyNotFound {
                kid: "x|k".to_string()
            }
        );
    }

    #[test]
    fn test_decoder_debug_does_not_expose_keys() {
        let debug_output = format!("{:?}", standard_decoder());
        assert!(debug_output.contains("Decoder"));
        assert!(!debug_output.contains("BEGIN PUBLIC KEY"));
    }
}
