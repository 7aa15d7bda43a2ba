//! Shared test fixtures and helper utilities.
//!
//! Provides the RSA key fixtures, a pre-built token with known claims, and
//! helpers to stand up a mock key endpoint for integration tests.
#![allow(dead_code)]

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use jwt_keyring::{KeyFetchOptions, KeyResolver, ResolverConfig, Scheme};

/// Path to the test RSA private key fixture (PKCS#8).
pub const RSA_PRIVATE_KEY_PATH: &str = "tests/fixtures/rsa_private.pem";

/// Path to the EC private key fixture, which cannot sign RS256 tokens.
pub const EC_PRIVATE_KEY_PATH: &str = "tests/fixtures/ec_private.pem";

/// RSA private key that signed [`KNOWN_ANSWER_TOKEN`].
pub const RSA_PRIVATE_KEY: &str = include_str!("../fixtures/rsa_private.pem");

/// Public half of [`RSA_PRIVATE_KEY`].
pub const RSA_PUBLIC_KEY: &str = include_str!("../fixtures/rsa_public.pem");

/// An unrelated RSA public key.
pub const RSA_OTHER_PUBLIC_KEY: &str = include_str!("../fixtures/rsa_other_public.pem");

/// Token signed with [`RSA_PRIVATE_KEY`] under kid `"kid-1"`.
///
/// Header: `{"alg":"RS256","kid":"kid-1"}`
/// Claims: `{"email":"x@example.com","id":"test1234"}`
pub const KNOWN_ANSWER_TOKEN: &str = include_str!("../fixtures/known_answer.token");

/// Path the mock key endpoint serves keys on.
pub const KEYS_PATH: &str = "/public-keys";

/// Standard test claims used across decode tests.
pub fn standard_claims() -> serde_json::Value {
    serde_json::json!({
        "id": "test1234",
        "email": "x@example.com"
    })
}

/// JSON body mapping each kid to its PEM key.
pub fn key_set(entries: &[(&str, &str)]) -> String {
    let map: serde_json::Map<String, serde_json::Value> = entries
        .iter()
        .map(|(kid, pem)| ((*kid).to_string(), serde_json::Value::from(*pem)))
        .collect();
    serde_json::Value::Object(map).to_string()
}

/// Start a key endpoint that answers every GET on [`KEYS_PATH`] with
/// `body`, expecting exactly `expected_calls` requests.
pub async fn key_endpoint(body: String, expected_calls: u64) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(KEYS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .expect(expected_calls)
        .mount(&server)
        .await;
    server
}

/// Start a key endpoint publishing [`RSA_PUBLIC_KEY`] as `"kid-1"`.
pub async fn standard_key_endpoint(expected_calls: u64) -> MockServer {
    key_endpoint(key_set(&[("kid-1", RSA_PUBLIC_KEY)]), expected_calls).await
}

/// Fetch options pointing at a mock key endpoint.
pub fn fetch_options(server: &MockServer) -> KeyFetchOptions {
    KeyFetchOptions::new("127.0.0.1", KEYS_PATH).with_port(server.address().port())
}

/// A resolver that talks plain HTTP, as the mock server does.
pub fn local_resolver() -> KeyResolver {
    KeyResolver::new(ResolverConfig::default().with_scheme(Scheme::Http)).unwrap()
}
