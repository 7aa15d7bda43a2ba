//! jwt-keyring: issue and verify RS256 tokens whose public keys are
//! resolved from a remote key endpoint and cached.
//!
//! Tokens are `base64(header).base64(claims).base64(signature)` with the
//! standard base64 alphabet. [`encode`] signs claims with a private key;
//! [`Decoder`] looks the verification key up by the header's `kid`, checks
//! the signature and only then hands back the claims.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use jwt_keyring::{Decoder, KeyCache, KeyFetchOptions, KeyResolver, ResolverConfig};
//!
//! # async fn example(token: &str) -> Result<(), jwt_keyring::KeyringError> {
//! let decoder = Decoder::new(
//!     KeyResolver::new(ResolverConfig::default())?,
//!     Arc::new(KeyCache::new()),
//! );
//! let options = KeyFetchOptions::new("keys.example.com", "/public-keys");
//! let claims: serde_json::Value = decoder.decode(token, &options).await?;
//! # let _ = claims;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

pub mod core;
pub mod error;

pub use crate::core::decoder::{Decoder, KeyCache, KeyRequest};
pub use crate::core::encoder::encode;
pub use crate::core::memo::{InFlight, InMemoryStore, MemoCache, MemoStore, Memoized, memoize};
pub use crate::core::resolver::{KeyFetchOptions, KeyResolver, ResolverConfig, Scheme};
pub use crate::error::KeyringError;
