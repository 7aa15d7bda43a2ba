//! Handler for the `decode` subcommand.
//!
//! Verifies a token against the public key published by the key endpoint
//! and prints its claims. Supports reading the token from a CLI argument,
//! environment variable, or stdin.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::Value;
use zeroize::Zeroizing;

use jwt_keyring::{Decoder, KeyCache, KeyFetchOptions, KeyResolver, ResolverConfig, Scheme};

use crate::cli::DecodeArgs;
use crate::commands::{read_stdin, trimmed};
use crate::display::json_printer::print_json;

/// Execute the `decode` subcommand with the given arguments.
pub async fn execute(args: &DecodeArgs) -> Result<()> {
    let token = read_token(args)?;

    let resolver = KeyResolver::new(resolver_config(args))?;
    let decoder = Decoder::new(resolver, Arc::new(KeyCache::new()));

    let claims: Value = decoder
        .decode(&token, &fetch_options(args))
        .await
        .context("token could not be verified")?;

    print_json(&claims, args.json)?;
    Ok(())
}

/// Take the token from the argument, the named environment variable, or
/// stdin, in that order.
fn read_token(args: &DecodeArgs) -> Result<Zeroizing<String>> {
    if let Some(token) = &args.token {
        return Ok(Zeroizing::new(token.trim().to_string()));
    }
    if let Some(name) = &args.token_env {
        let token = Zeroizing::new(
            std::env::var(name)
                .with_context(|| format!("environment variable '{name}' is not set"))?,
        );
        return trimmed(token).with_context(|| format!("environment variable '{name}' is empty"));
    }
    read_stdin("token")
}

fn resolver_config(args: &DecodeArgs) -> ResolverConfig {
    let scheme = if args.insecure_http {
        Scheme::Http
    } else {
        Scheme::Https
    };
    ResolverConfig::default()
        .with_scheme(scheme)
        .with_timeout(Duration::from_secs(args.timeout))
}

fn fetch_options(args: &DecodeArgs) -> KeyFetchOptions {
    let mut options = KeyFetchOptions::new(&args.host, &args.path);
    options.port = args.port;
    options.method.clone_from(&args.method);
    for (name, value) in &args.headers {
        options.headers.insert(name.clone(), value.clone());
    }
    options
}
