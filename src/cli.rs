//! CLI argument definitions for jwt-keyring.
//!
//! Uses `clap` derive macros to define the command-line interface.
//! Each subcommand has its own argument struct for type-safe parsing.
//!
//! # Security
//!
//! `DecodeArgs` implements a custom `Debug` to redact the token and
//! request header values, and prevent accidental leakage through debug
//! formatting, error chains, or logging.

use std::fmt;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use jwt_keyring::core::resolver::DEFAULT_TIMEOUT_SECS;

/// Issue and verify RS256 tokens whose public keys are fetched from a
/// remote key endpoint.
#[derive(Debug, Parser)]
#[command(name = "jwt-keyring")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Sign a JSON claims object with an RSA private key.
    Encode(EncodeArgs),

    /// Verify a token against the key endpoint and print its claims.
    Decode(DecodeArgs),
}

/// Arguments for the `encode` subcommand.
#[derive(Debug, clap::Args)]
pub struct EncodeArgs {
    /// JSON claims object to sign. If omitted, reads from stdin.
    pub claims: Option<String>,

    /// Path to a PEM-encoded RSA private key (PKCS#1 or PKCS#8).
    #[arg(long, value_name = "FILE")]
    pub key_file: PathBuf,

    /// Key ID written into the token header.
    #[arg(long, value_name = "KID")]
    pub kid: String,
}

/// Arguments for the `decode` subcommand.
#[derive(clap::Args)]
pub struct DecodeArgs {
    /// The token to verify. If omitted, reads from stdin.
    pub token: Option<String>,

    /// Read the token from the specified environment variable.
    #[arg(long, value_name = "VAR_NAME")]
    pub token_env: Option<String>,

    /// Host serving the public key set.
    #[arg(long)]
    pub host: String,

    /// Path of the public key set on the host.
    #[arg(long)]
    pub path: String,

    /// Port of the key endpoint [default: 443].
    #[arg(long)]
    pub port: Option<u16>,

    /// HTTP method for the key request [default: GET].
    #[arg(long)]
    pub method: Option<String>,

    /// Extra request header as "Name: value". May be repeated.
    ///
    /// WARNING: Passing credentials via CLI arguments may expose them in
    /// shell history.
    #[arg(long = "header", value_name = "NAME: VALUE", value_parser = parse_header)]
    pub headers: Vec<(String, String)>,

    /// Fetch keys over plain HTTP instead of HTTPS.
    #[arg(long)]
    pub insecure_http: bool,

    /// Key request timeout in seconds.
    #[arg(long, value_name = "SECS", default_value_t = DEFAULT_TIMEOUT_SECS)]
    pub timeout: u64,

    /// Output compact JSON (machine-readable).
    #[arg(long)]
    pub json: bool,
}

/// Parse a `Name: value` request header.
fn parse_header(s: &str) -> Result<(String, String), String> {
    let (name, value) = s
        .split_once(':')
        .ok_or_else(|| format!("expected 'Name: value', got '{s}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err("header name must not be empty".to_string());
    }
    Ok((name.to_string(), value.trim().to_string()))
}

/// Custom `Debug` that redacts the token and header values to prevent
/// accidental leakage through debug formatting or error chains.
impl fmt::Debug for DecodeArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let header_names: Vec<&str> = self.headers.iter().map(|(name, _)| name.as_str()).collect();
        f.debug_struct("DecodeArgs")
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("token_env", &self.token_env)
            .field("host", &self.host)
            .field("path", &self.path)
            .field("port", &self.port)
            .field("method", &self.method)
            .field("header_names", &header_names)
            .field("insecure_http", &self.insecure_http)
            .field("timeout", &self.timeout)
            .field("json", &self.json)
            .finish()
    }
}
