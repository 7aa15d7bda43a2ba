//! Handler for the `encode` subcommand.
//!
//! Signs a JSON claims object with an RSA private key read from a PEM
//! file and prints the resulting token. Claims are taken from the CLI
//! argument or, when omitted, from stdin.

use anyhow::{Context, Result, bail};
use serde_json::Value;
use zeroize::Zeroizing;

use crate::cli::EncodeArgs;
use crate::commands::read_stdin;

/// Execute the `encode` subcommand with the given arguments.
pub fn execute(args: &EncodeArgs) -> Result<()> {
    let private_key = Zeroizing::new(
        std::fs::read_to_string(&args.key_file).with_context(|| {
            format!("failed to read key file '{}'", args.key_file.display())
        })?,
    );

    let raw_claims = match &args.claims {
        Some(claims) => Zeroizing::new(claims.clone()),
        None => read_stdin("claims")?,
    };
    let claims = parse_claims(&raw_claims)?;

    let token = jwt_keyring::encode(&private_key, &args.kid, &claims)?;
    println!("{token}");
    Ok(())
}

/// Parse the claims argument, which must be a JSON object.
fn parse_claims(raw: &str) -> Result<Value> {
    let claims: Value = serde_json::from_str(raw).context("claims are not valid JSON")?;
    if !claims.is_object() {
        bail!("claims must be a JSON object");
    }
    Ok(claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_claims_accepts_object() {
        let claims = parse_claims(r#"{"sub":"1"}"#).unwrap();
        assert_eq!(claims["sub"], "1");
    }

    #[test]
    fn test_parse_claims_rejects_array() {
        let err = parse_claims("[1,2]").unwrap_err();
        assert!(err.to_string().contains("JSON object"));
    }

    #[test]
    fn test_parse_claims_rejects_invalid_json() {
        let err = parse_claims("{not json").unwrap_err();
        assert!(err.to_string().contains("not valid JSON"));
    }
}
