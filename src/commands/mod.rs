//! Command handlers for each CLI subcommand.
//!
//! Each subcommand is implemented in its own module and exposes
//! a single `execute` function that receives the parsed arguments.

pub mod decode;
pub mod encode;

use std::io::{IsTerminal, Read};

use anyhow::{Context, Result, bail};
use zeroize::Zeroizing;

/// Read a value from standard input, trimming surrounding whitespace.
///
/// Refuses to block on an interactive terminal; `what` names the missing
/// input in the error message. Every buffer holding the input is wiped
/// on drop.
pub(crate) fn read_stdin(what: &str) -> Result<Zeroizing<String>> {
    let mut stdin = std::io::stdin();
    if stdin.is_terminal() {
        bail!("no {what} provided: pass it as an argument or through stdin");
    }

    let mut input = Zeroizing::new(String::new());
    stdin
        .read_to_string(&mut input)
        .with_context(|| format!("failed to read {what} from stdin"))?;

    trimmed(input).with_context(|| format!("no {what} provided: stdin was empty"))
}

/// Trim `input` without leaving an unwiped copy behind, or `None` if
/// nothing but whitespace remains.
pub(crate) fn trimmed(input: Zeroizing<String>) -> Option<Zeroizing<String>> {
    let value = input.trim();
    if value.is_empty() {
        return None;
    }
    if value.len() == input.len() {
        return Some(input);
    }
    Some(Zeroizing::new(value.to_string()))
}
