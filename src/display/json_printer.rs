//! JSON output for verified claims.
//!
//! Claims are printed pretty with 2-space indentation for people, or on
//! a single line when `--json` asks for machine-readable output.

use std::io::Write;

use anyhow::Result;
use serde_json::Value;

/// Render a JSON value either pretty-printed or compact.
pub fn render_json(value: &Value, compact: bool) -> Result<String> {
    let rendered = if compact {
        serde_json::to_string(value)?
    } else {
        serde_json::to_string_pretty(value)?
    };
    Ok(rendered)
}

/// Print a JSON value to stdout followed by a newline.
pub fn print_json(value: &Value, compact: bool) -> Result<()> {
    let rendered = render_json(value, compact)?;
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{rendered}")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_json_compact_is_single_line() {
        let value = serde_json::json!({"id": "test1234", "roles": ["a", "b"]});
        let rendered = render_json(&value, true).unwrap();
        assert!(!rendered.contains('\n'));
        assert_eq!(rendered, r#"{"id":"test1234","roles":["a","b"]}"#);
    }

    #[test]
    fn test_render_json_pretty_uses_two_space_indent() {
        let value = serde_json::json!({"id": "test1234"});
        let rendered = render_json(&value, false).unwrap();
        assert_eq!(rendered, "{\n  \"id\": \"test1234\"\n}");
    }
}
