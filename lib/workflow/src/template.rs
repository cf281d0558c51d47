//! Template resolution for message bodies, notes and webhook URLs.
//!
//! Templates contain `{{variable}}` tokens resolved from the execution
//! context in a single left-to-right pass. Substituted output is never
//! re-scanned, so a context value containing `{{...}}` cannot trigger a
//! second substitution. Tokens whose variable is absent from the context
//! are left literal and reported back to the caller, which logs them.

use crate::context::ExecutionContext;
use serde_json::Value as JsonValue;

/// The result of resolving a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    /// The resolved text.
    pub text: String,
    /// Variable names that had no value in the context. Their tokens were
    /// left literal in `text`.
    pub unresolved: Vec<String>,
}

impl Rendered {
    /// Returns true if every token was resolved.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.unresolved.is_empty()
    }
}

/// Resolves `{{variable}}` tokens in a template against the context.
///
/// Whitespace inside the braces is tolerated (`{{ nome }}` equals
/// `{{nome}}`). Unterminated `{{` is copied through literally.
#[must_use]
pub fn resolve(template: &str, context: &ExecutionContext) -> Rendered {
    let mut text = String::with_capacity(template.len());
    let mut unresolved = Vec::new();
    let mut rest = template;

    while let Some(open) = rest.find("{{") {
        text.push_str(&rest[..open]);
        let after_open = &rest[open + 2..];

        let Some(close) = after_open.find("}}") else {
            // No closing braces in the remainder; keep it literal.
            text.push_str(&rest[open..]);
            rest = "";
            break;
        };

        let raw_name = &after_open[..close];
        let name = raw_name.trim();

        match context.get(name) {
            Some(value) => text.push_str(&stringify(value)),
            None => {
                text.push_str(&rest[open..open + 2 + close + 2]);
                unresolved.push(name.to_string());
            }
        }

        rest = &after_open[close + 2..];
    }

    text.push_str(rest);
    Rendered { text, unresolved }
}

/// Stringifies a context value for interpolation.
///
/// Strings are inserted verbatim (no quotes); everything else uses its
/// compact JSON form.
fn stringify(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}
