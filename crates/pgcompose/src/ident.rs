//! Safe SQL identifier handling.
//!
//! Every table, column, and alias reference in generated SQL passes through
//! [`quote`] before concatenation — this is the only point where raw
//! identifiers enter query text. Values never do; they travel in the
//! parameter array.

use crate::error::{ComposeError, ComposeResult};

/// Quote an identifier, escaping embedded `"` as `""`.
///
/// Quoting is unconditional: generated aliases contain `$` and `__`
/// separators, so relying on the unquoted-identifier grammar would be
/// fragile.
pub fn quote(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 2);
    out.push('"');
    for ch in name.chars() {
        if ch == '"' {
            out.push('"');
            out.push('"');
        } else {
            out.push(ch);
        }
    }
    out.push('"');
    out
}

/// Render a qualified `"alias"."column"` reference.
pub fn qualify(alias: &str, column: &str) -> String {
    let mut out = String::with_capacity(alias.len() + column.len() + 5);
    out.push_str(&quote(alias));
    out.push('.');
    out.push_str(&quote(column));
    out
}

/// Validate a user-supplied identifier: `[A-Za-z_][A-Za-z0-9_$]*`.
///
/// Schema and relationship registration reject anything else up front;
/// quoting would make odd names *safe*, but letting them in makes the
/// derived aliases and result-column names ambiguous.
pub fn ensure_valid(name: &str) -> ComposeResult<()> {
    if name.is_empty() {
        return Err(ComposeError::validation("Identifier cannot be empty"));
    }
    let mut chars = name.chars();
    let first = chars.next().expect("non-empty");
    if first != '_' && !first.is_ascii_alphabetic() {
        return Err(ComposeError::validation(format!(
            "Invalid identifier start character: '{first}'"
        )));
    }
    for c in chars {
        if c != '_' && c != '$' && !c.is_ascii_alphanumeric() {
            return Err(ComposeError::validation(format!(
                "Invalid character in identifier: '{c}'"
            )));
        }
    }
    Ok(())
}
