//! Lexical helpers over raw SQL text.
//!
//! No parsing: these only separate code from string literals and
//! comments, then split what remains into word tokens.

use std::collections::BTreeSet;

/// Lowercase identifier-like tokens appearing in `sql` outside literals and comments.
pub fn identifier_tokens(sql: &str) -> BTreeSet<String> {
    let sanitized = sanitize_sql(sql);
    let mut tokens = BTreeSet::new();
    let mut current = String::new();
    for ch in sanitized.chars() {
        if ch.is_ascii_alphanumeric() || ch == '_' {
            current.push(ch.to_ascii_lowercase());
        } else if !current.is_empty() {
            tokens.insert(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        tokens.insert(current);
    }
    tokens
}

/// Replace string literals and comments with spaces.
///
/// Double-quoted identifiers keep their text; only the quotes are blanked.
///
/// Output has the same number of chars as the input, so positions line up.
pub fn sanitize_sql(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();
    let mut in_single = false;
    let mut in_double = false;
    let mut in_line_comment = false;
    let mut in_block_comment = false;

    while let Some(ch) = chars.next() {
        if in_line_comment {
            if ch == '\n' {
                in_line_comment = false;
            }
            out.push(' ');
            continue;
        }
        if in_block_comment {
            if ch == '*' && matches!(chars.peek(), Some('/')) {
                chars.next();
                in_block_comment = false;
                out.push_str("  ");
                continue;
            }
            out.push(' ');
            continue;
        }
        if in_single {
            if ch == '\'' {
                if matches!(chars.peek(), Some('\'')) {
                    chars.next();
                    out.push_str("  ");
                    continue;
                }
                in_single = false;
            }
            out.push(' ');
            continue;
        }
        if in_double {
            if ch == '"' {
                in_double = false;
                out.push(' ');
            } else {
                out.push(ch);
            }
            continue;
        }

        match ch {
            '-' if matches!(chars.peek(), Some('-')) => {
                chars.next();
                in_line_comment = true;
                out.push_str("  ");
            }
            '/' if matches!(chars.peek(), Some('*')) => {
                chars.next();
                in_block_comment = true;
                out.push_str("  ");
            }
            '\'' => {
                in_single = true;
                out.push(' ');
            }
            '"' => {
                in_double = true;
                out.push(' ');
            }
            _ => out.push(ch),
        }
    }

    out
}
