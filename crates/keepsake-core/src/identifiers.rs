//! Identifier checks and quoting for generated SQL.

use regex::Regex;
use std::sync::OnceLock;

/// Columns every persistent table carries ahead of the declared fields.
pub const RESERVED_COLUMNS: [&str; 4] = ["id", "owner_class", "owner_id", "created_at"];

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").unwrap_or_else(|_| unreachable!())
    })
}

/// Is `name` usable as a class, table, field or relationship name?
pub fn is_valid_identifier(name: &str) -> bool {
    identifier_pattern().is_match(name)
}

/// Is `name` one of the columns managed by the engine itself?
pub fn is_reserved(name: &str) -> bool {
    RESERVED_COLUMNS.contains(&name)
}

/// Quote a SQL identifier using ANSI double-quoting.
///
/// Embedded double-quotes are escaped by doubling them.
#[inline]
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Default table name for a class: `BlogPost` becomes `blog_post`.
pub fn table_name_for(class: &str) -> String {
    let mut out = String::with_capacity(class.len() + 4);
    let mut prev_lower = false;
    for ch in class.chars() {
        if ch.is_ascii_uppercase() {
            if prev_lower {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
            prev_lower = false;
        } else {
            prev_lower = ch.is_ascii_lowercase() || ch.is_ascii_digit();
            out.push(ch);
        }
    }
    out
}
