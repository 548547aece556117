//! SQL text helpers

/// Quote an identifier for SQLite
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// `alias."column"`, or just the quoted column when alias is empty
pub fn qualified(alias: &str, column: &str) -> String {
    if alias.is_empty() {
        quote_ident(column)
    } else {
        format!("{}.{}", alias, quote_ident(column))
    }
}

/// `?, ?, ?` for `n` parameters
pub fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// Escape LIKE wildcards so the text matches literally with `ESCAPE '\'`
pub fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
