//! Identifier quoting for SQL text built by the connection layer.

/// Quote `s` with `quote_char`, doubling any embedded quote characters.
pub fn quote_with(s: &str, quote_char: char) -> String {
    let mut result = String::with_capacity(s.len() + 2);
    result.push(quote_char);
    for c in s.chars() {
        if c == quote_char {
            result.push(c);
        }
        result.push(c);
    }
    result.push(quote_char);
    result
}

/// Quote an identifier (savepoint, table, column name).
#[inline]
pub fn quote_identifier(s: &str) -> String {
    quote_with(s, '"')
}
