//! Lexical helpers over SQL text.
//!
//! These are not a parser. They walk the text once, skipping string
//! literals, quoted identifiers and comments, which is enough to split
//! compound texts, find leading keywords and count placeholders.

use super::placeholder::PlaceholderScheme;

/// Keywords that start a statement which changes data or schema.
const MUTATING_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "REPLACE", "MERGE", "UPSERT", "CREATE", "DROP", "ALTER",
    "TRUNCATE", "RENAME", "GRANT", "REVOKE", "COMMENT", "REINDEX", "VACUUM",
];

/// Keywords that make a `WITH` statement mutating when they appear as DML.
const DML_KEYWORDS: &[&str] = &["INSERT", "UPDATE", "DELETE", "REPLACE", "MERGE"];

/// A significant piece of SQL text: everything outside literals and comments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token<'a> {
    Word(&'a str),
    Symbol(char, usize),
    Literal,
}

/// Walk `sql` and call `visit` for each token.
fn scan<'a>(sql: &'a str, mut visit: impl FnMut(Token<'a>)) {
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        match c {
            b'\'' | b'"' | b'`' => {
                i = skip_quoted(bytes, i, c);
                visit(Token::Literal);
            }
            b'[' => {
                i = skip_quoted(bytes, i, b']');
                visit(Token::Literal);
            }
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i += 2;
                while i < bytes.len() && !(bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/')) {
                    i += 1;
                }
                i = (i + 2).min(bytes.len());
            }
            c if c.is_ascii_alphabetic() || c == b'_' => {
                let start = i;
                while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                    i += 1;
                }
                visit(Token::Word(&sql[start..i]));
            }
            c if c.is_ascii_whitespace() => i += 1,
            _ => {
                visit(Token::Symbol(c as char, i));
                i += 1;
            }
        }
    }
}

/// Return the index just past the closing quote. Doubled quotes escape.
fn skip_quoted(bytes: &[u8], start: usize, close: u8) -> usize {
    let mut i = start + 1;
    while i < bytes.len() {
        if bytes[i] == close {
            if close != b']' && bytes.get(i + 1) == Some(&close) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

/// Split a compound text on top-level semicolons.
///
/// Empty statements are dropped and each piece is trimmed.
pub fn split_statements(sql: &str) -> Vec<&str> {
    let mut statements = Vec::new();
    let mut start = 0;
    scan(sql, |token| {
        if let Token::Symbol(';', at) = token {
            statements.push(&sql[start..at]);
            start = at + 1;
        }
    });
    statements.push(&sql[start..]);
    statements
        .into_iter()
        .map(str::trim)
        .filter(|s| has_content(s))
        .collect()
}

fn has_content(sql: &str) -> bool {
    let mut found = false;
    scan(sql, |_| found = true);
    found
}

/// The first keyword of a statement, upper-cased.
pub fn leading_keyword(sql: &str) -> Option<String> {
    let mut first = None;
    scan(sql, |token| {
        if first.is_none() {
            if let Token::Word(word) = token {
                first = Some(word.to_ascii_uppercase());
            }
        }
    });
    first
}

/// Whether any statement in `sql` changes data or schema.
pub fn is_mutating(sql: &str) -> bool {
    split_statements(sql).into_iter().any(statement_is_mutating)
}

fn statement_is_mutating(statement: &str) -> bool {
    match leading_keyword(statement).as_deref() {
        Some("WITH") => DML_KEYWORDS.iter().any(|k| contains_keyword(statement, k)),
        Some(keyword) => MUTATING_KEYWORDS.contains(&keyword),
        None => false,
    }
}

/// Whether `keyword` appears as a word outside literals and comments.
pub fn contains_keyword(sql: &str, keyword: &str) -> bool {
    let mut found = false;
    scan(sql, |token| {
        if let Token::Word(word) = token {
            found |= word.eq_ignore_ascii_case(keyword);
        }
    });
    found
}

/// Number of parameters `sql` expects under `scheme`.
///
/// Positional placeholders are counted; numbered ones report the highest
/// number used.
pub fn parameter_count(sql: &str, scheme: PlaceholderScheme) -> usize {
    let bytes = sql.as_bytes();
    let marker = scheme.marker();
    let mut count = 0;
    scan(sql, |token| {
        let Token::Symbol(c, at) = token else { return };
        if c != marker {
            return;
        }
        let digits = bytes[at + 1..]
            .iter()
            .take_while(|b| b.is_ascii_digit())
            .count();
        match scheme {
            PlaceholderScheme::Positional => count += 1,
            PlaceholderScheme::Numbered | PlaceholderScheme::Dollar if digits > 0 => {
                let n = sql[at + 1..at + 1 + digits].parse::<usize>().unwrap_or(0);
                count = count.max(n);
            }
            _ => {}
        }
    });
    count
}
