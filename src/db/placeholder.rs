//! SQL dialect placeholder schemes.
//!
//! A scheme maps a zero-based parameter index to the token written into SQL
//! text and to the identifier passed to `bind()`, and resolves identifiers
//! back to indexes.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// How a dialect writes parameter placeholders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaceholderScheme {
    /// `?`, bound by index in order of appearance.
    Positional,
    /// `?1`, `?2`, ... bound by index.
    #[default]
    Numbered,
    /// `$1`, `$2`, ... bound by name (`"$1"`).
    Dollar,
}

/// Identifier accepted by `Update::bind`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BindIdentifier {
    Index(usize),
    Name(String),
}

impl From<usize> for BindIdentifier {
    fn from(index: usize) -> Self {
        BindIdentifier::Index(index)
    }
}

impl From<&str> for BindIdentifier {
    fn from(name: &str) -> Self {
        BindIdentifier::Name(name.to_string())
    }
}

impl From<String> for BindIdentifier {
    fn from(name: String) -> Self {
        BindIdentifier::Name(name)
    }
}

impl fmt::Display for BindIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindIdentifier::Index(i) => write!(f, "index {}", i),
            BindIdentifier::Name(name) => write!(f, "'{}'", name),
        }
    }
}

impl PlaceholderScheme {
    /// The placeholder token for parameter `index`.
    pub fn placeholder(&self, index: usize) -> String {
        match self {
            PlaceholderScheme::Positional => "?".to_string(),
            PlaceholderScheme::Numbered => format!("?{}", index + 1),
            PlaceholderScheme::Dollar => format!("${}", index + 1),
        }
    }

    /// The bind identifier for parameter `index`.
    pub fn identifier(&self, index: usize) -> BindIdentifier {
        match self {
            PlaceholderScheme::Positional | PlaceholderScheme::Numbered => {
                BindIdentifier::Index(index)
            }
            PlaceholderScheme::Dollar => BindIdentifier::Name(self.placeholder(index)),
        }
    }

    /// Leading character of every placeholder token.
    pub(crate) fn marker(&self) -> char {
        match self {
            PlaceholderScheme::Positional | PlaceholderScheme::Numbered => '?',
            PlaceholderScheme::Dollar => '$',
        }
    }

    /// Resolve `identifier` to a zero-based index below `parameter_count`.
    pub fn resolve(&self, identifier: &BindIdentifier, parameter_count: usize) -> Result<usize> {
        let index = match (self, identifier) {
            (PlaceholderScheme::Positional | PlaceholderScheme::Numbered, BindIdentifier::Index(i)) => *i,
            (PlaceholderScheme::Dollar, BindIdentifier::Name(name)) => name
                .strip_prefix('$')
                .and_then(|n| n.parse::<usize>().ok())
                .filter(|n| *n > 0)
                .map(|n| n - 1)
                .ok_or_else(|| {
                    Error::bind(format!("identifier '{}' is not of the form $N", name))
                })?,
            (scheme, identifier) => {
                return Err(Error::bind(format!(
                    "identifier {} does not match the {:?} placeholder scheme",
                    identifier, scheme
                )));
            }
        };

        if index >= parameter_count {
            return Err(Error::bind(format!(
                "identifier {} is out of range, statement has {} parameter(s)",
                identifier, parameter_count
            )));
        }
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(PlaceholderScheme::Positional, 0, "?")]
    #[case(PlaceholderScheme::Numbered, 0, "?1")]
    #[case(PlaceholderScheme::Dollar, 2, "$3")]
    fn test_placeholder(#[case] scheme: PlaceholderScheme, #[case] index: usize, #[case] expected: &str) {
        assert_eq!(scheme.placeholder(index), expected);
    }

    #[rstest]
    fn test_identifier_round_trips_through_resolve() {
        for scheme in [
            PlaceholderScheme::Positional,
            PlaceholderScheme::Numbered,
            PlaceholderScheme::Dollar,
        ] {
            assert_eq!(scheme.resolve(&scheme.identifier(1), 2).unwrap(), 1);
        }
    }

    #[rstest]
    fn test_dollar_rejects_index() {
        let err = PlaceholderScheme::Dollar
            .resolve(&BindIdentifier::Index(0), 1)
            .unwrap_err();
        assert!(matches!(err, Error::Bind { .. }));
    }

    #[rstest]
    fn test_numbered_rejects_name() {
        let err = PlaceholderScheme::Numbered
            .resolve(&BindIdentifier::from("$1"), 1)
            .unwrap_err();
        assert!(matches!(err, Error::Bind { .. }));
    }

    #[rstest]
    #[case("$0")]
    #[case("$x")]
    #[case("1")]
    fn test_dollar_rejects_malformed_name(#[case] name: &str) {
        assert!(PlaceholderScheme::Dollar.resolve(&BindIdentifier::from(name), 5).is_err());
    }

    #[rstest]
    fn test_out_of_range() {
        let err = PlaceholderScheme::Numbered
            .resolve(&BindIdentifier::Index(1), 1)
            .unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[rstest]
    fn test_deserialize_scheme() {
        let scheme: PlaceholderScheme = serde_json::from_str("\"dollar\"").unwrap();
        assert_eq!(scheme, PlaceholderScheme::Dollar);
    }
}
