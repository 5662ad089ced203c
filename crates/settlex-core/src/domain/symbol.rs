use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::ValidationError;

const MAX_SYMBOL_LEN: usize = 16;

/// Alphabetic root of a series code, e.g. `HTI` for `HTI2308`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol(String);

impl Symbol {
    /// Upper-cased, trimmed, ASCII letters only.
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let root = input.trim().to_ascii_uppercase();
        if root.is_empty() {
            return Err(ValidationError::EmptySymbol);
        }
        if let Some((index, ch)) = root
            .chars()
            .enumerate()
            .find(|(_, ch)| !ch.is_ascii_alphabetic())
        {
            return Err(ValidationError::SymbolInvalidChar { ch, index });
        }
        // All ASCII from here, so bytes are characters.
        if root.len() > MAX_SYMBOL_LEN {
            return Err(ValidationError::SymbolTooLong {
                len: root.len(),
                max: MAX_SYMBOL_LEN,
            });
        }
        Ok(Self(root))
    }

    /// Leading alphabetic prefix of `series`, if it has one.
    pub fn from_series(series: &str) -> Option<Self> {
        let prefix: String = series
            .trim()
            .chars()
            .take_while(char::is_ascii_alphabetic)
            .collect();
        Self::parse(&prefix).ok()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Symbol {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for Symbol {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Symbol> for String {
    fn from(value: Symbol) -> Self {
        value.0
    }
}
