//! The symbol entity and its validator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::validate::{Rules, ValidationError, Validator};

pub const NAME_MAX_CHARS: usize = 100;
pub const CODE_MAX_CHARS: usize = 32;
pub const DESCRIPTION_MAX_CHARS: usize = 1000;

/// A tradable symbol, e.g. `BTC-USD`.
///
/// `id` is assigned by the store on create and is always positive once
/// persisted. `code` is unique across symbols.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symbol {
    pub id: i64,
    pub name: String,
    pub code: String,
    pub description: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

impl Symbol {
    /// A symbol that has not been stored yet.
    pub fn new(name: impl Into<String>, code: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            name: name.into(),
            code: code.into(),
            description: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.id = id;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn is_persisted(&self) -> bool {
        self.id > 0
    }
}

/// Structural rules for [`Symbol`].
///
/// - `name`: required, at most 100 characters
/// - `code`: required, at most 32 characters of `A-Z`, `0-9`, `.`, `-`, `_`
/// - `description`: at most 1000 characters
#[derive(Debug, Clone, Copy, Default)]
pub struct SymbolValidator;

fn is_code_char(c: char) -> bool {
    c.is_ascii_uppercase() || c.is_ascii_digit() || matches!(c, '.' | '-' | '_')
}

impl Validator<Symbol> for SymbolValidator {
    fn validate(&self, symbol: &Symbol) -> Result<(), ValidationError> {
        Rules::new()
            .required("name", &symbol.name)
            .max_chars("name", &symbol.name, NAME_MAX_CHARS)
            .required("code", &symbol.code)
            .max_chars("code", &symbol.code, CODE_MAX_CHARS)
            .charset(
                "code",
                &symbol.code,
                "uppercase letters, digits, '.', '-' and '_'",
                is_code_char,
            )
            .max_chars("description", &symbol.description, DESCRIPTION_MAX_CHARS)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_symbol() {
        let symbol = Symbol::new("Bitcoin", "BTC-USD").with_description("spot pair");
        assert!(SymbolValidator.validate(&symbol).is_ok());
        assert!(!symbol.is_persisted());
    }

    #[test]
    fn reports_every_violation() {
        let symbol = Symbol::new("", "btc usd").with_description("x".repeat(1001));
        let err = SymbolValidator.validate(&symbol).unwrap_err();

        assert!(err.has_field("name"));
        assert!(err.has_field("code"));
        assert!(err.has_field("description"));
        assert_eq!(err.violations().len(), 3);
    }

    #[test]
    fn length_is_counted_in_characters() {
        let name = "é".repeat(NAME_MAX_CHARS);
        assert!(SymbolValidator.validate(&Symbol::new(name, "E")).is_ok());

        let err = SymbolValidator
            .validate(&Symbol::new("ok", "A".repeat(CODE_MAX_CHARS + 1)))
            .unwrap_err();
        assert!(err.has_field("code"));
        assert!(!err.has_field("name"));
    }

    #[test]
    fn json_uses_millisecond_timestamps() {
        let symbol = Symbol::new("Ether", "ETH").with_id(7);
        let json = serde_json::to_value(&symbol).unwrap();
        assert_eq!(json["id"], 7);
        assert_eq!(json["created_at"], symbol.created_at.timestamp_millis());
    }
}
