//! Structural validation of domain models.

use std::fmt;

use thiserror::Error;

/// A single rule a field failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub field: &'static str,
    pub reason: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.reason)
    }
}

/// Every violation found in one validation pass.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", join(.violations))]
pub struct ValidationError {
    violations: Vec<Violation>,
}

fn join(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(Violation::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ValidationError {
    pub fn single(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            violations: vec![Violation {
                field,
                reason: reason.into(),
            }],
        }
    }

    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    /// Whether `field` failed any rule.
    pub fn has_field(&self, field: &str) -> bool {
        self.violations.iter().any(|v| v.field == field)
    }
}

/// Pluggable validator consumed by the use cases.
pub trait Validator<T>: Send + Sync {
    fn validate(&self, value: &T) -> Result<(), ValidationError>;
}

/// Collects violations so a validator can report all of them at once.
#[derive(Debug, Default)]
pub struct Rules {
    violations: Vec<Violation>,
}

impl Rules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(&mut self, field: &'static str, value: &str) -> &mut Self {
        if value.trim().is_empty() {
            self.fail(field, "is required");
        }
        self
    }

    pub fn max_chars(&mut self, field: &'static str, value: &str, max: usize) -> &mut Self {
        if value.chars().count() > max {
            self.fail(field, format!("must be at most {} characters", max));
        }
        self
    }

    /// Every character must satisfy `allowed`; `what` describes the charset.
    pub fn charset(
        &mut self,
        field: &'static str,
        value: &str,
        what: &str,
        allowed: impl Fn(char) -> bool,
    ) -> &mut Self {
        if !value.chars().all(allowed) {
            self.fail(field, format!("may only contain {}", what));
        }
        self
    }

    pub fn fail(&mut self, field: &'static str, reason: impl Into<String>) -> &mut Self {
        self.violations.push(Violation {
            field,
            reason: reason.into(),
        });
        self
    }

    pub fn finish(&mut self) -> Result<(), ValidationError> {
        if self.violations.is_empty() {
            Ok(())
        } else {
            Err(ValidationError {
                violations: std::mem::take(&mut self.violations),
            })
        }
    }
}
