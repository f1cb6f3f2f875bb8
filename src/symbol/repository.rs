//! Repository trait for symbols.

use crate::context::Context;
use crate::error::DataError;

use super::model::Symbol;

pub const DEFAULT_LIST_LIMIT: usize = 50;
pub const MAX_LIST_LIMIT: usize = 500;

/// Filter and page for [`SymbolRepository::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolQuery {
    /// Case-insensitive substring of the name.
    pub name: Option<String>,
    pub offset: usize,
    pub limit: usize,
}

impl Default for SymbolQuery {
    fn default() -> Self {
        Self {
            name: None,
            offset: 0,
            limit: DEFAULT_LIST_LIMIT,
        }
    }
}

impl SymbolQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// A zero limit means the default; anything above the maximum is capped.
    pub fn normalized(&self) -> Self {
        let limit = match self.limit {
            0 => DEFAULT_LIST_LIMIT,
            n => n.min(MAX_LIST_LIMIT),
        };
        Self {
            name: self.name.clone().filter(|n| !n.trim().is_empty()),
            offset: self.offset,
            limit,
        }
    }

    pub fn matches(&self, symbol: &Symbol) -> bool {
        match &self.name {
            Some(name) => symbol.name.to_lowercase().contains(&name.to_lowercase()),
            None => true,
        }
    }
}

/// Storage for symbols.
///
/// Writes take the open transaction; reads take only the context and never
/// see uncommitted writes. Every method returns [`DataError`] only.
pub trait SymbolRepository: Send + Sync {
    type Tx;

    /// Insert `symbol`, assigning its id and timestamps.
    fn create(&self, tx: &mut Self::Tx, symbol: &Symbol) -> Result<Symbol, DataError>;

    /// Replace the stored fields of `symbol.id`. [`DataError::NotFound`] if
    /// there is no such row.
    fn update(&self, tx: &mut Self::Tx, symbol: &Symbol) -> Result<Symbol, DataError>;

    /// [`DataError::NotFound`] if there is no such row.
    fn delete(&self, tx: &mut Self::Tx, id: i64) -> Result<(), DataError>;

    fn find_by_id(&self, ctx: &Context, id: i64) -> Result<Symbol, DataError>;

    /// Matching symbols in ascending id order.
    fn list(&self, ctx: &Context, query: &SymbolQuery) -> Result<Vec<Symbol>, DataError>;
}
