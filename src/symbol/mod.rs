//! The symbol domain: entity, events, storage and use cases.
//!
//! ```text
//! SymbolUseCase ──► TxManager::in_tx ──► SymbolRepository (write)
//!                          │
//!                          └──────────► SymbolEvents ──► Publisher ──► symbol.* topics
//!
//! Router (worker) ──► SymbolCatalog::apply
//! ```

mod catalog;
mod events;
mod model;
mod repository;
mod store;
mod usecase;

pub use catalog::{CatalogEntry, SymbolCatalog, DEFAULT_DEDUPE_WINDOW};
pub use events::{
    decode_event, DecodeEventError, SymbolCreated, SymbolDeleted, SymbolEvent, SymbolEvents,
    SymbolUpdated, SYMBOL_CREATED, SYMBOL_DELETED, SYMBOL_TOPICS, SYMBOL_UPDATED,
};
pub use model::{Symbol, SymbolValidator, CODE_MAX_CHARS, DESCRIPTION_MAX_CHARS, NAME_MAX_CHARS};
pub use repository::{SymbolQuery, SymbolRepository, DEFAULT_LIST_LIMIT, MAX_LIST_LIMIT};
pub use store::{InMemorySymbolStore, StoreTx};
pub use usecase::SymbolUseCase;
