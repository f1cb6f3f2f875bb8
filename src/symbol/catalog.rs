//! SymbolCatalog - read model the worker keeps from symbol events.
//!
//! Delivery is at-least-once, so applying is idempotent: a message id that
//! was already applied is skipped. Only the most recent
//! [`DEFAULT_DEDUPE_WINDOW`] ids are remembered.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::{Arc, RwLock};

use tracing::debug;

use super::events::{decode_event, SymbolEvent, SYMBOL_TOPICS};
use crate::bus::{Message, Subscriber};
use crate::router::{HandlerError, Router, RouterError};

/// One catalog row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub id: i64,
    pub name: String,
    pub code: String,
    pub description: String,
    /// Number of events applied to this row.
    pub version: u64,
}

/// Number of applied message ids kept for duplicate detection.
pub const DEFAULT_DEDUPE_WINDOW: usize = 10_000;

/// Applied message ids, oldest evicted first.
struct AppliedWindow {
    ids: HashSet<String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl AppliedWindow {
    fn new(capacity: usize) -> Self {
        Self {
            ids: HashSet::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Returns false if `id` is already in the window.
    fn insert(&mut self, id: &str) -> bool {
        if self.ids.contains(id) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        self.ids.insert(id.to_string());
        self.order.push_back(id.to_string());
        true
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

struct CatalogState {
    entries: BTreeMap<i64, CatalogEntry>,
    applied: AppliedWindow,
}

/// Symbol catalog backed by a map. Clone-friendly via Arc.
#[derive(Clone)]
pub struct SymbolCatalog {
    state: Arc<RwLock<CatalogState>>,
}

impl Default for SymbolCatalog {
    fn default() -> Self {
        Self::with_dedupe_window(DEFAULT_DEDUPE_WINDOW)
    }
}

impl SymbolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog that remembers the last `window` applied message ids.
    pub fn with_dedupe_window(window: usize) -> Self {
        Self {
            state: Arc::new(RwLock::new(CatalogState {
                entries: BTreeMap::new(),
                applied: AppliedWindow::new(window),
            })),
        }
    }

    /// Number of message ids currently remembered.
    pub fn remembered(&self) -> usize {
        self.state
            .read()
            .map(|state| state.applied.len())
            .unwrap_or_default()
    }

    /// Register a consumer for every symbol topic on `router`.
    pub fn register<S: Subscriber>(&self, router: &mut Router<S>) -> Result<(), RouterError> {
        for topic in SYMBOL_TOPICS {
            let catalog = self.clone();
            router.add_consumer(topic, move |message| catalog.apply(message))?;
        }
        Ok(())
    }

    /// Apply one event message. Returns `Ok` without changes for a message
    /// that was already applied.
    pub fn apply(&self, message: &Message) -> Result<(), HandlerError> {
        let event = decode_event(message)?;
        let mut state = self
            .state
            .write()
            .map_err(|_| HandlerError::other("catalog lock poisoned"))?;

        if !message.uuid.is_empty() && !state.applied.insert(&message.uuid) {
            debug!(message_id = %message.uuid, "duplicate delivery skipped");
            return Ok(());
        }

        match event {
            SymbolEvent::Created(e) => {
                upsert(&mut state.entries, e.id, e.name, e.code, e.description)
            }
            SymbolEvent::Updated(e) => {
                upsert(&mut state.entries, e.id, e.name, e.code, e.description)
            }
            SymbolEvent::Deleted(e) => {
                state.entries.remove(&e.id);
            }
        }
        Ok(())
    }

    pub fn get(&self, id: i64) -> Option<CatalogEntry> {
        self.state
            .read()
            .ok()
            .and_then(|state| state.entries.get(&id).cloned())
    }

    /// All rows in ascending id order.
    pub fn entries(&self) -> Vec<CatalogEntry> {
        self.state
            .read()
            .map(|state| state.entries.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.state
            .read()
            .map(|state| state.entries.len())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn upsert(
    entries: &mut BTreeMap<i64, CatalogEntry>,
    id: i64,
    name: String,
    code: String,
    description: String,
) {
    let version = entries.get(&id).map_or(1, |entry| entry.version + 1);
    entries.insert(
        id,
        CatalogEntry {
            id,
            name,
            code,
            description,
            version,
        },
    );
}
