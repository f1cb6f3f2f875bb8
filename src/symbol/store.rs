//! In-memory symbol store with staged transactions.
//!
//! Writes are staged on a [`StoreTx`] and only become visible on commit.
//! `prepare` reserves the codes a transaction writes, under the table lock,
//! so a prepared transaction always commits. Ids come from a sequence that,
//! like a database sequence, is not rewound by a rollback.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use tracing::debug;

use super::model::Symbol;
use super::repository::{SymbolQuery, SymbolRepository};
use crate::context::Context;
use crate::error::DataError;
use crate::tx::TxManager;

#[derive(Debug, Clone)]
enum Staged {
    Insert(Symbol),
    Update(Symbol),
    Delete,
}

/// One open transaction on an [`InMemorySymbolStore`].
#[derive(Debug)]
pub struct StoreTx {
    id: u64,
    staged: BTreeMap<i64, Staged>,
    prepared: bool,
}

impl StoreTx {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Number of staged writes.
    pub fn pending(&self) -> usize {
        self.staged.len()
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    /// Codes this transaction would hold after commit.
    fn codes(&self) -> impl Iterator<Item = (i64, &str)> {
        self.staged.iter().filter_map(|(id, staged)| match staged {
            Staged::Insert(symbol) | Staged::Update(symbol) => Some((*id, symbol.code.as_str())),
            Staged::Delete => None,
        })
    }
}

#[derive(Default)]
struct Table {
    rows: BTreeMap<i64, Symbol>,
    /// Codes held by prepared transactions, by transaction id.
    reserved: HashMap<String, u64>,
}

impl Table {
    fn release(&mut self, tx: u64) {
        self.reserved.retain(|_, holder| *holder != tx);
    }
}

#[derive(Default)]
struct Counters {
    begun: AtomicUsize,
    committed: AtomicUsize,
    rolled_back: AtomicUsize,
}

/// Thread-safe in-memory symbol table.
///
/// Cloning creates another handle to the same storage. Implements both
/// [`TxManager`] and [`SymbolRepository`], the way one database handle
/// serves both roles.
#[derive(Clone)]
pub struct InMemorySymbolStore {
    table: Arc<RwLock<Table>>,
    next_id: Arc<AtomicI64>,
    next_tx: Arc<AtomicU64>,
    fail_commits: Arc<AtomicBool>,
    counters: Arc<Counters>,
}

impl Default for InMemorySymbolStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemorySymbolStore {
    pub fn new() -> Self {
        Self::with_next_id(1)
    }

    /// Start the id sequence at `next_id`.
    pub fn with_next_id(next_id: i64) -> Self {
        Self {
            table: Arc::new(RwLock::new(Table::default())),
            next_id: Arc::new(AtomicI64::new(next_id.max(1))),
            next_tx: Arc::new(AtomicU64::new(1)),
            fail_commits: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Make every commit fail until switched off. The failure is reported
    /// by `prepare`, before anything else happens in the unit of work.
    pub fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    pub fn begun(&self) -> usize {
        self.counters.begun.load(Ordering::SeqCst)
    }

    pub fn committed(&self) -> usize {
        self.counters.committed.load(Ordering::SeqCst)
    }

    pub fn rolled_back(&self) -> usize {
        self.counters.rolled_back.load(Ordering::SeqCst)
    }

    /// Number of committed rows.
    pub fn len(&self) -> usize {
        self.table
            .read()
            .map(|table| table.rows.len())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of codes held by prepared, not yet committed transactions.
    pub fn reserved(&self) -> usize {
        self.table
            .read()
            .map(|table| table.reserved.len())
            .unwrap_or_default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Table>, DataError> {
        self.table
            .read()
            .map_err(|_| DataError::Database("lock poisoned: read".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Table>, DataError> {
        self.table
            .write()
            .map_err(|_| DataError::Database("lock poisoned: write".into()))
    }

    /// The row as the transaction sees it.
    fn visible(rows: &BTreeMap<i64, Symbol>, tx: &StoreTx, id: i64) -> Option<Symbol> {
        match tx.staged.get(&id) {
            Some(Staged::Insert(symbol)) | Some(Staged::Update(symbol)) => Some(symbol.clone()),
            Some(Staged::Delete) => None,
            None => rows.get(&id).cloned(),
        }
    }

    /// Whether `code` is held by a committed row, another transaction's
    /// reservation, or another staged write of `tx`.
    fn code_taken(table: &Table, tx: &StoreTx, code: &str, except: i64) -> bool {
        let committed = table
            .rows
            .values()
            .filter(|row| row.id != except && !tx.staged.contains_key(&row.id))
            .any(|row| row.code == code);
        let reserved = table
            .reserved
            .get(code)
            .is_some_and(|holder| *holder != tx.id);
        let staged = tx.codes().any(|(id, staged)| id != except && staged == code);
        committed || reserved || staged
    }
}

impl TxManager for InMemorySymbolStore {
    type Tx = StoreTx;

    fn begin(&self, _ctx: &Context) -> Result<StoreTx, DataError> {
        self.counters.begun.fetch_add(1, Ordering::SeqCst);
        let id = self.next_tx.fetch_add(1, Ordering::SeqCst);
        debug!(tx = id, "transaction begun");
        Ok(StoreTx {
            id,
            staged: BTreeMap::new(),
            prepared: false,
        })
    }

    fn prepare(&self, tx: &mut StoreTx) -> Result<(), DataError> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(DataError::Database("commit rejected".into()));
        }
        let mut table = self.write()?;

        // Another transaction may have taken a code since it was staged.
        for (id, code) in tx.codes() {
            if Self::code_taken(&table, &*tx, code, id) {
                return Err(DataError::Duplicate(code.to_string()));
            }
        }

        table.release(tx.id);
        for (_, code) in tx.codes() {
            table.reserved.insert(code.to_string(), tx.id);
        }
        tx.prepared = true;
        debug!(tx = tx.id, "transaction prepared");
        Ok(())
    }

    fn commit(&self, mut tx: StoreTx) -> Result<(), DataError> {
        if !tx.prepared {
            self.prepare(&mut tx)?;
        }
        let mut table = self.write()?;

        table.release(tx.id);
        for (id, staged) in tx.staged {
            match staged {
                Staged::Insert(symbol) | Staged::Update(symbol) => {
                    table.rows.insert(id, symbol);
                }
                Staged::Delete => {
                    table.rows.remove(&id);
                }
            }
        }
        self.counters.committed.fetch_add(1, Ordering::SeqCst);
        debug!(tx = tx.id, "transaction committed");
        Ok(())
    }

    fn rollback(&self, tx: StoreTx) -> Result<(), DataError> {
        if tx.prepared {
            self.write()?.release(tx.id);
        }
        self.counters.rolled_back.fetch_add(1, Ordering::SeqCst);
        debug!(tx = tx.id, discarded = tx.staged.len(), "transaction rolled back");
        Ok(())
    }
}

impl SymbolRepository for InMemorySymbolStore {
    type Tx = StoreTx;

    fn create(&self, tx: &mut StoreTx, symbol: &Symbol) -> Result<Symbol, DataError> {
        let table = self.read()?;
        if Self::code_taken(&table, tx, &symbol.code, 0) {
            return Err(DataError::Duplicate(symbol.code.clone()));
        }

        let now = Utc::now();
        let created = Symbol {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            created_at: now,
            updated_at: now,
            ..symbol.clone()
        };
        tx.staged.insert(created.id, Staged::Insert(created.clone()));
        Ok(created)
    }

    fn update(&self, tx: &mut StoreTx, symbol: &Symbol) -> Result<Symbol, DataError> {
        let table = self.read()?;
        let existing = Self::visible(&table.rows, tx, symbol.id).ok_or(DataError::NotFound)?;
        if Self::code_taken(&table, tx, &symbol.code, symbol.id) {
            return Err(DataError::Duplicate(symbol.code.clone()));
        }

        let updated = Symbol {
            created_at: existing.created_at,
            updated_at: Utc::now(),
            ..symbol.clone()
        };
        let staged = match tx.staged.get(&symbol.id) {
            Some(Staged::Insert(_)) => Staged::Insert(updated.clone()),
            _ => Staged::Update(updated.clone()),
        };
        tx.staged.insert(symbol.id, staged);
        Ok(updated)
    }

    fn delete(&self, tx: &mut StoreTx, id: i64) -> Result<(), DataError> {
        let table = self.read()?;
        Self::visible(&table.rows, tx, id).ok_or(DataError::NotFound)?;

        if let Some(Staged::Insert(_)) = tx.staged.get(&id) {
            tx.staged.remove(&id);
        } else {
            tx.staged.insert(id, Staged::Delete);
        }
        Ok(())
    }

    fn find_by_id(&self, _ctx: &Context, id: i64) -> Result<Symbol, DataError> {
        self.read()?
            .rows
            .get(&id)
            .cloned()
            .ok_or(DataError::NotFound)
    }

    fn list(&self, _ctx: &Context, query: &SymbolQuery) -> Result<Vec<Symbol>, DataError> {
        let query = query.normalized();
        Ok(self
            .read()?
            .rows
            .values()
            .filter(|symbol| query.matches(symbol))
            .skip(query.offset)
            .take(query.limit)
            .cloned()
            .collect())
    }
}
