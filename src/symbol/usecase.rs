//! Symbol use cases.
//!
//! Every write runs the repository call and the event publish inside one
//! unit of work:
//!
//! ```text
//! validate ─► in_tx { repo write ─► prepare ─► publish event } ─► commit
//!                          │            │            │
//!                          └── Err ─────┴────────────┴──► rollback ─► DomainError
//! ```
//!
//! The store prepares before the event leaves, so a conflict or a refused
//! commit never reaches the bus, and a failed publish rolls the write back.
//! Delivery to consumers is at-least-once.

use tracing::{error, info, warn};

use super::events::SymbolEvents;
use super::model::Symbol;
use super::repository::{SymbolQuery, SymbolRepository};
use crate::bus::{PublishError, Publisher};
use crate::context::Context;
use crate::error::{map_data_error, DataError, DomainError};
use crate::tx::TxManager;
use crate::validate::Validator;

/// What can abort a unit of work.
enum TxFailure {
    Data(DataError),
    Publish(PublishError),
}

impl From<DataError> for TxFailure {
    fn from(err: DataError) -> Self {
        TxFailure::Data(err)
    }
}

impl From<PublishError> for TxFailure {
    fn from(err: PublishError) -> Self {
        TxFailure::Publish(err)
    }
}

/// Create, update, delete, get and list symbols.
///
/// ## Example
///
/// ```ignore
/// let store = InMemorySymbolStore::new();
/// let usecase = SymbolUseCase::new(
///     store.clone(),
///     store,
///     SymbolEvents::new(EventPublisher::new(queue.clone())),
///     SymbolValidator,
/// );
///
/// let created = usecase.create(&ctx, Symbol::new("Bitcoin", "BTC"))?;
/// ```
pub struct SymbolUseCase<M, R, P, V> {
    tx: M,
    repo: R,
    events: SymbolEvents<P>,
    validator: V,
}

impl<M, R, P, V> SymbolUseCase<M, R, P, V>
where
    M: TxManager,
    R: SymbolRepository<Tx = M::Tx>,
    P: Publisher,
    V: Validator<Symbol>,
{
    pub fn new(tx: M, repo: R, events: SymbolEvents<P>, validator: V) -> Self {
        Self {
            tx,
            repo,
            events,
            validator,
        }
    }

    pub fn events(&self) -> &SymbolEvents<P> {
        &self.events
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    /// Store a new symbol and publish `symbol.created`.
    pub fn create(&self, ctx: &Context, symbol: Symbol) -> Result<Symbol, DomainError> {
        self.validate(ctx, &symbol)?;

        let created = self
            .tx
            .in_tx(ctx, |uow| -> Result<Symbol, TxFailure> {
                let created = self.repo.create(uow.tx(), &symbol)?;
                uow.prepare()?;
                self.events.publish_symbol_created(uow.ctx(), Some(&created))?;
                Ok(created)
            })
            .map_err(|failure| self.translate(ctx, "create", failure))?;

        info!(parent: &ctx.span(), symbol_id = created.id, code = %created.code, "symbol created");
        Ok(created)
    }

    /// Replace a stored symbol and publish `symbol.updated`.
    pub fn update(&self, ctx: &Context, symbol: Symbol) -> Result<Symbol, DomainError> {
        check_id(symbol.id)?;
        self.validate(ctx, &symbol)?;

        let updated = self
            .tx
            .in_tx(ctx, |uow| -> Result<Symbol, TxFailure> {
                let updated = self.repo.update(uow.tx(), &symbol)?;
                uow.prepare()?;
                self.events.publish_symbol_updated(uow.ctx(), Some(&updated))?;
                Ok(updated)
            })
            .map_err(|failure| self.translate(ctx, "update", failure))?;

        info!(parent: &ctx.span(), symbol_id = updated.id, "symbol updated");
        Ok(updated)
    }

    /// Remove a symbol and publish `symbol.deleted` carrying its last
    /// state. A missing symbol fails before any transaction is opened.
    pub fn delete(&self, ctx: &Context, id: i64) -> Result<(), DomainError> {
        check_id(id)?;
        let existing = self
            .repo
            .find_by_id(ctx, id)
            .map_err(|err| self.translate(ctx, "delete", err.into()))?;

        self.tx
            .in_tx(ctx, |uow| -> Result<(), TxFailure> {
                self.repo.delete(uow.tx(), id)?;
                uow.prepare()?;
                self.events.publish_symbol_deleted(uow.ctx(), Some(&existing))?;
                Ok(())
            })
            .map_err(|failure| self.translate(ctx, "delete", failure))?;

        info!(parent: &ctx.span(), symbol_id = id, "symbol deleted");
        Ok(())
    }

    pub fn get(&self, ctx: &Context, id: i64) -> Result<Symbol, DomainError> {
        check_id(id)?;
        self.repo
            .find_by_id(ctx, id)
            .map_err(|err| self.translate(ctx, "get", err.into()))
    }

    pub fn list(&self, ctx: &Context, query: &SymbolQuery) -> Result<Vec<Symbol>, DomainError> {
        self.repo
            .list(ctx, &query.normalized())
            .map_err(|err| self.translate(ctx, "list", err.into()))
    }

    fn validate(&self, ctx: &Context, symbol: &Symbol) -> Result<(), DomainError> {
        self.validator.validate(symbol).map_err(|err| {
            warn!(parent: &ctx.span(), error = %err, "symbol validation failed");
            DomainError::from(err)
        })
    }

    /// Log the underlying failure on the request span, then translate it.
    fn translate(&self, ctx: &Context, operation: &'static str, failure: TxFailure) -> DomainError {
        let span = ctx.span();
        let _entered = span.enter();
        match failure {
            TxFailure::Data(err @ DataError::NotFound) => {
                warn!(operation, error = %err, "symbol not found");
                map_data_error(err)
            }
            TxFailure::Data(err) => {
                error!(operation, error = %err, "data operation failed");
                map_data_error(err)
            }
            TxFailure::Publish(err) => {
                error!(operation, error = %err, "event publish failed, write rolled back");
                DomainError::DatabaseOperation(Box::new(err))
            }
        }
    }
}

fn check_id(id: i64) -> Result<(), DomainError> {
    if id <= 0 {
        return Err(DomainError::InvalidId(id));
    }
    Ok(())
}
