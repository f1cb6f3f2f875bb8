//! Transaction manager and unit of work.
//!
//! A unit of work commits in two phases. `prepare` is the store's vote: it
//! checks and reserves everything the staged writes need, so the `commit`
//! that follows cannot fail for domain reasons. Events are published
//! between the two:
//!
//! ```ignore
//! let symbol = store.in_tx(&ctx, |uow| -> Result<Symbol, TxFailure> {
//!     let created = repo.create(uow.tx(), &symbol)?;
//!     uow.prepare()?;
//!     publisher.publish(uow.ctx(), "symbol.created", &payload)?;
//!     Ok(created)
//! })?;
//! ```

use std::marker::PhantomData;

use tracing::{debug, warn};

use crate::context::Context;
use crate::error::DataError;

type PrepareFn<'a, Tx> = &'a dyn Fn(&mut Tx) -> Result<(), DataError>;

/// The scope of one open transaction, lent to the [`TxManager::in_tx`]
/// callback.
///
/// Neither `Send` nor `Sync`: a unit of work stays on the thread that opened
/// it and cannot outlive the callback.
pub struct UnitOfWork<'a, Tx> {
    tx: &'a mut Tx,
    ctx: &'a Context,
    vote: PrepareFn<'a, Tx>,
    prepared: bool,
    _not_send: PhantomData<*const ()>,
}

impl<'a, Tx> UnitOfWork<'a, Tx> {
    fn new(tx: &'a mut Tx, ctx: &'a Context, vote: PrepareFn<'a, Tx>) -> Self {
        Self {
            tx,
            ctx,
            vote,
            prepared: false,
            _not_send: PhantomData,
        }
    }

    /// The underlying transaction, for repository calls. Writes staged
    /// after [`prepare`](Self::prepare) are not checked again.
    pub fn tx(&mut self) -> &mut Tx {
        self.tx
    }

    /// The transaction-bound context.
    pub fn ctx(&self) -> &Context {
        self.ctx
    }

    /// Ask the store to guarantee the commit. Call it after the last write
    /// and before anything leaves the process.
    ///
    /// Fails with [`DataError::TransactionFailed`] if the context was
    /// cancelled, or with whatever the store reports (e.g.
    /// [`DataError::Duplicate`]). Once prepared, the unit of work commits
    /// even if the context is cancelled later. Calling it again is a no-op.
    pub fn prepare(&mut self) -> Result<(), DataError> {
        if self.prepared {
            return Ok(());
        }
        if self.ctx.is_cancelled() {
            return Err(DataError::TransactionFailed("context cancelled".into()));
        }
        (self.vote)(self.tx)?;
        self.prepared = true;
        Ok(())
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared
    }
}

/// Opens, prepares, commits and rolls back units of work.
pub trait TxManager: Send + Sync {
    /// Transaction handle passed to repository writes.
    type Tx;

    fn begin(&self, ctx: &Context) -> Result<Self::Tx, DataError>;

    /// Check and reserve what the staged writes need. After `Ok`, `commit`
    /// may only fail if the store itself is lost.
    fn prepare(&self, _tx: &mut Self::Tx) -> Result<(), DataError> {
        Ok(())
    }

    fn commit(&self, tx: Self::Tx) -> Result<(), DataError>;

    fn rollback(&self, tx: Self::Tx) -> Result<(), DataError>;

    /// Run `f` inside one transaction.
    ///
    /// - `f` fails: rollback, and its error is returned unchanged.
    /// - `f` succeeds without preparing: cancellation is checked, then the
    ///   transaction is prepared and committed. A failed prepare rolls back
    ///   and is returned as is.
    /// - `f` prepared: commit, whatever happened to `ctx` since.
    /// - A failed commit is reported as [`DataError::Database`].
    /// - `ctx` cancelled before begin, or before an unprepared commit:
    ///   rollback and [`DataError::TransactionFailed`].
    /// - `ctx` already bound to a transaction: [`DataError::TransactionFailed`]
    ///   without opening anything.
    fn in_tx<T, E, F>(&self, ctx: &Context, f: F) -> Result<T, E>
    where
        Self: Sized,
        F: FnOnce(&mut UnitOfWork<'_, Self::Tx>) -> Result<T, E>,
        E: From<DataError>,
    {
        if ctx.in_transaction() {
            return Err(DataError::TransactionFailed("unit of work cannot be reentered".into()).into());
        }
        if ctx.is_cancelled() {
            return Err(DataError::TransactionFailed("context cancelled".into()).into());
        }

        let tx_ctx = ctx.bind_tx();
        let mut tx = self.begin(&tx_ctx)?;
        let vote = |tx: &mut Self::Tx| self.prepare(tx);

        let (result, prepared) = {
            let mut uow = UnitOfWork::new(&mut tx, &tx_ctx, &vote);
            let result = f(&mut uow);
            (result, uow.prepared)
        };

        let value = match result {
            Err(err) => {
                if let Err(rollback_err) = self.rollback(tx) {
                    warn!(error = %rollback_err, "rollback after failed unit of work also failed");
                }
                return Err(err);
            }
            Ok(value) => value,
        };

        if prepared {
            if tx_ctx.is_cancelled() {
                debug!("context cancelled after prepare, committing anyway");
            }
        } else {
            let vote_result = if tx_ctx.is_cancelled() {
                Err(DataError::TransactionFailed("context cancelled".into()))
            } else {
                self.prepare(&mut tx)
            };
            if let Err(err) = vote_result {
                if let Err(rollback_err) = self.rollback(tx) {
                    warn!(error = %rollback_err, "rollback after failed prepare also failed");
                }
                return Err(err.into());
            }
        }

        self.commit(tx).map_err(|err| match err {
            DataError::Database(_) => err,
            other => DataError::Database(format!("commit failed: {}", other)),
        })?;
        debug!("unit of work committed");
        Ok(value)
    }
}
