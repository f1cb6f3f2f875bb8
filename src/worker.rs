//! Worker lifecycle: run a router on a background thread and stop it within
//! a bounded time.
//!
//! ```text
//!   start() ──► [router thread] run(ctx) ... ─────────────────┐
//!                                                             │ join
//!   stop(t) ──► [close thread]  close() ──► result or timeout ┴──► outcome
//! ```
//!
//! `start` and `stop` are both idempotent. Every caller of `stop`, including
//! concurrent ones, receives the outcome of the first stop.

use std::io;
use std::sync::mpsc::{channel, RecvTimeoutError};
use std::sync::{Arc, Mutex, Once, OnceLock, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::context::Context;
use crate::router::RouterError;

/// Default bound on how long [`Worker::stop`] waits for the router to close.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(15);

/// Something a [`Worker`] can run on a background thread.
pub trait Runnable: Send + Sync + 'static {
    /// Block until closed or `ctx` is cancelled.
    fn run(&self, ctx: &Context) -> Result<(), RouterError>;

    /// Make `run` return. Blocks until it has; safe to call more than once.
    fn close(&self) -> Result<(), RouterError>;
}

impl<R: Runnable> Runnable for Arc<R> {
    fn run(&self, ctx: &Context) -> Result<(), RouterError> {
        (**self).run(ctx)
    }

    fn close(&self) -> Result<(), RouterError> {
        (**self).close()
    }
}

/// Error type for worker lifecycle operations.
///
/// Cloneable so that every `stop` caller gets the same outcome.
#[derive(Debug, Clone, Error)]
pub enum WorkerError {
    #[error("router did not close within {0:?}")]
    StopTimeout(Duration),
    #[error("router close failed")]
    Close(#[source] Arc<RouterError>),
    #[error("router run failed")]
    Run(#[source] Arc<RouterError>),
    #[error("router thread panicked")]
    Panicked,
    #[error("spawning the router thread failed")]
    Spawn(#[source] Arc<io::Error>),
}

/// Runs a [`Runnable`] on a background thread.
///
/// ## Example
///
/// ```ignore
/// let worker = Worker::new(router, Context::new());
/// worker.start()?;
///
/// // ... messages are handled in the background ...
///
/// worker.stop()?;
/// ```
pub struct Worker<R: Runnable> {
    runnable: Arc<R>,
    ctx: Context,
    stop_timeout: Duration,
    started: Once,
    run: Mutex<RunSlot>,
    stop_outcome: OnceLock<Result<(), WorkerError>>,
}

/// The run thread and whether a stop has begun, under one lock so a start
/// cannot slip a thread in behind a stop.
#[derive(Default)]
struct RunSlot {
    handle: Option<JoinHandle<Result<(), RouterError>>>,
    stopping: bool,
}

impl<R: Runnable> Worker<R> {
    pub fn new(runnable: R, ctx: Context) -> Self {
        Self::from_arc(Arc::new(runnable), ctx)
    }

    /// Build a worker around a shared runnable, e.g. to keep reading router
    /// stats while it runs.
    pub fn from_arc(runnable: Arc<R>, ctx: Context) -> Self {
        Self {
            runnable,
            ctx,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            started: Once::new(),
            run: Mutex::new(RunSlot::default()),
            stop_outcome: OnceLock::new(),
        }
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    pub fn runnable(&self) -> &R {
        &self.runnable
    }

    /// Spawn the run loop and return at once. Later calls, and calls once
    /// `stop` has begun, do nothing.
    pub fn start(&self) -> Result<(), WorkerError> {
        let mut result = Ok(());
        self.started.call_once(|| {
            let mut slot = self.run.lock().unwrap_or_else(PoisonError::into_inner);
            if slot.stopping {
                debug!("start after stop ignored");
                return;
            }
            result = self.spawn_run().map(|handle| slot.handle = Some(handle));
        });
        result
    }

    fn spawn_run(&self) -> Result<JoinHandle<Result<(), RouterError>>, WorkerError> {
        let runnable = self.runnable.clone();
        let ctx = self.ctx.clone();
        let handle = thread::Builder::new()
            .name("router".into())
            .spawn(move || {
                let result = runnable.run(&ctx);
                if let Err(err) = &result {
                    error!(error = %err, "router run loop failed");
                }
                result
            })
            .map_err(|err| WorkerError::Spawn(Arc::new(err)))?;

        info!("worker started");
        Ok(handle)
    }

    /// Stop with the configured timeout (default 15s).
    pub fn stop(&self) -> Result<(), WorkerError> {
        self.stop_within(self.stop_timeout)
    }

    /// Close the runnable, waiting at most `timeout` for it, then wait for
    /// the run loop to end.
    ///
    /// The outcome is, in order of precedence: [`WorkerError::StopTimeout`],
    /// a close error, a run-loop error, `Ok(())`.
    pub fn stop_within(&self, timeout: Duration) -> Result<(), WorkerError> {
        self.run
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .stopping = true;
        self.stop_outcome
            .get_or_init(|| self.shutdown(timeout))
            .clone()
    }

    fn shutdown(&self, timeout: Duration) -> Result<(), WorkerError> {
        let close = self.close_within(timeout);

        let handle = self
            .run
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .handle
            .take();
        let run = match handle.map(JoinHandle::join) {
            None | Some(Ok(Ok(()))) => Ok(()),
            Some(Ok(Err(err))) => Err(WorkerError::Run(Arc::new(err))),
            Some(Err(_)) => Err(WorkerError::Panicked),
        };

        let outcome = close.and(run);
        match &outcome {
            Ok(()) => info!("worker stopped"),
            Err(err) => warn!(error = %err, "worker stopped with error"),
        }
        outcome
    }

    fn close_within(&self, timeout: Duration) -> Result<(), WorkerError> {
        let (tx, rx) = channel();
        let runnable = self.runnable.clone();
        let closer = thread::Builder::new()
            .name("router-close".into())
            .spawn(move || {
                let _ = tx.send(runnable.close());
            })
            .map_err(|err| WorkerError::Spawn(Arc::new(err)))?;

        match rx.recv_timeout(timeout) {
            Ok(result) => {
                let _ = closer.join();
                result.map_err(|err| WorkerError::Close(Arc::new(err)))
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(timeout_ms = timeout.as_millis() as u64, "router close timed out");
                Err(WorkerError::StopTimeout(timeout))
            }
            // The close thread panicked before reporting.
            Err(RecvTimeoutError::Disconnected) => {
                let _ = closer.join();
                Err(WorkerError::Panicked)
            }
        }
    }
}
