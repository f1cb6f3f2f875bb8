//! End-to-end pipeline tests.
//!
//! Wires the service side (use case, store, publisher) and the worker side
//! (router, worker, catalog) over one in-memory broker:
//! - Transactional writes and their events
//! - Worker retry, recovery and shutdown
//! - Metrics decorators in the full path

mod instrumentation;
mod support;
mod transactional;
mod worker;
