//! Metrics decorators for publishers and subscribers.
//!
//! `MetricsPublisher` and `MetricsSubscriber` wrap any implementation of the
//! same trait, delegate every call and record per-topic counters and
//! durations through the `metrics` facade. Recording is best-effort: a
//! recorder that fails or panics never changes the wrapped call's result.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Instant;

use metrics::{counter, histogram};

use crate::bus::{Message, PublishError, Publisher, SubscribeError, Subscriber, Subscription};
use crate::context::Context;

pub const PUBLISH_ATTEMPTS: &str = "txpublish_publish_attempts_total";
pub const PUBLISH_SUCCESS: &str = "txpublish_publish_success_total";
pub const PUBLISH_ERRORS: &str = "txpublish_publish_errors_total";
pub const PUBLISH_DURATION: &str = "txpublish_publish_duration_seconds";
pub const SUBSCRIBE_ATTEMPTS: &str = "txpublish_subscribe_attempts_total";
pub const SUBSCRIBE_SUCCESS: &str = "txpublish_subscribe_success_total";
pub const SUBSCRIBE_ERRORS: &str = "txpublish_subscribe_errors_total";
pub const SUBSCRIBE_DURATION: &str = "txpublish_subscribe_duration_seconds";

struct Names {
    attempts: &'static str,
    success: &'static str,
    errors: &'static str,
    duration: &'static str,
}

const PUBLISH: Names = Names {
    attempts: PUBLISH_ATTEMPTS,
    success: PUBLISH_SUCCESS,
    errors: PUBLISH_ERRORS,
    duration: PUBLISH_DURATION,
};

const SUBSCRIBE: Names = Names {
    attempts: SUBSCRIBE_ATTEMPTS,
    success: SUBSCRIBE_SUCCESS,
    errors: SUBSCRIBE_ERRORS,
    duration: SUBSCRIBE_DURATION,
};

fn best_effort(record: impl FnOnce()) {
    let _ = catch_unwind(AssertUnwindSafe(record));
}

fn observe<T, E>(names: &Names, topic: &str, call: impl FnOnce() -> Result<T, E>) -> Result<T, E> {
    best_effort(|| counter!(names.attempts, "topic" => topic.to_string()).increment(1));
    let started = Instant::now();

    let result = call();

    let elapsed = started.elapsed().as_secs_f64();
    let outcome = if result.is_ok() { names.success } else { names.errors };
    best_effort(|| {
        counter!(outcome, "topic" => topic.to_string()).increment(1);
        histogram!(names.duration, "topic" => topic.to_string()).record(elapsed);
    });
    result
}

/// Publisher decorator recording attempts, successes, errors and duration.
pub struct MetricsPublisher<P> {
    inner: P,
}

impl<P: Publisher> MetricsPublisher<P> {
    pub fn new(inner: P) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }
}

impl<P: Publisher> Publisher for MetricsPublisher<P> {
    fn publish_message(
        &self,
        ctx: &Context,
        topic: &str,
        message: Message,
    ) -> Result<(), PublishError> {
        observe(&PUBLISH, topic, || self.inner.publish_message(ctx, topic, message))
    }
}

/// Subscriber decorator recording attempts, successes, errors and duration
/// of `subscribe` calls.
pub struct MetricsSubscriber<S> {
    inner: S,
}

impl<S: Subscriber> MetricsSubscriber<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: Subscriber> Subscriber for MetricsSubscriber<S> {
    fn subscribe(&self, ctx: &Context, topic: &str) -> Result<Subscription, SubscribeError> {
        observe(&SUBSCRIBE, topic, || self.inner.subscribe(ctx, topic))
    }

    fn close(&self) -> Result<(), SubscribeError> {
        self.inner.close()
    }
}
