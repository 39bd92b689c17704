use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};

use futures::FutureExt;
use tracing::error;

use crate::ack::{AckOutcome, MessageAcker};
use crate::error::{AckError, JobFailure};
use crate::types::FireId;

/// Message paired with the handle that reports its processing outcome.
///
/// The consumer must call [`ack`](Self::ack) or [`nack`](Self::nack) exactly
/// once; dropping the message without doing so fails the fire event.
#[derive(Debug)]
pub struct AckableMessage<A> {
    message: A,
    acker: MessageAcker,
}

impl<A> AckableMessage<A> {
    pub fn new(message: A, acker: MessageAcker) -> Self {
        Self { message, acker }
    }

    pub fn message(&self) -> &A {
        &self.message
    }

    pub fn acker(&self) -> &MessageAcker {
        &self.acker
    }

    pub fn fire_id(&self) -> &FireId {
        self.acker.fire_id()
    }

    pub fn into_parts(self) -> (A, MessageAcker) {
        (self.message, self.acker)
    }

    pub fn ack(&self) -> Result<(), AckError> {
        self.acker.ack()
    }

    pub fn nack(&self, failure: impl Into<JobFailure>) -> Result<(), AckError> {
        self.acker.nack(failure)
    }
}

/// Message whose acknowledgement is tied to a processing scope.
///
/// Leaving the scope with `Ok` acks, with `Err` or a panic nacks. The acker
/// is never exposed, so completion happens exactly once.
pub struct AckScope<A> {
    message: A,
    acker: MessageAcker,
}

impl<A> AckScope<A> {
    pub fn new(message: A, acker: MessageAcker) -> Self {
        Self { message, acker }
    }

    /// Peek at the message before entering the scope
    pub fn message(&self) -> &A {
        &self.message
    }

    pub fn fire_id(&self) -> &FireId {
        self.acker.fire_id()
    }

    /// Process the message asynchronously and ack according to the result
    pub async fn run<F, Fut, T, E>(self, f: F) -> Result<T, E>
    where
        F: FnOnce(A) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let Self { message, acker } = self;
        let outcome = AssertUnwindSafe(async move { f(message).await })
            .catch_unwind()
            .await;
        settle(&acker, outcome)
    }

    /// Process the message on the current thread and ack according to the result
    pub fn run_blocking<F, T, E>(self, f: F) -> Result<T, E>
    where
        F: FnOnce(A) -> Result<T, E>,
        E: fmt::Display,
    {
        let Self { message, acker } = self;
        let outcome = panic::catch_unwind(AssertUnwindSafe(move || f(message)));
        settle(&acker, outcome)
    }
}

impl<A: fmt::Debug> fmt::Debug for AckScope<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AckScope")
            .field("message", &self.message)
            .field("fire_id", self.acker.fire_id())
            .finish()
    }
}

fn settle<T, E: fmt::Display>(
    acker: &MessageAcker,
    outcome: Result<Result<T, E>, Box<dyn Any + Send>>,
) -> Result<T, E> {
    match outcome {
        Ok(Ok(value)) => {
            complete(acker, Ok(()));
            Ok(value)
        }
        Ok(Err(err)) => {
            complete(acker, Err(JobFailure::new(err.to_string())));
            Err(err)
        }
        Err(payload) => {
            complete(acker, Err(JobFailure::new(panic_message(payload.as_ref()))));
            panic::resume_unwind(payload)
        }
    }
}

fn complete(acker: &MessageAcker, outcome: AckOutcome) {
    if let Err(e) = acker.complete(outcome) {
        error!(error = %e, "Scoped acker completed twice");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("consumer panicked: {msg}")
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("consumer panicked: {msg}")
    } else {
        "consumer panicked".to_string()
    }
}
