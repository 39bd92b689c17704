//! The queue between scheduler threads and async consumers.
//!
//! Producers are scheduler worker threads, which push with blocking calls;
//! consumers are async tasks. Capacity and backpressure belong to the
//! underlying tokio channel and are chosen through [`QueueCapacity`].
//!
//! Pushing to a closed queue (every receiver dropped or `close()` called)
//! fails with [`QueueClosed`] and drops the element. The job factory reports
//! this to the scheduler as a failed fire.
//!
//! `push_blocking` must not be called from inside an async runtime worker;
//! scheduler callbacks run on the scheduler's own threads.

use std::pin::Pin;

use futures::Stream;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::{ReceiverStream, UnboundedReceiverStream};

use crate::config::QueueCapacity;

/// Type alias for boxed consumer streams
pub type BoxStream<T> = Pin<Box<dyn Stream<Item = T> + Send + 'static>>;

/// The queue has no live consumer side
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Queue is closed")]
pub struct QueueClosed;

/// Push capability the job factory needs from a queue
pub trait QueueSink<E>: Send + Sync + 'static {
    /// Push from a synchronous thread, blocking while a bounded queue is full
    fn push_blocking(&self, element: E) -> Result<(), QueueClosed>;
}

/// Producer handle
#[derive(Debug)]
pub enum QueueSender<E> {
    Bounded(mpsc::Sender<E>),
    Unbounded(mpsc::UnboundedSender<E>),
}

/// Consumer handle
#[derive(Debug)]
pub enum QueueReceiver<E> {
    Bounded(mpsc::Receiver<E>),
    Unbounded(mpsc::UnboundedReceiver<E>),
}

/// Create a queue with the given capacity policy
pub fn channel<E>(capacity: QueueCapacity) -> (QueueSender<E>, QueueReceiver<E>) {
    match capacity {
        QueueCapacity::Bounded(n) => {
            let (tx, rx) = mpsc::channel(n.max(1));
            (QueueSender::Bounded(tx), QueueReceiver::Bounded(rx))
        }
        QueueCapacity::Unbounded => {
            let (tx, rx) = mpsc::unbounded_channel();
            (QueueSender::Unbounded(tx), QueueReceiver::Unbounded(rx))
        }
    }
}

impl<E> QueueSender<E> {
    /// Push from async code, waiting for capacity
    pub async fn push(&self, element: E) -> Result<(), QueueClosed> {
        match self {
            Self::Bounded(tx) => tx.send(element).await.map_err(|_| QueueClosed),
            Self::Unbounded(tx) => tx.send(element).map_err(|_| QueueClosed),
        }
    }

    pub fn is_closed(&self) -> bool {
        match self {
            Self::Bounded(tx) => tx.is_closed(),
            Self::Unbounded(tx) => tx.is_closed(),
        }
    }
}

impl<E> Clone for QueueSender<E> {
    fn clone(&self) -> Self {
        match self {
            Self::Bounded(tx) => Self::Bounded(tx.clone()),
            Self::Unbounded(tx) => Self::Unbounded(tx.clone()),
        }
    }
}

impl<E: Send + 'static> QueueSink<E> for QueueSender<E> {
    fn push_blocking(&self, element: E) -> Result<(), QueueClosed> {
        match self {
            Self::Bounded(tx) => tx.blocking_send(element).map_err(|_| QueueClosed),
            Self::Unbounded(tx) => tx.send(element).map_err(|_| QueueClosed),
        }
    }
}

impl<E: Send + 'static> QueueReceiver<E> {
    /// Wait for the next element; `None` once every sender is gone
    pub async fn pop(&mut self) -> Option<E> {
        match self {
            Self::Bounded(rx) => rx.recv().await,
            Self::Unbounded(rx) => rx.recv().await,
        }
    }

    /// Blocking form of [`pop`](Self::pop) for synchronous consumers
    pub fn blocking_pop(&mut self) -> Option<E> {
        match self {
            Self::Bounded(rx) => rx.blocking_recv(),
            Self::Unbounded(rx) => rx.blocking_recv(),
        }
    }

    /// Take an element if one is ready
    pub fn try_pop(&mut self) -> Option<E> {
        match self {
            Self::Bounded(rx) => rx.try_recv().ok(),
            Self::Unbounded(rx) => rx.try_recv().ok(),
        }
    }

    /// Stop accepting new elements; already queued ones can still be popped
    pub fn close(&mut self) {
        match self {
            Self::Bounded(rx) => rx.close(),
            Self::Unbounded(rx) => rx.close(),
        }
    }

    pub fn into_stream(self) -> BoxStream<E> {
        match self {
            Self::Bounded(rx) => Box::pin(ReceiverStream::new(rx)),
            Self::Unbounded(rx) => Box::pin(UnboundedReceiverStream::new(rx)),
        }
    }
}
