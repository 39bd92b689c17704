//! Async consumer loop for queued messages.
//!
//! [`spawn_consumer`] pops elements from a [`QueueReceiver`] on a tokio task
//! and hands each one to a [`MessageHandler`]. For the manual-ack shapes the
//! handler's result completes the message's acker, which in turn releases
//! the scheduler thread waiting on it.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::{
    error::JobFailure,
    queue::QueueReceiver,
    types::{AckScope, AckableMessage},
};

/// Application logic applied to each dequeued payload
#[async_trait]
pub trait MessageHandler<A>: Send + Sync + 'static {
    async fn handle(&self, message: A) -> Result<(), JobFailure>;
}

/// A manual-ack queue element: completes its acker with the handler's result
#[async_trait]
pub trait AckDelivery: Send + 'static {
    type Message: Send + 'static;

    async fn deliver<H>(self, handler: &H)
    where
        H: MessageHandler<Self::Message> + ?Sized;
}

#[async_trait]
impl<A: Send + 'static> AckDelivery for AckableMessage<A> {
    type Message = A;

    async fn deliver<H>(self, handler: &H)
    where
        H: MessageHandler<A> + ?Sized,
    {
        let (message, acker) = self.into_parts();
        let outcome = handler.handle(message).await;
        if let Err(e) = acker.complete(outcome) {
            error!(error = %e, "Handler result could not be recorded");
        }
    }
}

#[async_trait]
impl<A: Send + 'static> AckDelivery for AckScope<A> {
    type Message = A;

    async fn deliver<H>(self, handler: &H)
    where
        H: MessageHandler<A> + ?Sized,
    {
        if let Err(e) = self.run(|message| handler.handle(message)).await {
            debug!(error = %e, "Handler failed, message nacked");
        }
    }
}

/// Handle for managing consumer lifecycle
pub struct ConsumerHandle {
    shutdown_tx: oneshot::Sender<()>,
    join_handle: JoinHandle<()>,
}

impl ConsumerHandle {
    /// Stop after the message currently being handled, if any.
    /// Queued messages are left on the queue.
    pub async fn shutdown(self) {
        let Self {
            shutdown_tx,
            join_handle,
        } = self;
        let _ = shutdown_tx.send(());
        await_join(join_handle).await;
    }

    /// Wait for the consumer to stop on its own, once the queue closes
    pub async fn join(self) {
        await_join(self.join_handle).await;
    }

    pub fn is_finished(&self) -> bool {
        self.join_handle.is_finished()
    }
}

async fn await_join(join_handle: JoinHandle<()>) {
    if let Err(e) = join_handle.await {
        error!(error = %e, "Consumer join error");
    }
}

/// Run `handler` over every manual-ack element of `receiver` on a new tokio task
pub fn spawn_consumer<E, H>(receiver: QueueReceiver<E>, handler: H) -> ConsumerHandle
where
    E: AckDelivery,
    H: MessageHandler<E::Message>,
{
    spawn(receiver, Acked(handler))
}

/// Run `handler` over bare payloads from an auto-acking queue.
/// Handler failures are logged only; the scheduler never sees them.
pub fn spawn_auto_consumer<P, H>(receiver: QueueReceiver<P>, handler: H) -> ConsumerHandle
where
    P: Send + 'static,
    H: MessageHandler<P>,
{
    spawn(receiver, Auto(handler))
}

fn spawn<E, D>(receiver: QueueReceiver<E>, dispatch: D) -> ConsumerHandle
where
    E: Send + 'static,
    D: Dispatch<E>,
{
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let consumer = Consumer {
        receiver,
        dispatch: Arc::new(dispatch),
        shutdown_rx,
    };

    let join_handle = tokio::spawn(consumer.run());
    ConsumerHandle {
        shutdown_tx,
        join_handle,
    }
}

#[async_trait]
trait Dispatch<E>: Send + Sync + 'static {
    async fn dispatch(&self, element: E);
}

struct Acked<H>(H);

#[async_trait]
impl<E, H> Dispatch<E> for Acked<H>
where
    E: AckDelivery,
    H: MessageHandler<E::Message>,
{
    async fn dispatch(&self, element: E) {
        element.deliver(&self.0).await;
    }
}

struct Auto<H>(H);

#[async_trait]
impl<P, H> Dispatch<P> for Auto<H>
where
    P: Send + 'static,
    H: MessageHandler<P>,
{
    async fn dispatch(&self, element: P) {
        if let Err(e) = self.0.handle(element).await {
            warn!(error = %e, "Handler failed on auto-acked message");
        }
    }
}

struct Consumer<E, D> {
    receiver: QueueReceiver<E>,
    dispatch: Arc<D>,
    shutdown_rx: oneshot::Receiver<()>,
}

impl<E, D> Consumer<E, D>
where
    E: Send + 'static,
    D: Dispatch<E>,
{
    async fn run(mut self) {
        info!("Consumer started");
        let mut handled: u64 = 0;

        loop {
            tokio::select! {
                _ = &mut self.shutdown_rx => {
                    info!("Consumer shutdown requested");
                    break;
                }

                next = self.receiver.pop() => {
                    match next {
                        Some(element) => {
                            self.dispatch.dispatch(element).await;
                            handled += 1;
                        }
                        None => {
                            info!("Queue closed, consumer stopping");
                            break;
                        }
                    }
                }
            }
        }

        info!(handled, "Consumer stopped");
    }
}
