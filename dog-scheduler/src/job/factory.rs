use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info_span, warn};

use crate::{
    ack::MessageAcker,
    backend::JobCallback,
    codec::{EncodedPayload, JobPayload, JOB_TYPE_KEY},
    config::QueueConfig,
    error::{DecodeError, JobError},
    observability::BridgeMetrics,
    queue::QueueSink,
    types::{AckScope, AckableMessage, FireContext, FireId, JobDataMap},
};

/// Whether a fire event waits for the consumer's acknowledgement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMode {
    /// Succeed as soon as the message is enqueued
    Auto,
    /// Block the firing thread until the consumer acks or nacks
    Manual,
}

enum Delivery<P> {
    Auto(Arc<dyn QueueSink<P>>),
    Explicit(Arc<dyn QueueSink<AckableMessage<P>>>),
    Scoped(Arc<dyn QueueSink<AckScope<P>>>),
}

/// Job callback that turns fire events into queued messages.
///
/// One factory is bound to one queue and one payload type per scheduler
/// instance. Each fire decodes the stored payload, pushes it onto the queue
/// and, in manual-ack mode, holds the scheduler thread until the consumer
/// completes the acker. The scheduler's worker pool size is therefore the
/// ceiling on messages awaiting acknowledgement; see [`QueueConfig`] for the
/// bounded-queue hazard.
pub struct QueueJobFactory<P: JobPayload> {
    delivery: Delivery<P>,
    ack_timeout: Option<Duration>,
    metrics: Arc<BridgeMetrics>,
    _payload: PhantomData<fn() -> P>,
}

impl<P: JobPayload> QueueJobFactory<P> {
    /// Deliver bare payloads; the fire succeeds once the push completes
    pub fn auto_acking(sink: impl QueueSink<P>, config: &QueueConfig) -> Self {
        Self::with_delivery(Delivery::Auto(Arc::new(sink)), config)
    }

    /// Deliver [`AckableMessage`]s the consumer completes explicitly
    pub fn acking(sink: impl QueueSink<AckableMessage<P>>, config: &QueueConfig) -> Self {
        Self::with_delivery(Delivery::Explicit(Arc::new(sink)), config)
    }

    /// Deliver [`AckScope`]s that complete when the consumer's scope exits
    pub fn scoped(sink: impl QueueSink<AckScope<P>>, config: &QueueConfig) -> Self {
        Self::with_delivery(Delivery::Scoped(Arc::new(sink)), config)
    }

    fn with_delivery(delivery: Delivery<P>, config: &QueueConfig) -> Self {
        Self {
            delivery,
            ack_timeout: config.ack_timeout,
            metrics: Arc::new(BridgeMetrics::new()),
            _payload: PhantomData,
        }
    }

    pub fn ack_mode(&self) -> AckMode {
        match self.delivery {
            Delivery::Auto(_) => AckMode::Auto,
            Delivery::Explicit(_) | Delivery::Scoped(_) => AckMode::Manual,
        }
    }

    pub fn metrics(&self) -> Arc<BridgeMetrics> {
        self.metrics.clone()
    }

    /// Rebuild the payload from merged job data
    pub fn decode(data: &JobDataMap) -> Result<P, DecodeError> {
        let found = data.get(JOB_TYPE_KEY);
        if found.map(String::as_str) != Some(P::JOB_TYPE) {
            return Err(DecodeError::JobTypeMismatch {
                expected: P::JOB_TYPE,
                found: found.cloned(),
            });
        }

        let payload: EncodedPayload = data
            .iter()
            .filter(|(key, _)| key.as_str() != JOB_TYPE_KEY)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        P::decode(&payload)
    }

    fn push<E: 'static>(&self, sink: &dyn QueueSink<E>, element: E) -> Result<(), JobError> {
        match sink.push_blocking(element) {
            Ok(()) => {
                self.metrics.record_enqueued();
                debug!("Message enqueued");
                Ok(())
            }
            Err(_) => {
                self.metrics.record_enqueue_failure();
                warn!("Queue closed, fire failed");
                Err(JobError::QueueClosed)
            }
        }
    }

    fn push_and_wait<E: 'static>(
        &self,
        sink: &dyn QueueSink<E>,
        fire_id: &FireId,
        wrap: impl FnOnce(MessageAcker) -> E,
    ) -> Result<(), JobError> {
        let (acker, waiter) = MessageAcker::pair(fire_id.clone());
        self.push(sink, wrap(acker))?;

        self.metrics.begin_wait();
        let outcome = waiter.wait(self.ack_timeout);
        self.metrics.end_wait(outcome.is_ok());

        match &outcome {
            Ok(()) => debug!("Message acknowledged"),
            Err(e) => warn!(error = %e, "Message not acknowledged"),
        }
        outcome
    }
}

impl<P: JobPayload> JobCallback for QueueJobFactory<P> {
    fn execute(&self, ctx: &FireContext) -> Result<(), JobError> {
        let span = info_span!("queue_job", job_type = P::JOB_TYPE, fire_id = %ctx.fire_id);
        let _entered = span.enter();
        self.metrics.record_fired();

        let payload = Self::decode(&ctx.data).map_err(|e| {
            self.metrics.record_decode_failure();
            warn!(error = %e, job_key = %ctx.job_key, "Payload decode failed, skipping queue");
            JobError::Decode(e)
        })?;

        match &self.delivery {
            Delivery::Auto(sink) => self.push(sink.as_ref(), payload),
            Delivery::Explicit(sink) => self.push_and_wait(sink.as_ref(), &ctx.fire_id, |acker| {
                AckableMessage::new(payload, acker)
            }),
            Delivery::Scoped(sink) => self.push_and_wait(sink.as_ref(), &ctx.fire_id, |acker| {
                AckScope::new(payload, acker)
            }),
        }
    }
}
