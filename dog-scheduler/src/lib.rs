//! # dog-scheduler: scheduler-to-queue acknowledgement bridge
//!
//! Turns fire events of a synchronous, callback-driven scheduler into typed
//! messages on an async queue, and optionally holds the scheduler's
//! success/failure signal until the consumer acknowledges the message.
//!
//! - **Payload codec**: typed payloads are stored as flat string maps, the
//!   only job data a scheduler persists ([`JobPayload`], [`EncodedPayload`])
//! - **Three delivery shapes**: bare payloads (auto-ack),
//!   [`AckableMessage`] (explicit ack) and [`AckScope`] (ack on scope exit)
//! - **Scheduler seam**: any [`ExternalScheduler`]; [`MemoryScheduler`] ships
//!   in-crate with cron and one-shot triggers
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use dog_scheduler::prelude::*;
//!
//! #[derive(Debug)]
//! struct Digest {
//!     user: String,
//! }
//!
//! impl JobPayload for Digest {
//!     const JOB_TYPE: &'static str = "digest";
//!
//!     fn encode(&self) -> EncodedPayload {
//!         EncodedPayload::new().with("user", &self.user)
//!     }
//!
//!     fn decode(payload: &EncodedPayload) -> DecodeResult<Self> {
//!         Ok(Self { user: payload.get("user")? })
//!     }
//! }
//!
//! struct SendDigest;
//!
//! #[async_trait]
//! impl MessageHandler<Digest> for SendDigest {
//!     async fn handle(&self, digest: Digest) -> Result<(), JobFailure> {
//!         println!("sending digest to {}", digest.user);
//!         Ok(())
//!     }
//! }
//!
//! # async fn run() -> Result<(), SchedulingError> {
//! let backend = MemoryScheduler::new(SchedulerConfig::from_env());
//! let (scheduler, rx) = TaskScheduler::<Digest>::scoped(backend, QueueConfig::from_env())?;
//! let consumer = spawn_consumer(rx, SendDigest);
//!
//! scheduler.schedule_job(
//!     JobKey::named("digest-ada"),
//!     &Digest { user: "ada".into() },
//!     TriggerKey::named("every-morning"),
//!     ScheduleSpec::cron("0 0 8 * * *"),
//! )?;
//!
//! // Stop firing before stopping the consumer the fires wait on
//! drop(scheduler);
//! consumer.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod ack;
pub mod adapter;
pub mod backend;
pub mod codec;
pub mod config;
pub mod consumer;
pub mod error;
pub mod job;
pub mod observability;
pub mod queue;
pub mod types;

pub use ack::{AckOutcome, AckWaiter, MessageAcker};
pub use adapter::TaskScheduler;
pub use backend::memory::{FireReceipt, MemoryScheduler};
pub use backend::{ExternalScheduler, JobCallback, JobDetail, Trigger};
pub use codec::json::Json;
pub use codec::{EncodedPayload, FieldValue, JobPayload, JOB_TYPE_KEY, VARIANT_KEY};
pub use config::{QueueCapacity, QueueConfig, SchedulerConfig};
pub use consumer::{spawn_auto_consumer, spawn_consumer, AckDelivery, ConsumerHandle, MessageHandler};
pub use error::{
    AckError, DecodeError, DecodeResult, JobError, JobFailure, SchedulingError, SchedulingResult,
};
pub use job::{AckMode, QueueJobFactory};
pub use observability::{BridgeMetrics, MetricsSnapshot};
pub use queue::{QueueClosed, QueueReceiver, QueueSender, QueueSink};
pub use types::{
    AckScope, AckableMessage, FireContext, FireId, JobDataMap, JobKey, ScheduleSpec, TriggerKey,
};

/// Everything needed to schedule payloads and consume them
pub mod prelude {
    pub use crate::{
        spawn_auto_consumer, spawn_consumer, AckScope, AckableMessage, ConsumerHandle, MessageHandler,
        TaskScheduler,
    };

    pub use crate::{
        DecodeResult, EncodedPayload, FieldValue, Json, JobPayload, JobFailure, JobError,
        SchedulingError, SchedulingResult,
    };

    pub use crate::{
        ExternalScheduler, JobKey, MemoryScheduler, QueueConfig, ScheduleSpec, SchedulerConfig,
        TriggerKey,
    };

    pub use async_trait::async_trait;
}
