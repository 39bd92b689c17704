use std::marker::PhantomData;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use crate::{
    backend::{memory::MemoryScheduler, ExternalScheduler, JobDetail, Trigger},
    codec::{JobPayload, JOB_TYPE_KEY},
    config::QueueConfig,
    error::{SchedulingError, SchedulingResult},
    job::{AckMode, QueueJobFactory},
    observability::BridgeMetrics,
    queue::{self, QueueReceiver},
    types::{AckScope, AckableMessage, JobKey, ScheduleSpec, TriggerKey},
};

/// Schedules typed payloads on an external scheduler and owns its lifecycle.
///
/// Construction installs a [`QueueJobFactory`] as the scheduler's job
/// callback and starts the scheduler. Dropping the facade shuts the
/// scheduler down, so it never outlives its owner.
pub struct TaskScheduler<P: JobPayload, S: ExternalScheduler = MemoryScheduler> {
    backend: Arc<S>,
    metrics: Arc<BridgeMetrics>,
    ack_mode: AckMode,
    _payload: PhantomData<fn(&P)>,
}

impl<P: JobPayload, S: ExternalScheduler> TaskScheduler<P, S> {
    /// Bind `factory` to `backend` and start it
    pub fn new(backend: S, factory: QueueJobFactory<P>) -> SchedulingResult<Self> {
        let backend = Arc::new(backend);
        let metrics = factory.metrics();
        let ack_mode = factory.ack_mode();

        backend.set_job_callback(Arc::new(factory));
        backend.start()?;

        info!(
            instance = %backend.config().instance_name,
            job_type = P::JOB_TYPE,
            ack_mode = ?ack_mode,
            "Task scheduler started"
        );
        Ok(Self {
            backend,
            metrics,
            ack_mode,
            _payload: PhantomData,
        })
    }

    /// Fire events succeed once the payload is enqueued
    pub fn auto_acking(backend: S, config: QueueConfig) -> SchedulingResult<(Self, QueueReceiver<P>)> {
        let (tx, rx) = queue::channel(config.capacity);
        let factory = QueueJobFactory::auto_acking(tx, &config);
        Ok((Self::new(backend, factory)?, rx))
    }

    /// Fire events wait for the consumer to complete each message's acker
    pub fn acking(
        backend: S,
        config: QueueConfig,
    ) -> SchedulingResult<(Self, QueueReceiver<AckableMessage<P>>)> {
        config.check_liveness(backend.config());
        let (tx, rx) = queue::channel(config.capacity);
        let factory = QueueJobFactory::acking(tx, &config);
        Ok((Self::new(backend, factory)?, rx))
    }

    /// Fire events wait for the consumer's [`AckScope`] to exit
    pub fn scoped(backend: S, config: QueueConfig) -> SchedulingResult<(Self, QueueReceiver<AckScope<P>>)> {
        config.check_liveness(backend.config());
        let (tx, rx) = queue::channel(config.capacity);
        let factory = QueueJobFactory::scoped(tx, &config);
        Ok((Self::new(backend, factory)?, rx))
    }

    /// Register `payload` under `job_key`, fired by `trigger_key` on `schedule`.
    ///
    /// The encoded payload and its job type are stored as trigger data.
    /// Returns the first fire time. An existing job key is rejected, never
    /// overwritten, and so is a payload that writes [`JOB_TYPE_KEY`] itself.
    #[instrument(
        skip_all,
        fields(job_type = P::JOB_TYPE, job_key = %job_key, trigger_key = %trigger_key)
    )]
    pub fn schedule_job(
        &self,
        job_key: JobKey,
        payload: &P,
        trigger_key: TriggerKey,
        schedule: ScheduleSpec,
    ) -> SchedulingResult<Option<DateTime<Utc>>> {
        let mut data = payload.encode().into_map();
        if data.contains_key(JOB_TYPE_KEY) {
            warn!("Payload encodes the reserved job type field");
            return Err(SchedulingError::ReservedField(JOB_TYPE_KEY.to_string()));
        }
        data.insert(JOB_TYPE_KEY.to_string(), P::JOB_TYPE.to_string());

        let trigger = Trigger::new(trigger_key, job_key.clone(), schedule).with_data(data);
        let next = self.backend.schedule_job(JobDetail::new(job_key), trigger)?;

        info!(next_fire = ?next, "Job scheduled");
        Ok(next)
    }

    /// Remove a trigger; `false` if it did not exist. A fire already in
    /// progress is not cancelled.
    #[instrument(skip(self), fields(trigger_key = %trigger_key))]
    pub fn unschedule_job(&self, trigger_key: &TriggerKey) -> SchedulingResult<bool> {
        let removed = self.backend.unschedule_job(trigger_key)?;
        debug!(removed, "Unschedule requested");
        Ok(removed)
    }

    #[instrument(skip(self, schedule), fields(trigger_key = %trigger_key))]
    pub fn reschedule_job(
        &self,
        trigger_key: &TriggerKey,
        schedule: ScheduleSpec,
    ) -> SchedulingResult<Option<DateTime<Utc>>> {
        self.backend.reschedule_job(trigger_key, schedule)
    }

    #[instrument(skip(self), fields(job_key = %job_key))]
    pub fn delete_job(&self, job_key: &JobKey) -> SchedulingResult<bool> {
        self.backend.delete_job(job_key)
    }

    pub fn check_exists(&self, job_key: &JobKey) -> bool {
        self.backend.check_exists(job_key)
    }

    pub fn next_fire_time(&self, trigger_key: &TriggerKey) -> Option<DateTime<Utc>> {
        self.backend.next_fire_time(trigger_key)
    }

    pub fn ack_mode(&self) -> AckMode {
        self.ack_mode
    }

    /// Get backend reference
    pub fn backend(&self) -> &S {
        &self.backend
    }

    pub fn metrics(&self) -> &BridgeMetrics {
        &self.metrics
    }

    /// Stop the scheduler. With `wait_for_jobs`, blocks until in-flight
    /// fires return; do not call that form from an async task whose
    /// consumer those fires are waiting on.
    pub fn shutdown(&self, wait_for_jobs: bool) {
        self.backend.shutdown(wait_for_jobs);
    }
}

impl<P: JobPayload, S: ExternalScheduler> Drop for TaskScheduler<P, S> {
    fn drop(&mut self) {
        if !self.backend.is_shutdown() {
            debug!("Task scheduler dropped, shutting down backend");
            self.backend.shutdown(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::EncodedPayload;
    use crate::config::SchedulerConfig;
    use crate::error::{DecodeResult, SchedulingError};
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    struct Reminder {
        user: String,
        text: String,
    }

    impl JobPayload for Reminder {
        const JOB_TYPE: &'static str = "reminder";

        fn encode(&self) -> EncodedPayload {
            EncodedPayload::new().with("user", &self.user).with("text", &self.text)
        }

        fn decode(payload: &EncodedPayload) -> DecodeResult<Self> {
            Ok(Self {
                user: payload.get("user")?,
                text: payload.get("text")?,
            })
        }
    }

    fn reminder() -> Reminder {
        Reminder {
            user: "ada".to_string(),
            text: "stand up".to_string(),
        }
    }

    fn backend() -> MemoryScheduler {
        MemoryScheduler::new(SchedulerConfig::default().with_thread_count(2))
    }

    fn yearly() -> ScheduleSpec {
        ScheduleSpec::cron("0 0 0 1 1 *")
    }

    #[test]
    fn test_facade_starts_backend() {
        let (scheduler, _rx) = TaskScheduler::<Reminder>::auto_acking(backend(), QueueConfig::unbounded()).unwrap();

        assert!(scheduler.backend().is_started());
        assert_eq!(scheduler.ack_mode(), AckMode::Auto);
    }

    #[test]
    fn test_schedule_stores_payload_and_job_type() {
        let (scheduler, mut rx) = TaskScheduler::<Reminder>::auto_acking(backend(), QueueConfig::unbounded()).unwrap();

        let next = scheduler
            .schedule_job(JobKey::named("j"), &reminder(), TriggerKey::named("t"), yearly())
            .unwrap();
        assert!(next.is_some());
        assert_eq!(scheduler.next_fire_time(&TriggerKey::named("t")), next);

        let receipt = scheduler.backend().fire_now(&TriggerKey::named("t")).unwrap();
        assert_eq!(receipt.wait(Duration::from_secs(2)), Some(Ok(())));
        assert_eq!(rx.try_pop(), Some(reminder()));
    }

    #[test]
    fn test_duplicate_job_key_is_rejected() {
        let (scheduler, _rx) = TaskScheduler::<Reminder>::auto_acking(backend(), QueueConfig::unbounded()).unwrap();
        scheduler
            .schedule_job(JobKey::named("j"), &reminder(), TriggerKey::named("t1"), yearly())
            .unwrap();

        let err = scheduler
            .schedule_job(JobKey::named("j"), &reminder(), TriggerKey::named("t2"), yearly())
            .unwrap_err();
        assert_eq!(err, SchedulingError::DuplicateJob(JobKey::named("j")));
        assert!(scheduler.next_fire_time(&TriggerKey::named("t2")).is_none());
    }

    struct Shadowing;

    impl JobPayload for Shadowing {
        const JOB_TYPE: &'static str = "shadowing";

        fn encode(&self) -> EncodedPayload {
            EncodedPayload::new().with(JOB_TYPE_KEY, &"billing".to_string())
        }

        fn decode(_: &EncodedPayload) -> DecodeResult<Self> {
            Ok(Self)
        }
    }

    #[test]
    fn test_payload_writing_job_type_key_is_rejected() {
        let (scheduler, _rx) = TaskScheduler::<Shadowing>::auto_acking(backend(), QueueConfig::unbounded()).unwrap();

        let err = scheduler
            .schedule_job(JobKey::named("j"), &Shadowing, TriggerKey::named("t"), yearly())
            .unwrap_err();
        assert_eq!(err, SchedulingError::ReservedField(JOB_TYPE_KEY.to_string()));
        assert!(!scheduler.check_exists(&JobKey::named("j")));
        assert!(scheduler.next_fire_time(&TriggerKey::named("t")).is_none());
    }

    #[test]
    fn test_unschedule_and_delete() {
        let (scheduler, _rx) = TaskScheduler::<Reminder>::auto_acking(backend(), QueueConfig::unbounded()).unwrap();
        scheduler
            .schedule_job(JobKey::named("j"), &reminder(), TriggerKey::named("t"), yearly())
            .unwrap();

        assert_eq!(scheduler.unschedule_job(&TriggerKey::named("t")), Ok(true));
        assert_eq!(scheduler.unschedule_job(&TriggerKey::named("t")), Ok(false));
        assert!(!scheduler.check_exists(&JobKey::named("j")));
        assert_eq!(scheduler.delete_job(&JobKey::named("j")), Ok(false));
    }

    #[test]
    fn test_invalid_cron_is_reported() {
        let (scheduler, _rx) = TaskScheduler::<Reminder>::auto_acking(backend(), QueueConfig::unbounded()).unwrap();

        let err = scheduler
            .schedule_job(
                JobKey::named("j"),
                &reminder(),
                TriggerKey::named("t"),
                ScheduleSpec::cron("not a cron"),
            )
            .unwrap_err();
        assert!(matches!(err, SchedulingError::InvalidSchedule { .. }));
        assert!(!scheduler.check_exists(&JobKey::named("j")));
    }

    #[test]
    fn test_shutdown_is_final() {
        let (scheduler, _rx) = TaskScheduler::<Reminder>::scoped(
            backend(),
            QueueConfig::bounded(8).with_ack_timeout(Duration::from_secs(1)),
        )
        .unwrap();
        assert_eq!(scheduler.ack_mode(), AckMode::Manual);

        scheduler.shutdown(true);
        assert!(scheduler.backend().is_shutdown());
        assert_eq!(
            scheduler.schedule_job(JobKey::named("j"), &reminder(), TriggerKey::named("t"), yearly()),
            Err(SchedulingError::Shutdown)
        );
    }

    #[test]
    fn test_shut_down_backend_cannot_be_bound() {
        let backend = backend();
        backend.shutdown(false);

        let result = TaskScheduler::<Reminder>::auto_acking(backend, QueueConfig::unbounded());
        assert!(matches!(result, Err(SchedulingError::Shutdown)));
    }
}
