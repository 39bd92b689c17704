pub mod memory;

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::{
    config::SchedulerConfig,
    error::{JobError, SchedulingResult},
    types::{FireContext, JobDataMap, JobKey, ScheduleSpec, TriggerKey},
};

/// The single entry point a scheduler calls on every fire event.
///
/// Invoked synchronously on a scheduler worker thread; the returned result
/// is the fire outcome the scheduler's own retry and misfire policy acts on.
pub trait JobCallback: Send + Sync {
    fn execute(&self, ctx: &FireContext) -> Result<(), JobError>;
}

/// Job registration: identity plus the data stored with it
#[derive(Debug, Clone)]
pub struct JobDetail {
    pub key: JobKey,
    pub data: JobDataMap,
}

impl JobDetail {
    pub fn new(key: JobKey) -> Self {
        Self {
            key,
            data: JobDataMap::new(),
        }
    }

    pub fn with_data(mut self, data: JobDataMap) -> Self {
        self.data = data;
        self
    }
}

/// Trigger registration: when to fire which job, with per-trigger data
#[derive(Debug, Clone)]
pub struct Trigger {
    pub key: TriggerKey,
    pub job_key: JobKey,
    pub schedule: ScheduleSpec,
    pub data: JobDataMap,
}

impl Trigger {
    pub fn new(key: TriggerKey, job_key: JobKey, schedule: ScheduleSpec) -> Self {
        Self {
            key,
            job_key,
            schedule,
            data: JobDataMap::new(),
        }
    }

    pub fn with_data(mut self, data: JobDataMap) -> Self {
        self.data = data;
        self
    }
}

/// Scheduler capabilities the task scheduler facade builds on
pub trait ExternalScheduler: Send + Sync + 'static {
    fn config(&self) -> &SchedulerConfig;

    /// Install the callback run for every fire event, replacing any previous one
    fn set_job_callback(&self, callback: Arc<dyn JobCallback>);

    /// Register a job and its first trigger atomically.
    /// Returns the first fire time; fails on an existing job or trigger key.
    fn schedule_job(&self, job: JobDetail, trigger: Trigger) -> SchedulingResult<Option<DateTime<Utc>>>;

    /// Remove a trigger; `false` if it did not exist
    fn unschedule_job(&self, trigger_key: &TriggerKey) -> SchedulingResult<bool>;

    /// Replace a trigger's schedule, keeping its job and data
    fn reschedule_job(
        &self,
        trigger_key: &TriggerKey,
        schedule: ScheduleSpec,
    ) -> SchedulingResult<Option<DateTime<Utc>>>;

    /// Remove a job and all of its triggers; `false` if it did not exist
    fn delete_job(&self, job_key: &JobKey) -> SchedulingResult<bool>;

    fn check_exists(&self, job_key: &JobKey) -> bool;

    fn next_fire_time(&self, trigger_key: &TriggerKey) -> Option<DateTime<Utc>>;

    /// Begin firing triggers
    fn start(&self) -> SchedulingResult<()>;

    /// Stop firing triggers. In-flight callbacks are not interrupted;
    /// `wait_for_jobs` blocks until they return.
    fn shutdown(&self, wait_for_jobs: bool);

    fn is_started(&self) -> bool;

    fn is_shutdown(&self) -> bool;
}
