use chrono::{DateTime, Utc};
use std::collections::HashMap;

use super::{FireId, JobKey, TriggerKey};

/// String-keyed data the scheduler persists alongside jobs and triggers
pub type JobDataMap = HashMap<String, String>;

/// Everything the scheduler hands to the job callback for one fire event
#[derive(Debug, Clone)]
pub struct FireContext {
    /// Unique per fire event; use for correlation and deduplication
    pub fire_id: FireId,

    pub job_key: JobKey,

    pub trigger_key: TriggerKey,

    /// When the scheduler actually invoked the callback
    pub fired_at: DateTime<Utc>,

    /// When the trigger was due; `None` for manual fires
    pub scheduled_at: Option<DateTime<Utc>>,

    /// Job data merged with trigger data (trigger entries win)
    pub data: JobDataMap,
}

impl FireContext {
    /// Create a context for a fire happening now
    pub fn new(job_key: JobKey, trigger_key: TriggerKey, data: JobDataMap) -> Self {
        Self {
            fire_id: FireId::new(),
            job_key,
            trigger_key,
            fired_at: Utc::now(),
            scheduled_at: None,
            data,
        }
    }

    pub fn with_scheduled_at(mut self, scheduled_at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(scheduled_at);
        self
    }

    /// Merge job-level and trigger-level data the way the scheduler presents it
    pub fn merge_data(job_data: &JobDataMap, trigger_data: &JobDataMap) -> JobDataMap {
        let mut merged = job_data.clone();
        merged.extend(trigger_data.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
    }

    /// How late the callback ran relative to the trigger's due time
    pub fn delay(&self) -> Option<chrono::Duration> {
        self.scheduled_at.map(|due| self.fired_at - due)
    }
}
