use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::{
    backend::{JobDetail, Trigger},
    error::{SchedulingError, SchedulingResult},
    types::{CompiledSchedule, FireContext, JobKey, ScheduleSpec, TriggerKey},
};

/// A registered trigger with its evaluation state
#[derive(Debug, Clone)]
pub(crate) struct TriggerState {
    pub trigger: Trigger,
    pub compiled: CompiledSchedule,
    pub next_fire: Option<DateTime<Utc>>,
}

/// Jobs and triggers of one in-memory scheduler
#[derive(Debug, Default)]
pub(crate) struct TriggerStore {
    jobs: HashMap<JobKey, JobDetail>,
    triggers: HashMap<TriggerKey, TriggerState>,
}

impl TriggerStore {
    /// Register a job together with its first trigger; nothing is stored on failure
    pub fn add(
        &mut self,
        job: JobDetail,
        trigger: Trigger,
        now: DateTime<Utc>,
    ) -> SchedulingResult<Option<DateTime<Utc>>> {
        if self.jobs.contains_key(&job.key) {
            return Err(SchedulingError::DuplicateJob(job.key));
        }
        if self.triggers.contains_key(&trigger.key) {
            return Err(SchedulingError::DuplicateTrigger(trigger.key));
        }

        let compiled = trigger.schedule.compile()?;
        let first = compiled
            .first_fire(now)
            .ok_or_else(|| SchedulingError::WillNeverFire(trigger.key.clone()))?;

        let mut trigger = trigger;
        trigger.job_key = job.key.clone();
        self.jobs.insert(job.key.clone(), job);
        self.triggers.insert(
            trigger.key.clone(),
            TriggerState {
                trigger,
                compiled,
                next_fire: Some(first),
            },
        );
        Ok(Some(first))
    }

    /// Remove a trigger, and its job once no trigger references it
    pub fn remove_trigger(&mut self, key: &TriggerKey) -> bool {
        match self.triggers.remove(key) {
            Some(state) => {
                self.drop_orphan(&state.trigger.job_key);
                true
            }
            None => false,
        }
    }

    pub fn reschedule(
        &mut self,
        key: &TriggerKey,
        schedule: ScheduleSpec,
        now: DateTime<Utc>,
    ) -> SchedulingResult<Option<DateTime<Utc>>> {
        let state = self
            .triggers
            .get_mut(key)
            .ok_or_else(|| SchedulingError::UnknownTrigger(key.clone()))?;

        let compiled = schedule.compile()?;
        let first = compiled
            .first_fire(now)
            .ok_or_else(|| SchedulingError::WillNeverFire(key.clone()))?;

        state.trigger.schedule = schedule;
        state.compiled = compiled;
        state.next_fire = Some(first);
        Ok(Some(first))
    }

    pub fn remove_job(&mut self, key: &JobKey) -> bool {
        self.triggers.retain(|_, state| &state.trigger.job_key != key);
        self.jobs.remove(key).is_some()
    }

    pub fn contains_job(&self, key: &JobKey) -> bool {
        self.jobs.contains_key(key)
    }

    pub fn next_fire_time(&self, key: &TriggerKey) -> Option<DateTime<Utc>> {
        self.triggers.get(key).and_then(|state| state.next_fire)
    }

    /// Earliest pending fire time across all triggers
    pub fn earliest_fire(&self) -> Option<DateTime<Utc>> {
        self.triggers.values().filter_map(|state| state.next_fire).min()
    }

    /// Collect up to `limit` triggers due at `now`, in due order, and advance them.
    ///
    /// A trigger that fell behind fires once and resumes from `now`; a
    /// trigger with no further fire time is removed. Triggers beyond `limit`
    /// are left due and untouched.
    pub fn take_due(&mut self, now: DateTime<Utc>, limit: usize) -> Vec<FireContext> {
        let mut due: Vec<(DateTime<Utc>, TriggerKey)> = self
            .triggers
            .iter()
            .filter_map(|(key, state)| match state.next_fire {
                Some(at) if at <= now => Some((at, key.clone())),
                _ => None,
            })
            .collect();
        due.sort();
        due.truncate(limit);

        let mut fired = Vec::with_capacity(due.len());
        for (scheduled_at, key) in due {
            let Some(state) = self.triggers.get_mut(&key) else {
                continue;
            };
            let job_data = self
                .jobs
                .get(&state.trigger.job_key)
                .map(|job| job.data.clone())
                .unwrap_or_default();

            fired.push(
                FireContext::new(
                    state.trigger.job_key.clone(),
                    key.clone(),
                    FireContext::merge_data(&job_data, &state.trigger.data),
                )
                .with_scheduled_at(scheduled_at),
            );

            state.next_fire = state.compiled.next_after(now.max(scheduled_at));
            if state.next_fire.is_none() {
                self.remove_trigger(&key);
            }
        }
        fired
    }

    /// Context for an immediate fire of `key`, leaving its schedule untouched
    pub fn manual_fire(&self, key: &TriggerKey) -> SchedulingResult<FireContext> {
        let state = self
            .triggers
            .get(key)
            .ok_or_else(|| SchedulingError::UnknownTrigger(key.clone()))?;
        let job = self
            .jobs
            .get(&state.trigger.job_key)
            .ok_or_else(|| SchedulingError::UnknownJob(state.trigger.job_key.clone()))?;

        Ok(FireContext::new(
            job.key.clone(),
            key.clone(),
            FireContext::merge_data(&job.data, &state.trigger.data),
        ))
    }

    fn drop_orphan(&mut self, job_key: &JobKey) {
        let referenced = self
            .triggers
            .values()
            .any(|state| &state.trigger.job_key == job_key);
        if !referenced {
            self.jobs.remove(job_key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap()
    }

    fn job(name: &str) -> JobDetail {
        JobDetail::new(JobKey::named(name)).with_data([("from".to_string(), "job".to_string())].into())
    }

    fn trigger(name: &str, job: &str, schedule: ScheduleSpec) -> Trigger {
        Trigger::new(TriggerKey::named(name), JobKey::named(job), schedule)
    }

    #[test]
    fn test_duplicate_job_leaves_first_untouched() {
        let mut store = TriggerStore::default();
        let at = now() + Duration::minutes(5);
        store.add(job("j"), trigger("t1", "j", ScheduleSpec::one_shot(at)), now()).unwrap();

        let err = store
            .add(job("j"), trigger("t2", "j", ScheduleSpec::cron("0 * * * * *")), now())
            .unwrap_err();

        assert_eq!(err, SchedulingError::DuplicateJob(JobKey::named("j")));
        assert_eq!(store.next_fire_time(&TriggerKey::named("t1")), Some(at));
        assert_eq!(store.next_fire_time(&TriggerKey::named("t2")), None);
    }

    #[test]
    fn test_cron_that_never_fires_is_rejected() {
        let mut store = TriggerStore::default();
        let err = store
            .add(job("j"), trigger("t", "j", ScheduleSpec::cron("0 0 0 1 1 * 2000")), now())
            .unwrap_err();

        assert_eq!(err, SchedulingError::WillNeverFire(TriggerKey::named("t")));
        assert!(!store.contains_job(&JobKey::named("j")));
    }

    #[test]
    fn test_take_due_advances_cron_and_retires_one_shot() {
        let mut store = TriggerStore::default();
        store
            .add(job("every"), trigger("cron", "every", ScheduleSpec::cron("0 * * * * *")), now())
            .unwrap();
        store
            .add(job("once"), trigger("shot", "once", ScheduleSpec::one_shot(now())), now())
            .unwrap();

        let fired = store.take_due(now() + Duration::minutes(1), usize::MAX);
        let keys: Vec<_> = fired.iter().map(|ctx| ctx.trigger_key.name().to_string()).collect();
        assert_eq!(keys, vec!["shot", "cron"]);
        assert_eq!(fired[0].data["from"], "job");

        assert_eq!(
            store.next_fire_time(&TriggerKey::named("cron")),
            Some(now() + Duration::minutes(2))
        );
        assert!(!store.contains_job(&JobKey::named("once")));
    }

    #[test]
    fn test_behind_cron_fires_once_then_resumes_from_now() {
        let mut store = TriggerStore::default();
        store
            .add(job("j"), trigger("t", "j", ScheduleSpec::cron("0 * * * * *")), now())
            .unwrap();

        let late = now() + Duration::minutes(10) + Duration::seconds(30);
        assert_eq!(store.take_due(late, usize::MAX).len(), 1);
        assert_eq!(
            store.next_fire_time(&TriggerKey::named("t")),
            Some(now() + Duration::minutes(11))
        );
    }

    #[test]
    fn test_take_due_limit_leaves_rest_due() {
        let mut store = TriggerStore::default();
        for name in ["a", "b", "c"] {
            store
                .add(job(name), trigger(name, name, ScheduleSpec::cron("0 * * * * *")), now())
                .unwrap();
        }
        let first = now() + Duration::minutes(1);
        let late = first + Duration::minutes(5);

        assert_eq!(store.take_due(late, 0).len(), 0);
        assert_eq!(store.take_due(late, 2).len(), 2);

        let untaken: Vec<_> = ["a", "b", "c"]
            .into_iter()
            .filter(|name| store.next_fire_time(&TriggerKey::named(*name)) == Some(first))
            .collect();
        assert_eq!(untaken.len(), 1);

        let rest = store.take_due(late, usize::MAX);
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].trigger_key.name(), untaken[0]);
        assert_eq!(rest[0].scheduled_at, Some(first));
        assert!(store.take_due(late, usize::MAX).is_empty());
    }

    #[test]
    fn test_reschedule_and_unknown_trigger() {
        let mut store = TriggerStore::default();
        store
            .add(job("j"), trigger("t", "j", ScheduleSpec::one_shot(now())), now())
            .unwrap();

        let later = now() + Duration::hours(1);
        assert_eq!(
            store.reschedule(&TriggerKey::named("t"), ScheduleSpec::one_shot(later), now()),
            Ok(Some(later))
        );
        assert_eq!(
            store.reschedule(&TriggerKey::named("missing"), ScheduleSpec::one_shot(later), now()),
            Err(SchedulingError::UnknownTrigger(TriggerKey::named("missing")))
        );
    }

    #[test]
    fn test_remove_trigger_and_job() {
        let mut store = TriggerStore::default();
        store
            .add(job("j"), trigger("t", "j", ScheduleSpec::cron("0 * * * * *")), now())
            .unwrap();

        assert!(store.remove_trigger(&TriggerKey::named("t")));
        assert!(!store.remove_trigger(&TriggerKey::named("t")));
        assert!(!store.contains_job(&JobKey::named("j")));
        assert!(!store.remove_job(&JobKey::named("j")));
    }

    #[test]
    fn test_manual_fire_does_not_advance() {
        let mut store = TriggerStore::default();
        let at = now() + Duration::hours(2);
        store.add(job("j"), trigger("t", "j", ScheduleSpec::one_shot(at)), now()).unwrap();

        let ctx = store.manual_fire(&TriggerKey::named("t")).unwrap();
        assert_eq!(ctx.job_key, JobKey::named("j"));
        assert!(ctx.scheduled_at.is_none());
        assert_eq!(store.next_fire_time(&TriggerKey::named("t")), Some(at));
    }
}
