use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{SchedulingError, SchedulingResult};

/// When a trigger fires. Passed through to the scheduler backend untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScheduleSpec {
    /// 6- or 7-field cron expression with seconds: "0 */5 * * * *"
    Cron { expr: String },
    /// Fire once at the given instant
    OneShot { at: DateTime<Utc> },
}

impl ScheduleSpec {
    pub fn cron(expr: impl Into<String>) -> Self {
        Self::Cron { expr: expr.into() }
    }

    pub fn one_shot(at: DateTime<Utc>) -> Self {
        Self::OneShot { at }
    }

    /// Validate and prepare the schedule for evaluation
    pub fn compile(&self) -> SchedulingResult<CompiledSchedule> {
        match self {
            Self::Cron { expr } => cron::Schedule::from_str(expr)
                .map(|schedule| CompiledSchedule::Cron(Box::new(schedule)))
                .map_err(|e| SchedulingError::InvalidSchedule {
                    expr: expr.clone(),
                    reason: e.to_string(),
                }),
            Self::OneShot { at } => Ok(CompiledSchedule::OneShot(*at)),
        }
    }
}

/// A schedule ready to produce fire times
#[derive(Debug, Clone)]
pub enum CompiledSchedule {
    Cron(Box<cron::Schedule>),
    OneShot(DateTime<Utc>),
}

impl CompiledSchedule {
    /// First fire time for a trigger registered at `now`.
    ///
    /// One-shot instants already in the past fire immediately.
    pub fn first_fire(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Cron(schedule) => schedule.after(&now).next(),
            Self::OneShot(at) => Some(*at),
        }
    }

    /// Fire time following a fire at `previous`; `None` once exhausted
    pub fn next_after(&self, previous: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Cron(schedule) => schedule.after(&previous).next(),
            Self::OneShot(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_invalid_cron_is_rejected() {
        let err = ScheduleSpec::cron("not a cron").compile().unwrap_err();
        assert!(matches!(err, SchedulingError::InvalidSchedule { ref expr, .. } if expr == "not a cron"));
    }

    #[test]
    fn test_cron_next_fire_is_strictly_after() {
        let compiled = ScheduleSpec::cron("0 * * * * *").compile().unwrap();
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

        let first = compiled.first_fire(now).unwrap();
        assert_eq!(first, now + Duration::minutes(1));
        assert_eq!(compiled.next_after(first).unwrap(), first + Duration::minutes(1));
    }

    #[test]
    fn test_one_shot_fires_once() {
        let at = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let compiled = ScheduleSpec::one_shot(at).compile().unwrap();

        assert_eq!(compiled.first_fire(Utc::now()), Some(at));
        assert_eq!(compiled.next_after(at), None);
    }

    #[test]
    fn test_schedule_spec_serde_shape() {
        let spec = ScheduleSpec::cron("0 0 8 * * *");
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["type"], "cron");
        assert_eq!(json["expr"], "0 0 8 * * *");
    }
}
