pub mod ids;
pub mod ctx;
pub mod message;
pub mod schedule;

pub use ids::{FireId, JobKey, TriggerKey, DEFAULT_GROUP};
pub use ctx::{FireContext, JobDataMap};
pub use message::{AckableMessage, AckScope};
pub use schedule::{CompiledSchedule, ScheduleSpec};
