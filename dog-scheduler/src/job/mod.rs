pub mod factory;

pub use factory::{AckMode, QueueJobFactory};

pub use crate::codec::JobPayload;
