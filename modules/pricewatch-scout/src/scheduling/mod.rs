pub mod scheduler;
pub mod tick;

pub use scheduler::{ProductScheduler, ScheduleReason, ScheduleResult, ScheduledProduct};
pub use tick::{TickLoop, TickReport};
