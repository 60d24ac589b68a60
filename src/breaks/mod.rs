pub mod schedule;
pub mod scheduler;
mod worker;

pub use schedule::{BreakOutcome, BreakPhase, BreakSchedule, ScheduleSnapshot};
pub use scheduler::{BreakScheduler, TICK_SECS};
