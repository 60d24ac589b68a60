pub mod break_event;

pub use break_event::{BreakEvent, OutcomeCount};
