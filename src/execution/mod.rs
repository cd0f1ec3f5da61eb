//! Service execution: units of work, scheduling and entry points

pub mod engine;
pub mod runner;
pub mod scheduler;

pub use engine::{EventHandler, ServiceEngine, ServiceEvent};
pub use runner::{PipelineRunner, PipelineUnit, RunReport};
pub use scheduler::{Clock, ScheduleState, Scheduler, SystemClock, Trigger};
