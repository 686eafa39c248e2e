//! Recurring fetch scheduling
//!
//! Registrations are durable rows in the `schedules` table; the runner
//! turns them into fetch cycles on a fixed interval.

mod registrar;
mod runner;

pub use registrar::{schedule_name, ScheduleRegistrar, SCHEDULE_NAME_PREFIX};
pub use runner::{CycleResult, Scheduler};
