//! Built-in node acquisition strategies.

pub mod cron_schedule;
pub mod restart_down;
pub mod static_nodes;
pub mod time_slot;

pub use cron_schedule::CronPolicy;
pub use restart_down::RestartDownNodesPolicy;
pub use static_nodes::StaticPolicy;
pub use time_slot::TimeSlotPolicy;
