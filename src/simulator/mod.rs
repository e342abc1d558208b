pub mod alarms;
pub mod aqc;
pub mod batch;
pub mod chemicals;
pub mod devices;
pub mod events;
pub mod feed;
pub mod filter;
pub mod physics;
pub mod pid;
pub mod plant;
pub mod scheduler;
pub mod tanks;

pub use events::{Event, EventKind};
pub use plant::{Command, Engine, EngineConfig, ProcessSnapshot, TickFrame};
pub use scheduler::Scheduler;
