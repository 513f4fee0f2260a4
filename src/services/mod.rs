//! Services - business logic and process orchestration
//!
//! - `monitor` - per-frame occupancy pipeline and its run loop
//! - `overlay` - frame annotation
//! - `event_worker` - async delivery of ENTRY/EXIT events
//! - `supervisor` - launches and stops the pipeline processes

pub mod event_worker;
pub mod monitor;
pub mod overlay;
pub mod supervisor;

// Re-export commonly used types
pub use event_worker::{create_event_worker, EventSender, EventWorker};
pub use monitor::{run_monitor, OccupancyMonitor};
pub use supervisor::Supervisor;
