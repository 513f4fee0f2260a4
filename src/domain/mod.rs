//! Domain models - detections, ROI geometry and occupancy state
//!
//! - `types` - Detections, bounding boxes, presence events and their wire form
//! - `roi` - Fixed region of interest and strict centroid containment
//! - `occupancy` - Entry/exit edge detector and absence timer

pub mod occupancy;
pub mod roi;
pub mod types;

pub use occupancy::{assess, FrameAssessment, OccupancyEffect, OccupancyState, OccupancyStatus};
pub use roi::Roi;
pub use types::{BoundingBox, Detection, EventPayload, EventStatus, PresenceEvent, TrackId};
