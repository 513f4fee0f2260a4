//! ROI occupancy state machine
//!
//! Folds one "anyone inside the ROI" boolean per frame into ENTRY/EXIT edges
//! and a one-shot absence alert.
//!
//! Key behaviors:
//! - ENTRY fires once per run of occupied frames, EXIT once per run of empty
//!   frames that follows an occupied run
//! - The absence clock starts at the first empty frame (EXIT, or startup)
//! - The absence alert fires once per empty run, strictly after the threshold
//! - `step()` takes the frame time explicitly so tests need no video or clock

use crate::domain::roi::Roi;
use crate::domain::types::{BoundingBox, Detection, EventStatus, TrackId};
use smallvec::SmallVec;
use std::time::{Duration, Instant};

/// Default absence window before the one-shot alert (5 minutes)
pub const DEFAULT_ABSENCE_THRESHOLD: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Occupied,
    /// `since` is unset until the first empty frame is observed
    Empty { since: Option<Instant>, alerted: bool },
}

/// Side effect requested by a single `step()`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OccupancyEffect {
    Edge(EventStatus),
    AbsenceAlert { absent_for: Duration },
}

/// What the overlay should say about the ROI for this frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OccupancyStatus {
    Available,
    Out { absent_for: Duration },
    /// Stays set for the rest of the empty run, after the alert fired
    NotAvailable { absent_for: Duration },
}

/// Result of feeding one frame into the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub effects: SmallVec<[OccupancyEffect; 2]>,
    pub status: OccupancyStatus,
}

impl Transition {
    pub fn edge(&self) -> Option<EventStatus> {
        self.effects.iter().find_map(|e| match e {
            OccupancyEffect::Edge(status) => Some(*status),
            _ => None,
        })
    }

    pub fn alert_raised(&self) -> bool {
        self.effects.iter().any(|e| matches!(e, OccupancyEffect::AbsenceAlert { .. }))
    }
}

/// Occupancy state carried across frames
#[derive(Debug, Clone)]
pub struct OccupancyState {
    phase: Phase,
    absence_threshold: Duration,
}

impl Default for OccupancyState {
    fn default() -> Self {
        Self::new(DEFAULT_ABSENCE_THRESHOLD)
    }
}

impl OccupancyState {
    pub fn new(absence_threshold: Duration) -> Self {
        Self { phase: Phase::Empty { since: None, alerted: false }, absence_threshold }
    }

    /// Advance the state machine by one frame
    pub fn step(&mut self, any_inside: bool, now: Instant) -> Transition {
        let mut effects = SmallVec::new();

        if any_inside {
            if self.phase != Phase::Occupied {
                effects.push(OccupancyEffect::Edge(EventStatus::Entry));
                self.phase = Phase::Occupied;
            }
            return Transition { effects, status: OccupancyStatus::Available };
        }

        let (since, alerted) = match self.phase {
            Phase::Occupied => {
                effects.push(OccupancyEffect::Edge(EventStatus::Exit));
                (now, false)
            }
            Phase::Empty { since, alerted } => (since.unwrap_or(now), alerted),
        };

        let absent_for = now.saturating_duration_since(since);
        let over_threshold = absent_for > self.absence_threshold;
        if over_threshold && !alerted {
            effects.push(OccupancyEffect::AbsenceAlert { absent_for });
        }
        self.phase = Phase::Empty { since: Some(since), alerted: alerted || over_threshold };

        let status = if over_threshold {
            OccupancyStatus::NotAvailable { absent_for }
        } else {
            OccupancyStatus::Out { absent_for }
        };
        Transition { effects, status }
    }

    /// Whether the previous frame had someone inside the ROI
    pub fn last_inside(&self) -> bool {
        self.phase == Phase::Occupied
    }

    pub fn empty_since(&self) -> Option<Instant> {
        match self.phase {
            Phase::Empty { since, .. } => since,
            Phase::Occupied => None,
        }
    }

    pub fn alert_sent(&self) -> bool {
        matches!(self.phase, Phase::Empty { alerted: true, .. })
    }

    pub fn absence_threshold(&self) -> Duration {
        self.absence_threshold
    }
}

/// A tracked person and where its centroid falls relative to the ROI
#[derive(Debug, Clone, PartialEq)]
pub struct PersonMark {
    pub track_id: TrackId,
    pub bbox: BoundingBox,
    pub inside: bool,
}

/// Per-frame classification of the model output against the ROI
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameAssessment {
    pub any_inside: bool,
    pub people: Vec<PersonMark>,
}

/// Classify detections against the ROI.
///
/// Only tracked objects carrying `person_label` count; untracked detections
/// are ignored entirely.
pub fn assess(detections: &[Detection], roi: &Roi, person_label: &str) -> FrameAssessment {
    let people: Vec<PersonMark> = detections
        .iter()
        .filter(|d| d.label == person_label)
        .filter_map(|d| {
            let track_id = d.track_id?;
            Some(PersonMark { track_id, bbox: d.bbox, inside: roi.contains_centroid(&d.bbox) })
        })
        .collect();

    FrameAssessment { any_inside: people.iter().any(|p| p.inside), people }
}
