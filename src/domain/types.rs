//! Shared types for the presence pipeline

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Wire and storage format for event timestamps
pub const EVENT_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Newtype wrapper for tracker-assigned IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct TrackId(pub i64);

impl std::fmt::Display for TrackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Axis-aligned box in frame pixel coordinates, serialized as `[x1, y1, x2, y2]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f32; 4]", into = "[f32; 4]")]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Edges truncated toward zero to whole pixels
    #[inline]
    pub fn pixel_corners(&self) -> (i32, i32, i32, i32) {
        (self.x1 as i32, self.y1 as i32, self.x2 as i32, self.y2 as i32)
    }

    /// Whole-pixel centroid: edges truncated first, midpoint floored
    #[inline]
    pub fn centroid(&self) -> (i64, i64) {
        let (x1, y1, x2, y2) = self.pixel_corners();
        (
            (i64::from(x1) + i64::from(x2)).div_euclid(2),
            (i64::from(y1) + i64::from(y2)).div_euclid(2),
        )
    }
}

impl From<[f32; 4]> for BoundingBox {
    fn from(v: [f32; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

impl From<BoundingBox> for [f32; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

/// One object reported by the detection/tracking model for a single frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Absent until the tracker has confirmed the object
    #[serde(default)]
    pub track_id: Option<TrackId>,
    pub label: String,
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn tracked(track_id: i64, label: &str, bbox: BoundingBox) -> Self {
        Self { track_id: Some(TrackId(track_id)), label: label.to_string(), bbox }
    }
}

/// Edge of the aggregate occupancy boolean
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventStatus {
    Entry,
    Exit,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Entry => "ENTRY",
            EventStatus::Exit => "EXIT",
        }
    }
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An ENTRY/EXIT edge observed by the monitor
#[derive(Debug, Clone, PartialEq)]
pub struct PresenceEvent {
    pub status: EventStatus,
    pub time: NaiveDateTime,
}

impl PresenceEvent {
    pub fn new(status: EventStatus, time: NaiveDateTime) -> Self {
        Self { status, time }
    }

    /// Stamp an event with the local wall clock
    pub fn now(status: EventStatus) -> Self {
        Self::new(status, chrono::Local::now().naive_local())
    }

    pub fn payload(&self) -> EventPayload {
        EventPayload {
            status: self.status.as_str().to_string(),
            time: self.time.format(EVENT_TIME_FORMAT).to_string(),
        }
    }
}

/// JSON body of `POST /employee`
///
/// `status` is free text on the API side; only the monitor restricts it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPayload {
    pub status: String,
    pub time: String,
}

/// Local date-time forms, with `T` or a space separator and optional seconds
const NAIVE_TIME_FORMATS: [&str; 4] =
    [EVENT_TIME_FORMAT, "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"];

/// Forms carrying a UTC offset such as `+02:00` or `+0200`
const OFFSET_TIME_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%d %H:%M:%S%.f%z"];

/// Parse a client-supplied event time.
///
/// Accepts ISO-8601 date-times with `T` or a space, optional seconds and
/// fractional seconds, and a bare date (midnight). A trailing `Z` or UTC
/// offset is accepted and dropped, keeping the wall-clock fields as written.
pub fn parse_event_time(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    NAIVE_TIME_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(raw, f).ok())
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|t| t.naive_local()))
        .or_else(|| {
            OFFSET_TIME_FORMATS
                .iter()
                .find_map(|f| DateTime::parse_from_str(raw, f).ok())
                .map(|t| t.naive_local())
        })
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok().and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn test_detection_deserialize() {
        let json = r#"{"track_id": 7, "label": "person", "bbox": [10.0, 20.0, 30.0, 60.0]}"#;
        let det: Detection = serde_json::from_str(json).unwrap();
        assert_eq!(det.track_id, Some(TrackId(7)));
        assert_eq!(det.label, "person");
        assert_eq!(det.bbox.centroid(), (20, 40));
    }

    #[test]
    fn test_centroid_truncates_edges() {
        assert_eq!(BoundingBox::new(649.6, 200.0, 651.4, 400.0).centroid(), (650, 300));
        assert_eq!(BoundingBox::new(10.9, 10.9, 13.9, 13.9).centroid(), (11, 11));
        // floor, not toward zero
        assert_eq!(BoundingBox::new(-3.0, -3.0, 0.0, 0.0).centroid(), (-2, -2));
        assert_eq!(BoundingBox::new(-1e12, 0.0, 1e12, 0.0).centroid(), (-1, 0));
    }

    #[test]
    fn test_detection_without_track_id() {
        let json = r#"{"label": "chair", "bbox": [0, 0, 4, 4]}"#;
        let det: Detection = serde_json::from_str(json).unwrap();
        assert_eq!(det.track_id, None);

        let json = r#"{"track_id": null, "label": "person", "bbox": [0, 0, 4, 4]}"#;
        let det: Detection = serde_json::from_str(json).unwrap();
        assert_eq!(det.track_id, None);
    }

    #[test]
    fn test_event_status_serde() {
        assert_eq!(serde_json::to_string(&EventStatus::Entry).unwrap(), "\"ENTRY\"");
        let status: EventStatus = serde_json::from_str("\"EXIT\"").unwrap();
        assert_eq!(status, EventStatus::Exit);
    }

    #[test]
    fn test_payload_time_format() {
        let time = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_micro_opt(8, 30, 5, 250_000)
            .unwrap();
        let payload = PresenceEvent::new(EventStatus::Entry, time).payload();
        assert_eq!(payload.status, "ENTRY");
        assert_eq!(payload.time, "2024-01-01T08:30:05.250");
        assert_eq!(parse_event_time(&payload.time), Some(time));
    }

    #[test]
    fn test_parse_event_time_variants() {
        let t = parse_event_time("2024-01-01T00:00:00").unwrap();
        assert_eq!(t.hour(), 0);

        let t = parse_event_time("2024-03-05 17:42:10.123456").unwrap();
        assert_eq!(t.minute(), 42);
        assert_eq!(t.nanosecond(), 123_456_000);

        assert!(parse_event_time("yesterday").is_none());
        assert!(parse_event_time("").is_none());
    }

    #[test]
    fn test_parse_event_time_without_seconds_or_time() {
        let t = parse_event_time("2024-01-01 10:00").unwrap();
        assert_eq!((t.hour(), t.minute(), t.second()), (10, 0, 0));
        assert_eq!(parse_event_time("2024-01-01T10:00"), Some(t));

        let midnight = parse_event_time("2024-01-01").unwrap();
        assert_eq!(midnight.format(EVENT_TIME_FORMAT).to_string(), "2024-01-01T00:00:00");
    }

    #[test]
    fn test_parse_event_time_drops_offset() {
        let expected = parse_event_time("2024-01-01T10:00:00").unwrap();
        assert_eq!(parse_event_time("2024-01-01T10:00:00Z"), Some(expected));
        assert_eq!(parse_event_time("2024-01-01T10:00:00+02:00"), Some(expected));
        assert_eq!(parse_event_time("2024-01-01 10:00:00+0200"), Some(expected));
        assert_eq!(parse_event_time("2024-01-01T10:00:00.5-05:00").map(|t| t.hour()), Some(10));

        assert!(parse_event_time("2024-13-01T10:00:00Z").is_none());
    }
}
