//! Region of interest inside the video frame
//!
//! The ROI is fixed for the process lifetime. Edges are whole pixels,
//! truncated from the configured fractions of frame width/height.

use crate::domain::types::BoundingBox;
use anyhow::bail;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Roi {
    x1: u32,
    y1: u32,
    x2: u32,
    y2: u32,
}

impl Roi {
    /// Build the ROI from fractional edges, e.g. `(0.65, 0.30, 0.99, 0.99)`
    pub fn from_fractions(
        width: u32,
        height: u32,
        (fx1, fy1, fx2, fy2): (f64, f64, f64, f64),
    ) -> anyhow::Result<Self> {
        for (name, f) in [("x1", fx1), ("y1", fy1), ("x2", fx2), ("y2", fy2)] {
            if !(0.0..=1.0).contains(&f) {
                bail!("roi.{name} must be a fraction in [0, 1], got {f}");
            }
        }

        let roi = Self {
            x1: (width as f64 * fx1) as u32,
            y1: (height as f64 * fy1) as u32,
            x2: (width as f64 * fx2) as u32,
            y2: (height as f64 * fy2) as u32,
        };

        if roi.x1 >= roi.x2 || roi.y1 >= roi.y2 {
            bail!("roi is empty: ({}, {}) -> ({}, {})", roi.x1, roi.y1, roi.x2, roi.y2);
        }
        Ok(roi)
    }

    /// Strict containment: a point on any edge is outside
    #[inline]
    pub fn contains(&self, x: i64, y: i64) -> bool {
        i64::from(self.x1) < x
            && x < i64::from(self.x2)
            && i64::from(self.y1) < y
            && y < i64::from(self.y2)
    }

    #[inline]
    pub fn contains_centroid(&self, bbox: &BoundingBox) -> bool {
        let (cx, cy) = bbox.centroid();
        self.contains(cx, cy)
    }

    pub fn x1(&self) -> u32 {
        self.x1
    }

    pub fn y1(&self) -> u32 {
        self.y1
    }

    pub fn x2(&self) -> u32 {
        self.x2
    }

    pub fn y2(&self) -> u32 {
        self.y2
    }

    pub fn width(&self) -> u32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> u32 {
        self.y2 - self.y1
    }
}
