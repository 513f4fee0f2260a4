//! Frame annotation: ROI outline, tracked people, availability banner
//!
//! Text uses a built-in 5x7 bitmap font scaled by whole pixels, so no font
//! files are needed at runtime. Characters outside the font draw as blanks.

use crate::domain::occupancy::{FrameAssessment, OccupancyStatus, PersonMark};
use crate::domain::roi::Roi;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;

pub const ROI_COLOR: Rgb<u8> = Rgb([0, 0, 255]);
pub const INSIDE_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const OUTSIDE_COLOR: Rgb<u8> = Rgb([255, 255, 0]);
pub const ALERT_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

const BOX_THICKNESS: i32 = 2;
const LABEL_SCALE: i32 = 2;
const STATUS_SCALE: i32 = 3;
/// Gap between a box's top edge and its label baseline
const LABEL_GAP: i32 = 10;
const STATUS_X: i32 = 40;
const STATUS_BASELINE: i32 = 40;
const ALERT_BASELINE: i32 = 80;

const GLYPH_W: i32 = 5;
const GLYPH_H: i32 = 7;

fn glyph(ch: char) -> [u8; 7] {
    match ch {
        'A' => [0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'B' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10001, 0b10001, 0b11110],
        'C' => [0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110],
        'D' => [0b11110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b11110],
        'E' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b11111],
        'F' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000],
        'G' => [0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01111],
        'H' => [0b10001, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'I' => [0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        'J' => [0b00111, 0b00010, 0b00010, 0b00010, 0b00010, 0b10010, 0b01100],
        'K' => [0b10001, 0b10010, 0b10100, 0b11000, 0b10100, 0b10010, 0b10001],
        'L' => [0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111],
        'M' => [0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001],
        'N' => [0b10001, 0b10001, 0b11001, 0b10101, 0b10011, 0b10001, 0b10001],
        'O' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'P' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000],
        'Q' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10101, 0b10010, 0b01101],
        'R' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001],
        'S' => [0b01111, 0b10000, 0b10000, 0b01110, 0b00001, 0b00001, 0b11110],
        'T' => [0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100],
        'U' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'V' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01010, 0b00100],
        'W' => [0b10001, 0b10001, 0b10001, 0b10101, 0b10101, 0b10101, 0b01010],
        'X' => [0b10001, 0b10001, 0b01010, 0b00100, 0b01010, 0b10001, 0b10001],
        'Y' => [0b10001, 0b10001, 0b01010, 0b00100, 0b00100, 0b00100, 0b00100],
        'Z' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b11111],
        '0' => [0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110],
        '1' => [0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        '2' => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111],
        '3' => [0b11111, 0b00010, 0b00100, 0b00010, 0b00001, 0b10001, 0b01110],
        '4' => [0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010],
        '5' => [0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110],
        '6' => [0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110],
        '7' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000],
        '8' => [0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110],
        '9' => [0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100],
        '(' => [0b00010, 0b00100, 0b01000, 0b01000, 0b01000, 0b00100, 0b00010],
        ')' => [0b01000, 0b00100, 0b00010, 0b00010, 0b00010, 0b00100, 0b01000],
        ':' => [0b00000, 0b01100, 0b01100, 0b00000, 0b01100, 0b01100, 0b00000],
        '-' => [0b00000, 0b00000, 0b00000, 0b11111, 0b00000, 0b00000, 0b00000],
        _ => [0; 7],
    }
}

/// Height in pixels of text drawn at `scale`
pub fn text_height(scale: i32) -> i32 {
    GLYPH_H * scale
}

/// Width in pixels of `text` drawn at `scale` (one blank column between glyphs)
pub fn text_width(text: &str, scale: i32) -> i32 {
    let n = text.chars().count() as i32;
    if n == 0 {
        0
    } else {
        n * (GLYPH_W + 1) * scale - scale
    }
}

/// Draw `text` with its top-left corner at `(x, y)`; pixels off the frame are clipped
pub fn draw_text(img: &mut RgbImage, text: &str, x: i32, y: i32, scale: i32, color: Rgb<u8>) {
    let scale = scale.max(1);
    for (i, ch) in text.chars().enumerate() {
        let gx = x + i as i32 * (GLYPH_W + 1) * scale;
        for (row, bits) in glyph(ch.to_ascii_uppercase()).iter().enumerate() {
            for col in 0..GLYPH_W {
                if (bits >> (GLYPH_W - 1 - col)) & 1 == 1 {
                    let rect = Rect::at(gx + col * scale, y + row as i32 * scale)
                        .of_size(scale as u32, scale as u32);
                    draw_filled_rect_mut(img, rect, color);
                }
            }
        }
    }
}

/// Corners pulled in to at most one pixel beyond the frame on each side
fn clamp_to_frame(
    img: &RgbImage,
    (x1, y1, x2, y2): (i32, i32, i32, i32),
) -> (i32, i32, i32, i32) {
    let max_x = i32::try_from(img.width()).unwrap_or(i32::MAX);
    let max_y = i32::try_from(img.height()).unwrap_or(i32::MAX);
    (x1.clamp(-1, max_x), y1.clamp(-1, max_y), x2.clamp(-1, max_x), y2.clamp(-1, max_y))
}

/// Rectangle outline `thickness` pixels wide, growing inward from the given corners
pub fn draw_box(
    img: &mut RgbImage,
    corners: (i32, i32, i32, i32),
    color: Rgb<u8>,
    thickness: i32,
) {
    let (x1, y1, x2, y2) = clamp_to_frame(img, corners);
    for offset in 0..thickness {
        let inset = offset.saturating_mul(2);
        let w = x2.saturating_sub(x1).saturating_sub(inset);
        let h = y2.saturating_sub(y1).saturating_sub(inset);
        if w <= 0 || h <= 0 {
            break;
        }
        let rect = Rect::at(x1.saturating_add(offset), y1.saturating_add(offset))
            .of_size(w as u32 + 1, h as u32 + 1);
        draw_hollow_rect_mut(img, rect, color);
    }
}

/// Text drawn with its baseline at `baseline`, kept on-frame at the top
fn draw_text_at_baseline(
    img: &mut RgbImage,
    text: &str,
    x: i32,
    baseline: i32,
    scale: i32,
    color: Rgb<u8>,
) {
    let top = baseline.saturating_sub(text_height(scale)).max(0);
    draw_text(img, text, x, top, scale, color);
}

pub fn person_label(person: &PersonMark) -> String {
    if person.inside {
        format!("ID {} (EMPLOYEE)", person.track_id)
    } else {
        format!("ID {}", person.track_id)
    }
}

fn draw_person(img: &mut RgbImage, person: &PersonMark) {
    let color = if person.inside { INSIDE_COLOR } else { OUTSIDE_COLOR };
    let corners = clamp_to_frame(img, person.bbox.pixel_corners());
    draw_box(img, corners, color, BOX_THICKNESS);
    let label = person_label(person);
    let baseline = corners.1.saturating_sub(LABEL_GAP);
    draw_text_at_baseline(img, &label, corners.0, baseline, LABEL_SCALE, color);
}

fn draw_status_line(img: &mut RgbImage, text: &str, baseline: i32, color: Rgb<u8>) {
    draw_text_at_baseline(img, text, STATUS_X, baseline, STATUS_SCALE, color);
}

fn draw_status(img: &mut RgbImage, status: &OccupancyStatus) {
    match *status {
        OccupancyStatus::Available => {
            draw_status_line(img, "EMPLOYEE AVAILABLE", STATUS_BASELINE, INSIDE_COLOR);
        }
        OccupancyStatus::Out { absent_for } => {
            let text = format!("EMPLOYEE OUT {}s", absent_for.as_secs());
            draw_status_line(img, &text, STATUS_BASELINE, OUTSIDE_COLOR);
        }
        OccupancyStatus::NotAvailable { absent_for } => {
            // The absence counter keeps running under the banner
            let text = format!("EMPLOYEE OUT {}s", absent_for.as_secs());
            draw_status_line(img, &text, STATUS_BASELINE, OUTSIDE_COLOR);
            draw_status_line(img, "EMPLOYEE NOT AVAILABLE", ALERT_BASELINE, ALERT_COLOR);
        }
    }
}

/// Annotate one frame in place
pub fn annotate(
    img: &mut RgbImage,
    roi: &Roi,
    assessment: &FrameAssessment,
    status: &OccupancyStatus,
) {
    let (x1, y1) = (roi.x1() as i32, roi.y1() as i32);
    draw_box(img, (x1, y1, roi.x2() as i32, roi.y2() as i32), ROI_COLOR, BOX_THICKNESS);
    draw_text_at_baseline(img, "EMPLOYEE AREA", x1, y1 - LABEL_GAP, LABEL_SCALE, ROI_COLOR);

    for person in &assessment.people {
        draw_person(img, person);
    }
    draw_status(img, status);
}
