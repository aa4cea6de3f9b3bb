//! Decoded frame container and geometry helpers.
//!
//! - `Frame`: RGB8 pixels plus resolution, capture sequence and capture instant.
//! - `Resolution`: frame dimensions, displayed as `WxH`.
//! - `BoundingBox`: absolute pixel box used by detections and enrichment crops.
//!
//! Frames are owned by the capture buffer and handed to readers as copies, so a
//! reader can never observe a frame that is still being written.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

/// Bytes per pixel for the RGB8 layout every source decodes into.
pub const RGB_CHANNELS: usize = 3;

// ----------------------------------------------------------------------------
// Resolution
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

// ----------------------------------------------------------------------------
// BoundingBox
// ----------------------------------------------------------------------------

/// Axis-aligned box in absolute pixel coordinates (`x1,y1` top-left, `x2,y2` bottom-right).
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
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

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Intersection over union with another box. Zero when either box is empty.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);
        let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }

    /// Integer pixel corners `[x1, y1, x2, y2]`, truncated like the detector output.
    pub fn to_pixels(&self) -> [i32; 4] {
        [
            self.x1 as i32,
            self.y1 as i32,
            self.x2 as i32,
            self.y2 as i32,
        ]
    }

    /// `[x, y, width, height]` relative to the given resolution.
    ///
    /// Returns zeros for an empty resolution instead of dividing by zero.
    pub fn normalized(&self, resolution: Resolution) -> [f32; 4] {
        if resolution.is_empty() {
            return [0.0; 4];
        }
        let w = resolution.width as f32;
        let h = resolution.height as f32;
        [
            self.x1 / w,
            self.y1 / h,
            (self.x2 - self.x1) / w,
            (self.y2 - self.y1) / h,
        ]
    }
}

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// A decoded RGB8 frame.
///
/// `Clone` is a full pixel copy; the capture buffer relies on this for copy-on-read.
#[derive(Clone)]
pub struct Frame {
    data: Vec<u8>,
    resolution: Resolution,
    /// Capture sequence assigned by the capture buffer (0 until published).
    pub sequence: u64,
    captured_at: Instant,
}

impl Frame {
    /// Build a frame from packed RGB8 pixels.
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(RGB_CHANNELS))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if data.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                data.len()
            ));
        }
        Ok(Self {
            data,
            resolution: Resolution::new(width, height),
            sequence: 0,
            captured_at: Instant::now(),
        })
    }

    /// Solid-color frame, handy for synthetic sources and tests.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let pixel_count = width as usize * height as usize;
        let mut data = Vec::with_capacity(pixel_count * RGB_CHANNELS);
        for _ in 0..pixel_count {
            data.extend_from_slice(&rgb);
        }
        Self {
            data,
            resolution: Resolution::new(width, height),
            sequence: 0,
            captured_at: Instant::now(),
        }
    }

    pub fn width(&self) -> u32 {
        self.resolution.width
    }

    pub fn height(&self) -> u32 {
        self.resolution.height
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn into_pixels(self) -> Vec<u8> {
        self.data
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    /// Copy out the region under `bbox`, clamped to the frame.
    ///
    /// Returns `None` when the clamped region has no area.
    pub fn crop(&self, bbox: &BoundingBox) -> Option<Frame> {
        let x1 = clamp_coord(bbox.x1, self.width());
        let y1 = clamp_coord(bbox.y1, self.height());
        let x2 = clamp_coord(bbox.x2, self.width());
        let y2 = clamp_coord(bbox.y2, self.height());
        if x2 <= x1 || y2 <= y1 {
            return None;
        }

        let crop_w = x2 - x1;
        let crop_h = y2 - y1;
        let row_bytes = self.width() as usize * RGB_CHANNELS;
        let mut data = Vec::with_capacity(crop_w as usize * crop_h as usize * RGB_CHANNELS);
        for row in y1..y2 {
            let start = row as usize * row_bytes + x1 as usize * RGB_CHANNELS;
            let end = start + crop_w as usize * RGB_CHANNELS;
            data.extend_from_slice(&self.data[start..end]);
        }

        Some(Frame {
            data,
            resolution: Resolution::new(crop_w, crop_h),
            sequence: self.sequence,
            captured_at: self.captured_at,
        })
    }
}

impl fmt::Debug for Frame {
    // Pixel content is deliberately left out of debug output.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("resolution", &self.resolution)
            .field("sequence", &self.sequence)
            .field("bytes", &self.data.len())
            .finish()
    }
}

fn clamp_coord(value: f32, limit: u32) -> u32 {
    if value.is_nan() || value <= 0.0 {
        0
    } else {
        (value as u32).min(limit)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_rejects_mismatched_buffer() {
        assert!(Frame::new(vec![0u8; 10], 4, 4).is_err());
        assert!(Frame::new(vec![0u8; 4 * 4 * 3], 4, 4).is_ok());
    }

    #[test]
    fn crop_copies_clamped_region() {
        let mut data = Vec::new();
        for y in 0..4u8 {
            for x in 0..4u8 {
                data.extend_from_slice(&[x, y, 0]);
            }
        }
        let frame = Frame::new(data, 4, 4).unwrap();

        let crop = frame.crop(&BoundingBox::new(1.0, 2.0, 10.0, 10.0)).unwrap();
        assert_eq!(crop.resolution(), Resolution::new(3, 2));
        assert_eq!(&crop.pixels()[..3], &[1, 2, 0]);
        assert_eq!(&crop.pixels()[crop.pixels().len() - 3..], &[3, 3, 0]);
    }

    #[test]
    fn crop_outside_frame_is_none() {
        let frame = Frame::filled(8, 8, [10, 20, 30]);
        assert!(frame.crop(&BoundingBox::new(9.0, 9.0, 12.0, 12.0)).is_none());
        assert!(frame.crop(&BoundingBox::new(3.0, 3.0, 3.0, 5.0)).is_none());
    }

    #[test]
    fn normalized_box_uses_resolution() {
        let bbox = BoundingBox::new(64.0, 48.0, 320.0, 240.0);
        let n = bbox.normalized(Resolution::new(640, 480));
        assert_eq!(n, [0.1, 0.1, 0.4, 0.4]);
        assert_eq!(bbox.normalized(Resolution::default()), [0.0; 4]);
    }

    #[test]
    fn iou_of_identical_and_disjoint_boxes() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(20.0, 20.0, 30.0, 30.0);
        assert!((a.iou(&a) - 1.0).abs() < f32::EPSILON);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn resolution_displays_as_width_by_height() {
        assert_eq!(Resolution::new(1280, 720).to_string(), "1280x720");
    }
}
