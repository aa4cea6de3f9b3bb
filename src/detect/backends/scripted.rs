use anyhow::Result;

use crate::detect::backend::{Capability, DetectorBackend};
use crate::detect::result::RawDetection;
use crate::frame::{BoundingBox, Frame};

/// Replays a fixed sequence of detection lists, one entry per call, cycling.
///
/// Used by `stub://` demo runs and by tests that need a predictable detector.
/// Declares `Tracking` only when built with `with_tracking`, in which case the
/// scripted detections are expected to carry their own track ids.
pub struct ScriptedBackend {
    script: Vec<Vec<RawDetection>>,
    cursor: usize,
    tracking: bool,
}

impl ScriptedBackend {
    pub fn new(script: Vec<Vec<RawDetection>>) -> Self {
        Self {
            script,
            cursor: 0,
            tracking: false,
        }
    }

    /// Same detections on every call.
    pub fn repeating(detections: Vec<RawDetection>) -> Self {
        Self::new(vec![detections])
    }

    pub fn with_tracking(mut self) -> Self {
        self.tracking = true;
        self
    }

    /// A short scene for demo runs: a person lingering near the door and a car
    /// pulling through the driveway.
    pub fn demo() -> Self {
        let mut script = Vec::new();
        for step in 0..60u16 {
            let shift = f32::from(step) * 4.0;
            let mut detections = vec![RawDetection::new(
                "person",
                0.86,
                BoundingBox::new(120.0 + shift * 0.1, 140.0, 200.0 + shift * 0.1, 400.0),
            )];
            if step < 40 {
                detections.push(RawDetection::new(
                    "car",
                    0.78,
                    BoundingBox::new(300.0 + shift, 260.0, 520.0 + shift, 420.0),
                ));
            }
            script.push(detections);
        }
        Self::new(script)
    }

    /// Number of calls served so far.
    pub fn calls(&self) -> usize {
        self.cursor
    }
}

impl DetectorBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn supports(&self, capability: Capability) -> bool {
        match capability {
            Capability::ObjectDetection => true,
            Capability::Tracking => self.tracking,
        }
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Vec<RawDetection>> {
        if self.script.is_empty() {
            return Ok(Vec::new());
        }
        let detections = self.script[self.cursor % self.script.len()].clone();
        self.cursor += 1;
        Ok(detections)
    }
}
