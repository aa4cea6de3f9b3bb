use anyhow::Result;

use crate::detect::result::RawDetection;
use crate::frame::Frame;

/// Capabilities a detector backend can declare.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Capability {
    /// Labelled bounding boxes with confidences.
    ObjectDetection,
    /// Stable track ids across consecutive calls.
    Tracking,
}

/// Detector backend trait.
///
/// Backends are driven from a single analysis loop and may keep state between
/// calls (trackers do). Declarations made by `supports` are checked once, when the
/// backend is handed to the pipeline.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Returns true when the backend supports a capability.
    fn supports(&self, capability: Capability) -> bool;

    /// Run detection on a frame.
    ///
    /// The frame is borrowed for the duration of the call only.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<RawDetection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<B: DetectorBackend + ?Sized> DetectorBackend for Box<B> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn supports(&self, capability: Capability) -> bool {
        (**self).supports(capability)
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<RawDetection>> {
        (**self).detect(frame)
    }

    fn warm_up(&mut self) -> Result<()> {
        (**self).warm_up()
    }
}
