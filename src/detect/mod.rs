//! Object detection capability.
//!
//! A detector turns a frame into raw labelled boxes. Backends declare what they can
//! do through `Capability`; a backend that also declares `Tracking` attaches stable
//! track ids to the detections it returns.

mod backend;
mod backends;
mod registry;
mod result;

pub use backend::{Capability, DetectorBackend};
pub use backends::{IouTracker, ScriptedBackend};
pub use registry::BackendRegistry;
pub use result::{RawDetection, PERSON_LABEL, VEHICLE_LABELS};
