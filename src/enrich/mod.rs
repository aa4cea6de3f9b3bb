//! Enrichment capabilities: identity (face match) and plate reading.
//!
//! Both are expensive and optional. The pipeline only calls them for detections
//! that pass confidence gating and the frame-skip policy.

pub mod plate;

use anyhow::Result;

use crate::frame::{BoundingBox, Frame};

pub use plate::{accept_plate_candidate, normalize_plate, PlateCandidate};

/// Result of an identity lookup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Identity {
    Known(String),
    Unknown,
}

impl Identity {
    /// Build from a resolver's raw name; empty or "Unknown" maps to `Unknown`.
    pub fn from_name(name: Option<&str>) -> Self {
        match name.map(str::trim) {
            Some(name) if !name.is_empty() && !name.eq_ignore_ascii_case("unknown") => {
                Identity::Known(name.to_string())
            }
            _ => Identity::Unknown,
        }
    }

    pub fn into_name(self) -> Option<String> {
        match self {
            Identity::Known(name) => Some(name),
            Identity::Unknown => None,
        }
    }
}

/// Resolves who is inside a region of a frame.
pub trait IdentityResolver: Send {
    fn identify(&mut self, frame: &Frame, region: &BoundingBox) -> Result<Identity>;
}

/// Reads plate text from a region of a frame. `Ok(None)` means nothing legible.
pub trait PlateReader: Send {
    fn read_plate(&mut self, frame: &Frame, region: &BoundingBox) -> Result<Option<String>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_names_are_not_identities() {
        assert_eq!(Identity::from_name(None), Identity::Unknown);
        assert_eq!(Identity::from_name(Some("")), Identity::Unknown);
        assert_eq!(Identity::from_name(Some("Unknown")), Identity::Unknown);
        assert_eq!(
            Identity::from_name(Some(" Alice ")),
            Identity::Known("Alice".to_string())
        );
        assert_eq!(Identity::from_name(Some("Alice")).into_name().as_deref(), Some("Alice"));
    }
}
