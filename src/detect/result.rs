use serde::{Deserialize, Serialize};

use crate::frame::BoundingBox;

pub const PERSON_LABEL: &str = "person";

/// Labels that are sent to the plate reader.
pub const VEHICLE_LABELS: [&str; 4] = ["car", "truck", "bus", "motorcycle"];

/// One detection as produced by a backend. Fresh every cycle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    pub label: String,
    /// In `[0, 1]`.
    pub confidence: f32,
    pub bbox: BoundingBox,
    /// Set only by tracking backends.
    #[serde(default)]
    pub track_id: Option<u64>,
}

impl RawDetection {
    pub fn new(label: impl Into<String>, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            label: label.into(),
            confidence,
            bbox,
            track_id: None,
        }
    }

    pub fn with_track(mut self, track_id: u64) -> Self {
        self.track_id = Some(track_id);
        self
    }

    pub fn is_person(&self) -> bool {
        self.label.eq_ignore_ascii_case(PERSON_LABEL)
    }

    pub fn is_vehicle(&self) -> bool {
        VEHICLE_LABELS
            .iter()
            .any(|vehicle| self.label.eq_ignore_ascii_case(vehicle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_people_and_vehicles() {
        let bbox = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        assert!(RawDetection::new("Person", 0.9, bbox).is_person());
        assert!(RawDetection::new("truck", 0.9, bbox).is_vehicle());
        assert!(!RawDetection::new("bicycle", 0.9, bbox).is_vehicle());
        assert_eq!(
            RawDetection::new("car", 0.5, bbox).with_track(7).track_id,
            Some(7)
        );
    }

    #[test]
    fn track_id_is_optional_on_the_wire() {
        let parsed: RawDetection = serde_json::from_str(
            r#"{"label":"person","confidence":0.7,"bbox":{"x1":1,"y1":2,"x2":3,"y2":4}}"#,
        )
        .unwrap();
        assert_eq!(parsed.track_id, None);
        assert_eq!(parsed.bbox, BoundingBox::new(1.0, 2.0, 3.0, 4.0));
    }
}
