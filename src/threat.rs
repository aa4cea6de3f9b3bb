//! Threat classification.
//!
//! `classify` maps a label and confidence to a base level; `apply_overrides`
//! layers the behavioral signals of the current cycle on top. Both are pure.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreatLevel {
    #[default]
    Normal,
    Suspicious,
    Warning,
    Critical,
}

impl ThreatLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreatLevel::Normal => "normal",
            ThreatLevel::Suspicious => "suspicious",
            ThreatLevel::Warning => "warning",
            ThreatLevel::Critical => "critical",
        }
    }
}

impl fmt::Display for ThreatLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Behavioral signals gathered for one detection in one cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BehaviorFlags {
    /// Face matched a known identity.
    pub identity_match: bool,
    /// Plate text carries a flagged marker.
    pub flagged_plate: bool,
    pub loitering: bool,
    /// Person count in the frame reached the crowd threshold.
    pub crowd: bool,
    pub is_person: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ThreatPolicy {
    /// Matched as case-insensitive substrings.
    pub critical_labels: Vec<String>,
    /// Matched exactly, case-insensitive.
    pub suspicious_labels: Vec<String>,
    /// Confidence must be strictly greater than this for `suspicious`.
    pub suspicious_confidence: f32,
    /// Bound used by `classify_strict`.
    pub strict_confidence: f32,
    pub flagged_plate_markers: Vec<String>,
}

impl Default for ThreatPolicy {
    fn default() -> Self {
        Self {
            critical_labels: ["gun", "knife", "rifle", "pistol", "pliers", "scissors", "sword"]
                .map(String::from)
                .to_vec(),
            suspicious_labels: ["person", "backpack", "handbag", "suitcase"]
                .map(String::from)
                .to_vec(),
            suspicious_confidence: 0.8,
            strict_confidence: 0.85,
            flagged_plate_markers: ["STOLEN", "BAD"].map(String::from).to_vec(),
        }
    }
}

impl ThreatPolicy {
    pub fn classify(&self, label: &str, confidence: f32) -> ThreatLevel {
        self.classify_with_bound(label, confidence, self.suspicious_confidence)
    }

    /// Single-shot classification with the stricter suspicious bound.
    pub fn classify_strict(&self, label: &str, confidence: f32) -> ThreatLevel {
        self.classify_with_bound(label, confidence, self.strict_confidence)
    }

    fn classify_with_bound(&self, label: &str, confidence: f32, bound: f32) -> ThreatLevel {
        let label = label.to_lowercase();
        if self
            .critical_labels
            .iter()
            .any(|critical| label.contains(&critical.to_lowercase()))
        {
            return ThreatLevel::Critical;
        }
        if confidence > bound
            && self
                .suspicious_labels
                .iter()
                .any(|suspicious| suspicious.eq_ignore_ascii_case(&label))
        {
            return ThreatLevel::Suspicious;
        }
        ThreatLevel::Normal
    }

    pub fn is_flagged_plate(&self, plate: &str) -> bool {
        let plate = plate.to_uppercase();
        self.flagged_plate_markers
            .iter()
            .any(|marker| plate.contains(&marker.to_uppercase()))
    }

    /// Layer behavioral overrides on a base level.
    ///
    /// Identity and flagged plates force `critical`; loitering raises to at least
    /// `suspicious`; a crowd forces a person to `warning` whatever came before.
    pub fn apply_overrides(&self, base: ThreatLevel, flags: &BehaviorFlags) -> ThreatLevel {
        let mut level = base;
        if flags.identity_match || flags.flagged_plate {
            level = ThreatLevel::Critical;
        }
        if flags.loitering {
            level = level.max(ThreatLevel::Suspicious);
        }
        if flags.crowd && flags.is_person {
            level = ThreatLevel::Warning;
        }
        level
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_classification_is_deterministic() {
        let policy = ThreatPolicy::default();
        assert_eq!(policy.classify("knife", 0.9), ThreatLevel::Critical);
        assert_eq!(policy.classify("Kitchen Knife", 0.1), ThreatLevel::Critical);
        assert_eq!(policy.classify("person", 0.9), ThreatLevel::Suspicious);
        assert_eq!(policy.classify("person", 0.5), ThreatLevel::Normal);
        assert_eq!(policy.classify("person", 0.8), ThreatLevel::Normal);
        assert_eq!(policy.classify("dog", 0.99), ThreatLevel::Normal);
    }

    #[test]
    fn strict_bound_is_higher() {
        let policy = ThreatPolicy::default();
        assert_eq!(policy.classify("backpack", 0.82), ThreatLevel::Suspicious);
        assert_eq!(policy.classify_strict("backpack", 0.82), ThreatLevel::Normal);
        assert_eq!(policy.classify_strict("backpack", 0.9), ThreatLevel::Suspicious);
    }

    #[test]
    fn suspicious_vocabulary_is_exact() {
        let policy = ThreatPolicy::default();
        assert_eq!(policy.classify("personal item", 0.95), ThreatLevel::Normal);
    }

    #[test]
    fn loitering_never_downgrades_critical() {
        let policy = ThreatPolicy::default();
        let flags = BehaviorFlags {
            loitering: true,
            ..Default::default()
        };
        assert_eq!(policy.apply_overrides(ThreatLevel::Normal, &flags), ThreatLevel::Suspicious);
        assert_eq!(policy.apply_overrides(ThreatLevel::Critical, &flags), ThreatLevel::Critical);
    }

    #[test]
    fn crowd_forces_warning_for_people() {
        let policy = ThreatPolicy::default();
        let crowd = BehaviorFlags {
            crowd: true,
            is_person: true,
            loitering: true,
            identity_match: true,
            ..Default::default()
        };
        assert_eq!(policy.apply_overrides(ThreatLevel::Critical, &crowd), ThreatLevel::Warning);

        let vehicle_in_crowd = BehaviorFlags {
            crowd: true,
            ..Default::default()
        };
        assert_eq!(
            policy.apply_overrides(ThreatLevel::Normal, &vehicle_in_crowd),
            ThreatLevel::Normal
        );
    }

    #[test]
    fn identity_and_plate_force_critical() {
        let policy = ThreatPolicy::default();
        let identity = BehaviorFlags {
            identity_match: true,
            ..Default::default()
        };
        assert_eq!(policy.apply_overrides(ThreatLevel::Normal, &identity), ThreatLevel::Critical);
        assert!(policy.is_flagged_plate("ab12stolen"));
        assert!(!policy.is_flagged_plate("AB123CD"));
    }

    #[test]
    fn levels_serialize_lowercase() {
        assert_eq!(serde_json::to_string(&ThreatLevel::Warning).unwrap(), "\"warning\"");
        assert_eq!(ThreatLevel::Critical.to_string(), "critical");
    }
}
