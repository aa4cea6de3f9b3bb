//! Plate text acceptance and normalization.

use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;

/// Minimum reader confidence for a candidate to be considered.
pub const MIN_CANDIDATE_CONFIDENCE: f32 = 0.4;

/// Candidates must be longer than this after normalization.
pub const MIN_PLATE_CHARS: usize = 3;

/// One OCR reading as returned by a plate reader.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct PlateCandidate {
    pub text: String,
    pub confidence: f32,
}

fn whitespace() -> &'static Regex {
    static WHITESPACE: OnceLock<Regex> = OnceLock::new();
    WHITESPACE.get_or_init(|| Regex::new(r"\s+").unwrap())
}

/// Upper-case and strip all whitespace.
pub fn normalize_plate(text: &str) -> String {
    whitespace().replace_all(text, "").to_uppercase()
}

/// First candidate that looks like a plate, normalized.
pub fn accept_plate_candidate(candidates: &[PlateCandidate]) -> Option<String> {
    candidates
        .iter()
        .filter(|candidate| candidate.confidence > MIN_CANDIDATE_CONFIDENCE)
        .map(|candidate| normalize_plate(&candidate.text))
        .find(|plate| {
            plate.chars().count() > MIN_PLATE_CHARS && plate.chars().any(|c| c.is_ascii_digit())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(text: &str, confidence: f32) -> PlateCandidate {
        PlateCandidate {
            text: text.to_string(),
            confidence,
        }
    }

    #[test]
    fn normalizes_case_and_spacing() {
        assert_eq!(normalize_plate(" ab12 cde\t"), "AB12CDE");
    }

    #[test]
    fn picks_first_plausible_candidate() {
        let candidates = [
            candidate("XY 99", 0.3),
            candidate("EXIT", 0.9),
            candidate("ab1", 0.9),
            candidate("ab12 cde", 0.6),
            candidate("ZZ99ZZZ", 0.95),
        ];
        assert_eq!(accept_plate_candidate(&candidates).as_deref(), Some("AB12CDE"));
        assert_eq!(accept_plate_candidate(&[]), None);
    }
}
