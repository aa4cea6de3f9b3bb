use anyhow::Result;

use crate::detect::backend::{Capability, DetectorBackend};
use crate::detect::result::RawDetection;
use crate::frame::{BoundingBox, Frame};

pub const DEFAULT_IOU_THRESHOLD: f32 = 0.3;
pub const DEFAULT_MAX_MISSED: u32 = 30;

struct Track {
    id: u64,
    label: String,
    bbox: BoundingBox,
    missed: u32,
}

/// Adds stable track ids to a bare detector.
///
/// Each detection is matched greedily, highest confidence first, to the live track
/// of the same label with the largest overlap (IoU at or above the threshold).
/// Unmatched detections open a new track. A track that goes unmatched for more
/// than `max_missed` consecutive calls is dropped and its id is never reused.
pub struct IouTracker<B> {
    inner: B,
    tracks: Vec<Track>,
    next_id: u64,
    iou_threshold: f32,
    max_missed: u32,
}

impl<B: DetectorBackend> IouTracker<B> {
    pub fn new(inner: B) -> Self {
        Self::with_params(inner, DEFAULT_IOU_THRESHOLD, DEFAULT_MAX_MISSED)
    }

    pub fn with_params(inner: B, iou_threshold: f32, max_missed: u32) -> Self {
        Self {
            inner,
            tracks: Vec::new(),
            next_id: 1,
            iou_threshold,
            max_missed,
        }
    }

    pub fn live_tracks(&self) -> usize {
        self.tracks.len()
    }

    fn assign(&mut self, detections: &mut [RawDetection]) {
        let mut order: Vec<usize> = (0..detections.len()).collect();
        order.sort_by(|a, b| {
            detections[*b]
                .confidence
                .total_cmp(&detections[*a].confidence)
        });

        let mut matched = vec![false; self.tracks.len()];
        for index in order {
            let detection = &mut detections[index];
            let best = self
                .tracks
                .iter()
                .enumerate()
                .filter(|(i, track)| !matched[*i] && track.label == detection.label)
                .map(|(i, track)| (i, track.bbox.iou(&detection.bbox)))
                .filter(|(_, iou)| *iou >= self.iou_threshold)
                .max_by(|a, b| a.1.total_cmp(&b.1));

            match best {
                Some((i, _)) => {
                    let track = &mut self.tracks[i];
                    track.bbox = detection.bbox;
                    track.missed = 0;
                    matched[i] = true;
                    detection.track_id = Some(track.id);
                }
                None => {
                    let id = self.next_id;
                    self.next_id += 1;
                    self.tracks.push(Track {
                        id,
                        label: detection.label.clone(),
                        bbox: detection.bbox,
                        missed: 0,
                    });
                    matched.push(true);
                    detection.track_id = Some(id);
                }
            }
        }

        for (track, was_matched) in self.tracks.iter_mut().zip(matched) {
            if !was_matched {
                track.missed += 1;
            }
        }
        let max_missed = self.max_missed;
        self.tracks.retain(|track| track.missed <= max_missed);
    }
}

impl<B: DetectorBackend> DetectorBackend for IouTracker<B> {
    fn name(&self) -> &'static str {
        "iou-tracker"
    }

    fn supports(&self, capability: Capability) -> bool {
        match capability {
            Capability::Tracking => true,
            other => self.inner.supports(other),
        }
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<RawDetection>> {
        let mut detections = self.inner.detect(frame)?;
        self.assign(&mut detections);
        Ok(detections)
    }

    fn warm_up(&mut self) -> Result<()> {
        self.inner.warm_up()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::ScriptedBackend;

    fn person(x: f32) -> RawDetection {
        RawDetection::new("person", 0.9, BoundingBox::new(x, 0.0, x + 100.0, 200.0))
    }

    #[test]
    fn keeps_ids_for_overlapping_boxes() {
        let backend = ScriptedBackend::new(vec![vec![person(0.0)], vec![person(10.0)]]);
        let mut tracker = IouTracker::new(backend);
        let frame = Frame::filled(4, 4, [0, 0, 0]);

        let first = tracker.detect(&frame).unwrap();
        let second = tracker.detect(&frame).unwrap();
        assert_eq!(first[0].track_id, Some(1));
        assert_eq!(second[0].track_id, Some(1));
        assert!(tracker.supports(Capability::Tracking));
        assert!(tracker.supports(Capability::ObjectDetection));
    }

    #[test]
    fn labels_do_not_share_tracks() {
        let mut car = person(0.0);
        car.label = "car".to_string();
        let backend = ScriptedBackend::new(vec![vec![person(0.0)], vec![car]]);
        let mut tracker = IouTracker::new(backend);
        let frame = Frame::filled(4, 4, [0, 0, 0]);

        let first = tracker.detect(&frame).unwrap();
        let second = tracker.detect(&frame).unwrap();
        assert_ne!(first[0].track_id, second[0].track_id);
    }

    #[test]
    fn drops_tracks_after_max_missed() {
        let backend = ScriptedBackend::new(vec![vec![person(0.0)], vec![], vec![], vec![person(0.0)]]);
        let mut tracker = IouTracker::with_params(backend, 0.3, 1);
        let frame = Frame::filled(4, 4, [0, 0, 0]);

        assert_eq!(tracker.detect(&frame).unwrap()[0].track_id, Some(1));
        tracker.detect(&frame).unwrap();
        assert_eq!(tracker.live_tracks(), 1);
        tracker.detect(&frame).unwrap();
        assert_eq!(tracker.live_tracks(), 0);
        assert_eq!(tracker.detect(&frame).unwrap()[0].track_id, Some(2));
    }
}
