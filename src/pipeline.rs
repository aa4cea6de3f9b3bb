//! One analysis cycle: latest frame -> detection -> track state -> enrichment ->
//! threat level -> normalized output.
//!
//! The pipeline is the single consumer of the track store and is driven by the
//! serving loop. It never blocks the capture thread: it only copies the latest
//! frame out of the feed.
//!
//! Enrichment is throttled by a frame-skip policy keyed on the capture frame
//! counter:
//! - a tracked detection with no cache entry is enriched immediately;
//! - a tracked detection with a cache entry is refreshed when
//!   `counter % refresh_interval == 0`;
//! - an untracked detection is enriched when `counter % untracked_interval == 0`.
//!
//! Between refreshes the cached values are reused, so a track keeps its identity
//! and plate even on frames where the models are not consulted.

use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::capture::{CameraState, FrameFeed};
use crate::clock::Clock;
use crate::detect::{Capability, DetectorBackend, RawDetection};
use crate::enrich::{IdentityResolver, PlateReader};
use crate::frame::{Frame, Resolution};
use crate::threat::{BehaviorFlags, ThreatLevel, ThreatPolicy};
use crate::track::TrackStore;

#[derive(Clone, Debug, PartialEq)]
pub struct AnalysisSettings {
    /// Detections below this confidence are discarded before any other step.
    pub min_detection_confidence: f32,
    /// At most this many detections per frame, highest confidence first.
    pub max_detections: usize,
    /// Person count at or above which the scene is a crowd.
    pub crowd_threshold: usize,
    /// Dwell time after which a tracked person is loitering.
    pub loiter_threshold: Duration,
    /// Confidence gate for first enrichment of a track and for untracked detections.
    pub enrich_min_confidence: f32,
    /// Confidence gate for refreshing an already cached track.
    pub refresh_min_confidence: f32,
    pub refresh_interval: u64,
    pub untracked_interval: u64,
    /// `None` keeps track records forever.
    pub track_ttl: Option<Duration>,
    /// Enrichment calls slower than this are logged.
    pub slow_enrichment_warn: Duration,
    pub policy: ThreatPolicy,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            min_detection_confidence: 0.5,
            max_detections: 20,
            crowd_threshold: 5,
            loiter_threshold: Duration::from_secs(10),
            enrich_min_confidence: 0.6,
            refresh_min_confidence: 0.5,
            refresh_interval: 30,
            untracked_interval: 5,
            track_ttl: Some(Duration::from_secs(300)),
            slow_enrichment_warn: Duration::from_millis(250),
            policy: ThreatPolicy::default(),
        }
    }
}

/// One detection as delivered to consumers.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NormalizedDetection {
    pub id: String,
    pub track_id: Option<u64>,
    #[serde(rename = "class")]
    pub label: String,
    pub confidence: f32,
    pub bbox: [i32; 4],
    pub bbox_normalized: [f32; 4],
    pub threat_level: ThreatLevel,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PipelineStats {
    pub fps: u32,
    pub status: CameraState,
    pub res: String,
    pub frames_captured: u64,
    pub tracked: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Analysis {
    pub detections: Vec<NormalizedDetection>,
    pub stats: PipelineStats,
}

impl Analysis {
    pub fn highest_threat(&self) -> Option<ThreatLevel> {
        self.detections.iter().map(|d| d.threat_level).max()
    }
}

pub struct AnalysisPipeline {
    feed: Box<dyn FrameFeed>,
    detector: Box<dyn DetectorBackend>,
    identity: Option<Box<dyn IdentityResolver>>,
    plates: Option<Box<dyn PlateReader>>,
    settings: AnalysisSettings,
    clock: Arc<dyn Clock>,
    tracks: TrackStore,
    tracking: bool,
}

impl AnalysisPipeline {
    /// Fails when the detector does not declare `Capability::ObjectDetection`.
    pub fn new<F: FrameFeed + 'static>(
        feed: F,
        detector: Box<dyn DetectorBackend>,
        settings: AnalysisSettings,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        if !detector.supports(Capability::ObjectDetection) {
            bail!(
                "detector backend '{}' does not support object detection",
                detector.name()
            );
        }
        let tracking = detector.supports(Capability::Tracking);
        log::info!(
            "analysis pipeline using detector '{}' (tracking: {})",
            detector.name(),
            tracking
        );
        Ok(Self {
            feed: Box::new(feed),
            detector,
            identity: None,
            plates: None,
            settings,
            clock,
            tracks: TrackStore::new(),
            tracking,
        })
    }

    pub fn with_identity_resolver(mut self, resolver: Box<dyn IdentityResolver>) -> Self {
        self.identity = Some(resolver);
        self
    }

    pub fn with_plate_reader(mut self, reader: Box<dyn PlateReader>) -> Self {
        self.plates = Some(reader);
        self
    }

    pub fn settings(&self) -> &AnalysisSettings {
        &self.settings
    }

    pub fn tracks(&self) -> &TrackStore {
        &self.tracks
    }

    pub fn warm_up(&mut self) -> Result<()> {
        self.detector
            .warm_up()
            .with_context(|| format!("warm up detector '{}'", self.detector.name()))
    }

    /// Run one cycle. Never fails: cycle errors are logged and yield no detections.
    pub fn analyze(&mut self) -> Analysis {
        let counter = self.feed.frame_counter();
        let detections = match self.feed.frame() {
            None => Vec::new(),
            Some(frame) => match self.run_cycle(&frame, counter) {
                Ok(detections) => detections,
                Err(err) => {
                    log::warn!("analysis cycle failed: {:#}", err);
                    Vec::new()
                }
            },
        };

        if let Some(ttl) = self.settings.track_ttl {
            let evicted = self.tracks.evict_idle(self.clock.now(), ttl);
            if evicted > 0 {
                log::debug!("evicted {} idle tracks", evicted);
            }
        }

        Analysis {
            detections,
            stats: self.stats(),
        }
    }

    /// One-off detection of the latest frame, as for a still capture. Track state
    /// and enrichment are left untouched and levels use the policy's strict bound.
    pub fn snapshot(&mut self) -> Result<Vec<NormalizedDetection>> {
        let counter = self.feed.frame_counter();
        let Some(frame) = self.feed.frame() else {
            return Ok(Vec::new());
        };
        let raw = self
            .detector
            .detect(&frame)
            .with_context(|| format!("detector '{}'", self.detector.name()))?;

        let resolution = frame.resolution();
        let policy = &self.settings.policy;
        Ok(self
            .admit(raw)
            .into_iter()
            .enumerate()
            .map(|(index, detection)| NormalizedDetection {
                id: format!("det_{}_{}", counter, index),
                track_id: None,
                threat_level: policy.classify_strict(&detection.label, detection.confidence),
                confidence: round2(detection.confidence),
                bbox: detection.bbox.to_pixels(),
                bbox_normalized: detection.bbox.normalized(resolution),
                label: detection.label,
            })
            .collect())
    }

    pub fn stats(&self) -> PipelineStats {
        let status = self.feed.status();
        PipelineStats {
            fps: status.fps,
            status: status.state,
            res: status.resolution.to_string(),
            frames_captured: self.feed.frame_counter(),
            tracked: self.tracks.len(),
        }
    }

    fn run_cycle(&mut self, frame: &Frame, counter: u64) -> Result<Vec<NormalizedDetection>> {
        let now = self.clock.now();
        let raw = self
            .detector
            .detect(frame)
            .with_context(|| format!("detector '{}'", self.detector.name()))?;
        let raw = self.admit(raw);

        let people = raw.iter().filter(|d| d.is_person()).count();
        let crowd = people >= self.settings.crowd_threshold;
        let resolution = frame.resolution();

        let mut detections = Vec::with_capacity(raw.len());
        for (index, detection) in raw.into_iter().enumerate() {
            let track_id = if self.tracking { detection.track_id } else { None };

            let mut loitering = false;
            if let Some(id) = track_id {
                let record = self.tracks.touch(id, now);
                loitering =
                    detection.is_person() && record.dwell(now) > self.settings.loiter_threshold;
            }

            let enrichment = self.enrich(frame, &detection, track_id, counter, now)?;
            let signals = Signals {
                track_id,
                index,
                counter,
                loitering,
                crowd,
            };
            detections.push(self.compose(detection, enrichment, signals, resolution));
        }
        Ok(detections)
    }

    /// Apply the detection floor and cap, keeping the detector's order.
    fn admit(&self, raw: Vec<RawDetection>) -> Vec<RawDetection> {
        let mut kept: Vec<(usize, RawDetection)> = raw
            .into_iter()
            .filter(|d| d.confidence >= self.settings.min_detection_confidence)
            .enumerate()
            .collect();
        if kept.len() > self.settings.max_detections {
            kept.sort_by(|a, b| b.1.confidence.total_cmp(&a.1.confidence));
            kept.truncate(self.settings.max_detections);
            kept.sort_by_key(|(order, _)| *order);
        }
        kept.into_iter().map(|(_, detection)| detection).collect()
    }

    fn should_enrich(&self, track_id: Option<u64>, counter: u64) -> bool {
        match track_id {
            Some(id) if !self.tracks.has_cache(id) => true,
            Some(_) => counter % self.settings.refresh_interval.max(1) == 0,
            None => counter % self.settings.untracked_interval.max(1) == 0,
        }
    }

    fn enrich(
        &mut self,
        frame: &Frame,
        detection: &RawDetection,
        track_id: Option<u64>,
        counter: u64,
        now: Instant,
    ) -> Result<Enrichment> {
        let cached = track_id
            .and_then(|id| self.tracks.get(id))
            .map(|record| Enrichment {
                identity: record.identity.clone(),
                plate: record.plate.clone(),
            })
            .unwrap_or_default();

        if !self.should_enrich(track_id, counter) {
            return Ok(cached);
        }

        let refreshing = track_id.is_some_and(|id| self.tracks.has_cache(id));
        let min_confidence = if refreshing {
            self.settings.refresh_min_confidence
        } else {
            self.settings.enrich_min_confidence
        };
        let warn_after = self.settings.slow_enrichment_warn;

        let mut fresh = Enrichment::default();
        if detection.confidence > min_confidence {
            if detection.is_person() {
                if let Some(resolver) = self.identity.as_mut() {
                    fresh.identity = timed("identity lookup", warn_after, || {
                        resolver.identify(frame, &detection.bbox)
                    })?
                    .into_name();
                }
            }
            if detection.is_vehicle() {
                if let Some(reader) = self.plates.as_mut() {
                    fresh.plate = timed("plate read", warn_after, || {
                        reader.read_plate(frame, &detection.bbox)
                    })?;
                }
            }
        }

        if let Some(id) = track_id {
            self.tracks
                .update_cache(id, fresh.identity.clone(), fresh.plate.clone(), now);
        }
        Ok(Enrichment {
            identity: fresh.identity.or(cached.identity),
            plate: fresh.plate.or(cached.plate),
        })
    }

    fn compose(
        &self,
        detection: RawDetection,
        enrichment: Enrichment,
        signals: Signals,
        resolution: Resolution,
    ) -> NormalizedDetection {
        let policy = &self.settings.policy;
        let base = policy.classify(&detection.label, detection.confidence);

        let mut label = detection.label.clone();
        if let Some(name) = &enrichment.identity {
            label = name.clone();
        }
        if let Some(plate) = &enrichment.plate {
            label = format!("{} [{}]", detection.label, plate);
        }
        if signals.loitering {
            label.push_str(" [Loitering]");
        }

        let flags = BehaviorFlags {
            identity_match: enrichment.identity.is_some(),
            flagged_plate: enrichment
                .plate
                .as_deref()
                .is_some_and(|plate| policy.is_flagged_plate(plate)),
            loitering: signals.loitering,
            crowd: signals.crowd,
            is_person: detection.is_person(),
        };
        let threat_level = policy.apply_overrides(base, &flags);

        let id = match signals.track_id {
            Some(track_id) => track_id.to_string(),
            None => format!("det_{}_{}", signals.counter, signals.index),
        };

        NormalizedDetection {
            id,
            track_id: signals.track_id,
            label,
            confidence: round2(detection.confidence),
            bbox: detection.bbox.to_pixels(),
            bbox_normalized: detection.bbox.normalized(resolution),
            threat_level,
        }
    }
}

#[derive(Clone, Debug, Default)]
struct Enrichment {
    identity: Option<String>,
    plate: Option<String>,
}

#[derive(Clone, Copy, Debug)]
struct Signals {
    track_id: Option<u64>,
    index: usize,
    counter: u64,
    loitering: bool,
    crowd: bool,
}

fn round2(value: f32) -> f32 {
    (value * 100.0).round() / 100.0
}

fn timed<T>(what: &str, warn_after: Duration, call: impl FnOnce() -> Result<T>) -> Result<T> {
    let started = Instant::now();
    let result = call();
    let elapsed = started.elapsed();
    if elapsed > warn_after {
        log::warn!("{} took {:?}", what, elapsed);
    }
    result.with_context(|| what.to_string())
}
