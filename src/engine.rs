//! Serving surface: one capture actor plus the analysis pipeline reading from it.

use anyhow::Result;
use std::sync::Arc;

use crate::capture::{CameraStatus, FrameBuffer};
use crate::clock::Clock;
use crate::detect::DetectorBackend;
use crate::enrich::{IdentityResolver, PlateReader};
use crate::frame::Frame;
use crate::pipeline::{Analysis, AnalysisPipeline, AnalysisSettings, NormalizedDetection};

pub struct Engine {
    buffer: FrameBuffer,
    pipeline: AnalysisPipeline,
}

impl Engine {
    pub fn new(
        buffer: FrameBuffer,
        detector: Box<dyn DetectorBackend>,
        settings: AnalysisSettings,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let pipeline = AnalysisPipeline::new(buffer.reader(), detector, settings, clock)?;
        Ok(Self { buffer, pipeline })
    }

    pub fn with_identity_resolver(mut self, resolver: Box<dyn IdentityResolver>) -> Self {
        self.pipeline = self.pipeline.with_identity_resolver(resolver);
        self
    }

    pub fn with_plate_reader(mut self, reader: Box<dyn PlateReader>) -> Self {
        self.pipeline = self.pipeline.with_plate_reader(reader);
        self
    }

    /// Warm the detector up and start capturing. A failed warm-up is logged only.
    pub fn start(&mut self) -> Result<()> {
        if let Err(err) = self.pipeline.warm_up() {
            log::warn!("{:#}", err);
        }
        self.buffer.start()
    }

    pub fn stop(&mut self) {
        self.buffer.stop();
    }

    pub fn analyze(&mut self) -> Analysis {
        self.pipeline.analyze()
    }

    pub fn snapshot(&mut self) -> Result<Vec<NormalizedDetection>> {
        self.pipeline.snapshot()
    }

    pub fn frame(&self) -> Option<Frame> {
        self.buffer.frame()
    }

    pub fn status(&self) -> CameraStatus {
        self.buffer.status()
    }

    pub fn pipeline(&self) -> &AnalysisPipeline {
        &self.pipeline
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{CameraState, CaptureSettings};
    use crate::clock::SystemClock;
    use crate::detect::{RawDetection, ScriptedBackend};
    use crate::frame::BoundingBox;
    use crate::ingest::{StreamingSource, SyntheticDecoder};
    use std::time::{Duration, Instant};

    #[test]
    fn engine_runs_against_synthetic_source() -> Result<()> {
        let source = StreamingSource::new(
            SyntheticDecoder::new("engine".to_string(), 32, 24, 0),
            Duration::from_millis(10),
        );
        let detector = ScriptedBackend::repeating(vec![RawDetection::new(
            "person",
            0.9,
            BoundingBox::new(2.0, 2.0, 10.0, 20.0),
        )]);
        let mut engine = Engine::new(
            FrameBuffer::new(source, CaptureSettings::default()),
            Box::new(detector),
            AnalysisSettings::default(),
            Arc::new(SystemClock),
        )?;

        assert!(engine.analyze().detections.is_empty());
        engine.start()?;
        let deadline = Instant::now() + Duration::from_secs(2);
        while engine.frame().is_none() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }

        let analysis = engine.analyze();
        assert_eq!(analysis.detections.len(), 1);
        assert_eq!(analysis.stats.res, "32x24");
        assert_eq!(engine.status().state, CameraState::Active);

        engine.stop();
        assert_eq!(engine.status().state, CameraState::Stopped);
        Ok(())
    }
}
