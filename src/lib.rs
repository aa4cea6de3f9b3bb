//! shield-vision
//!
//! Camera-to-alert analysis pipeline: frames are pulled from a video source by a
//! dedicated capture thread, analyzed on demand by a detector, enriched with
//! identity and plate lookups, and classified into threat levels.
//!
//! # Architecture
//!
//! Two lines of control share a single latest-frame slot:
//!
//! 1. **Capture** (`capture::FrameBuffer`): owns a `FrameSource`, pulls frames as
//!    fast as the source delivers them and overwrites the slot. Never blocked by
//!    consumers; frames nobody read are dropped.
//! 2. **Analysis** (`pipeline::AnalysisPipeline`): called by the serving loop at a
//!    fixed cadence. Copies the latest frame, runs detection, keeps per-track
//!    state (dwell time, cached enrichment) and emits `NormalizedDetection`s.
//!
//! # Module Structure
//!
//! - `frame`: Frame, Resolution, BoundingBox
//! - `ingest`: Frame sources (V4L2, RTSP, MJPEG, snapshot polling, synthetic)
//! - `capture`: Capture actor and status
//! - `detect`: Detector backends, tracking, registry
//! - `enrich`: Identity and plate capabilities
//! - `remote`: HTTP model service adapters
//! - `track`: Track state store
//! - `threat`: Threat classification
//! - `pipeline`: Analysis cycle
//! - `engine`: Serving surface
//! - `config`: Daemon configuration

pub mod capture;
pub mod clock;
pub mod config;
pub mod detect;
pub mod engine;
pub mod enrich;
pub mod frame;
pub mod ingest;
pub mod pipeline;
pub mod remote;
pub mod threat;
pub mod track;

pub use capture::{CameraState, CameraStatus, CaptureSettings, FrameBuffer, FrameFeed, FrameReader};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::ShieldConfig;
pub use detect::{BackendRegistry, Capability, DetectorBackend, IouTracker, RawDetection, ScriptedBackend};
pub use engine::Engine;
pub use enrich::{Identity, IdentityResolver, PlateReader};
pub use frame::{BoundingBox, Frame, Resolution};
pub use ingest::{open_source, ConnectionInfo, FrameSource, SourceSettings, SourceSpec};
pub use pipeline::{Analysis, AnalysisPipeline, AnalysisSettings, NormalizedDetection, PipelineStats};
pub use remote::{ModelClient, ModelSettings, RemoteDetector, RemoteIdentityResolver, RemotePlateReader};
pub use threat::{BehaviorFlags, ThreatLevel, ThreatPolicy};
pub use track::{TrackRecord, TrackStore};
