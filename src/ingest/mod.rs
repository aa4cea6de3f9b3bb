//! Frame ingestion sources.
//!
//! This module turns a configured source identifier into a pull-based `FrameSource`:
//! - Local capture devices by index or path (feature: ingest-v4l2)
//! - RTSP streams (feature: rtsp-gstreamer)
//! - HTTP multipart MJPEG streams
//! - HTTP snapshot endpoints, polled one image per call
//! - Synthetic `stub://` streams (testing and demos)
//!
//! Streaming variants are wrapped in `StreamingSource`, which owns the reconnect
//! policy: a read failure releases the handle, waits a fixed backoff and reopens.
//! The polling variant never tears its session down; a failed fetch yields no
//! frame for that call.

pub mod mjpeg;
#[cfg(feature = "rtsp-gstreamer")]
pub mod rtsp;
pub mod snapshot;
pub mod streaming;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use anyhow::{anyhow, Context, Result};
use image::GenericImageView;
use std::time::Duration;
use url::Url;

use crate::frame::{Frame, Resolution};

pub use mjpeg::MjpegDecoder;
pub use snapshot::SnapshotSource;
pub use streaming::{StreamDecoder, StreamingSource};
pub use synthetic::SyntheticDecoder;

/// Upper bound on a single encoded image pulled from the network.
pub(crate) const MAX_IMAGE_BYTES: usize = 8 * 1024 * 1024;

/// What a source reports after a successful connect.
#[derive(Clone, Debug, Default)]
pub struct ConnectionInfo {
    pub description: String,
    /// Known once the source has negotiated or observed a frame size.
    pub resolution: Option<Resolution>,
}

/// Pull-based video origin driven by the capture thread.
pub trait FrameSource: Send {
    /// Human readable source identifier for logs.
    fn describe(&self) -> String;

    /// Open the underlying handle.
    fn connect(&mut self) -> Result<ConnectionInfo>;

    /// Pull the next frame.
    ///
    /// `Ok(None)` means no frame is available for this call; the caller should simply
    /// try again. `Err` is reserved for failures the source could not absorb itself.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Release the underlying handle. Must be safe to call more than once.
    fn release(&mut self);
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn describe(&self) -> String {
        (**self).describe()
    }

    fn connect(&mut self) -> Result<ConnectionInfo> {
        (**self).connect()
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        (**self).next_frame()
    }

    fn release(&mut self) {
        (**self).release()
    }
}

// ----------------------------------------------------------------------------
// Source identifiers
// ----------------------------------------------------------------------------

/// Classified video source identifier.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceSpec {
    /// Local capture device by index (`"0"` -> `/dev/video0`).
    Device(u32),
    /// Local capture device by path.
    DevicePath(String),
    /// HTTP(S) still-image endpoint, polled.
    Snapshot(String),
    /// HTTP(S) multipart MJPEG stream.
    Mjpeg(String),
    /// RTSP stream.
    Rtsp(String),
    /// Generated frames (`stub://name`).
    Synthetic(String),
}

impl SourceSpec {
    pub fn parse(id: &str) -> Result<Self> {
        let id = id.trim();
        if id.is_empty() {
            return Err(anyhow!("video source identifier is empty"));
        }
        if id.chars().all(|c| c.is_ascii_digit()) {
            let index = id
                .parse::<u32>()
                .with_context(|| format!("parse device index {}", id))?;
            return Ok(SourceSpec::Device(index));
        }
        if id.starts_with("/dev/") {
            return Ok(SourceSpec::DevicePath(id.to_string()));
        }
        if let Some(name) = id.strip_prefix("stub://") {
            return Ok(SourceSpec::Synthetic(name.to_string()));
        }

        let url = Url::parse(id).with_context(|| format!("parse video source url {}", id))?;
        match url.scheme() {
            "http" | "https" => {
                if is_still_image_path(url.path()) {
                    Ok(SourceSpec::Snapshot(id.to_string()))
                } else {
                    Ok(SourceSpec::Mjpeg(id.to_string()))
                }
            }
            "rtsp" | "rtsps" => Ok(SourceSpec::Rtsp(id.to_string())),
            other => Err(anyhow!(
                "unsupported video source scheme '{}'; expected http(s), rtsp or stub",
                other
            )),
        }
    }

    /// True for sources read one request at a time rather than as a continuous stream.
    pub fn is_polling(&self) -> bool {
        matches!(self, SourceSpec::Snapshot(_))
    }
}

fn is_still_image_path(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    [".jpg", ".jpeg", ".png"]
        .iter()
        .any(|ext| lower.ends_with(ext))
}

// ----------------------------------------------------------------------------
// Source construction
// ----------------------------------------------------------------------------

/// Settings shared by all source variants.
#[derive(Clone, Debug)]
pub struct SourceSettings {
    /// Source identifier (device index, device path, URL or `stub://name`).
    pub id: String,
    /// Wait between releasing a failed stream and reopening it.
    pub reconnect_backoff: Duration,
    /// Minimum time between two snapshot requests.
    pub poll_interval: Duration,
    /// Bound on each network request.
    pub request_timeout: Duration,
    /// Preferred capture width for devices and synthetic streams.
    pub width: u32,
    /// Preferred capture height for devices and synthetic streams.
    pub height: u32,
    /// Target frame rate for devices and synthetic streams.
    pub target_fps: u32,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            id: "stub://front_camera".to_string(),
            reconnect_backoff: Duration::from_secs(1),
            poll_interval: Duration::from_millis(100),
            request_timeout: Duration::from_secs(2),
            width: 640,
            height: 480,
            target_fps: 30,
        }
    }
}

/// Build the source described by `settings.id`.
pub fn open_source(settings: &SourceSettings) -> Result<Box<dyn FrameSource>> {
    let spec = SourceSpec::parse(&settings.id)?;
    log::info!("video source {} resolved to {:?}", settings.id, spec);
    match spec {
        SourceSpec::Snapshot(url) => Ok(Box::new(SnapshotSource::new(
            url,
            settings.poll_interval,
            settings.request_timeout,
        ))),
        SourceSpec::Mjpeg(url) => Ok(Box::new(StreamingSource::new(
            MjpegDecoder::new(url, settings.request_timeout),
            settings.reconnect_backoff,
        ))),
        SourceSpec::Synthetic(name) => Ok(Box::new(StreamingSource::new(
            SyntheticDecoder::new(name, settings.width, settings.height, settings.target_fps),
            settings.reconnect_backoff,
        ))),
        SourceSpec::Device(index) => open_device(format!("/dev/video{}", index), settings),
        SourceSpec::DevicePath(path) => open_device(path, settings),
        SourceSpec::Rtsp(url) => open_rtsp(url, settings),
    }
}

#[cfg(feature = "ingest-v4l2")]
fn open_device(path: String, settings: &SourceSettings) -> Result<Box<dyn FrameSource>> {
    Ok(Box::new(StreamingSource::new(
        v4l2::V4l2Decoder::new(path, settings.width, settings.height, settings.target_fps),
        settings.reconnect_backoff,
    )))
}

#[cfg(not(feature = "ingest-v4l2"))]
fn open_device(path: String, _settings: &SourceSettings) -> Result<Box<dyn FrameSource>> {
    Err(anyhow!(
        "capture device {} requires the ingest-v4l2 feature",
        path
    ))
}

#[cfg(feature = "rtsp-gstreamer")]
fn open_rtsp(url: String, settings: &SourceSettings) -> Result<Box<dyn FrameSource>> {
    Ok(Box::new(StreamingSource::new(
        rtsp::RtspDecoder::new(url, settings.target_fps)?,
        settings.reconnect_backoff,
    )))
}

#[cfg(not(feature = "rtsp-gstreamer"))]
fn open_rtsp(url: String, _settings: &SourceSettings) -> Result<Box<dyn FrameSource>> {
    Err(anyhow!("RTSP source {} requires the rtsp-gstreamer feature", url))
}

// ----------------------------------------------------------------------------
// Shared helpers
// ----------------------------------------------------------------------------

/// Decode an encoded still image (JPEG/PNG) into an RGB8 frame.
pub(crate) fn decode_image(bytes: &[u8]) -> Result<Frame> {
    let image = image::load_from_memory(bytes).context("decode image")?;
    let (width, height) = image.dimensions();
    let rgb = image.into_rgb8();
    Frame::new(rgb.into_raw(), width, height)
}

/// Remembers the last frame size seen from a source and logs changes.
#[derive(Debug, Default)]
pub(crate) struct ResolutionTracker {
    last: Option<Resolution>,
}

impl ResolutionTracker {
    /// Record `resolution`; returns true when it differs from the previous frame.
    pub(crate) fn observe(&mut self, source: &str, resolution: Resolution) -> bool {
        if self.last == Some(resolution) {
            return false;
        }
        match self.last {
            Some(previous) => log::info!(
                "{}: resolution changed {} -> {}",
                source,
                previous,
                resolution
            ),
            None => log::info!("{}: resolution {}", source, resolution),
        }
        self.last = Some(resolution);
        true
    }

    pub(crate) fn last(&self) -> Option<Resolution> {
        self.last
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
