//! HTTP model services.
//!
//! Detection, face matching and plate reading run as separate model services.
//! Each adapter JPEG-encodes the frame (or the region of interest) and POSTs it to
//! its endpoint, then maps the JSON reply onto the crate's capability traits.

use anyhow::{anyhow, Context, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::io::Read;
use std::time::Duration;

use crate::detect::{Capability, DetectorBackend, RawDetection};
use crate::enrich::{accept_plate_candidate, Identity, IdentityResolver, PlateCandidate, PlateReader};
use crate::frame::{BoundingBox, Frame};

/// Replies larger than this are rejected.
const MAX_RESPONSE_BYTES: u64 = 1024 * 1024;

/// Face crops smaller than this are not worth a request.
pub const MIN_FACE_SIZE: (u32, u32) = (20, 20);
/// Plate crops smaller than this are not worth a request.
pub const MIN_PLATE_SIZE: (u32, u32) = (20, 10);

#[derive(Clone, Debug, PartialEq)]
pub struct ModelSettings {
    pub detector_url: Option<String>,
    pub identity_url: Option<String>,
    pub plate_url: Option<String>,
    /// The detector service assigns stable track ids.
    pub detector_tracking: bool,
    pub request_timeout: Duration,
    pub jpeg_quality: u8,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            detector_url: None,
            identity_url: None,
            plate_url: None,
            detector_tracking: false,
            request_timeout: Duration::from_secs(2),
            jpeg_quality: 85,
        }
    }
}

/// POSTs JPEG images to one model endpoint and decodes JSON replies.
#[derive(Clone)]
pub struct ModelClient {
    agent: ureq::Agent,
    url: String,
    jpeg_quality: u8,
}

impl ModelClient {
    pub fn new(url: impl Into<String>, timeout: Duration, jpeg_quality: u8) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            agent,
            url: url.into(),
            jpeg_quality: jpeg_quality.clamp(1, 100),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn post_frame<T: DeserializeOwned>(&self, frame: &Frame) -> Result<T> {
        let body = encode_jpeg(frame, self.jpeg_quality)?;
        let response = self
            .agent
            .post(&self.url)
            .set("Content-Type", "image/jpeg")
            .send_bytes(&body)
            .with_context(|| format!("POST {}", self.url))?;

        let mut text = String::new();
        response
            .into_reader()
            .take(MAX_RESPONSE_BYTES + 1)
            .read_to_string(&mut text)
            .with_context(|| format!("read reply from {}", self.url))?;
        if text.len() as u64 > MAX_RESPONSE_BYTES {
            return Err(anyhow!("reply from {} exceeds {} bytes", self.url, MAX_RESPONSE_BYTES));
        }
        serde_json::from_str(&text).with_context(|| format!("parse reply from {}", self.url))
    }
}

pub fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, quality);
    encoder
        .encode(
            frame.pixels(),
            frame.width(),
            frame.height(),
            image::ExtendedColorType::Rgb8,
        )
        .context("encode frame as jpeg")?;
    Ok(out)
}

/// Crop `region`, or `None` when the clamped crop is below `min`.
fn crop_at_least(frame: &Frame, region: &BoundingBox, min: (u32, u32)) -> Option<Frame> {
    frame
        .crop(region)
        .filter(|crop| crop.width() >= min.0 && crop.height() >= min.1)
}

// ----------------------------------------------------------------------------
// Detector
// ----------------------------------------------------------------------------

#[derive(Deserialize)]
struct DetectorReply {
    #[serde(default)]
    detections: Vec<WireDetection>,
}

#[derive(Deserialize)]
struct WireDetection {
    label: String,
    confidence: f32,
    bbox: [f32; 4],
    #[serde(default)]
    track_id: Option<u64>,
}

impl From<WireDetection> for RawDetection {
    fn from(wire: WireDetection) -> Self {
        let [x1, y1, x2, y2] = wire.bbox;
        RawDetection {
            label: wire.label,
            confidence: wire.confidence.clamp(0.0, 1.0),
            bbox: BoundingBox::new(x1, y1, x2, y2),
            track_id: wire.track_id,
        }
    }
}

pub struct RemoteDetector {
    client: ModelClient,
    tracking: bool,
}

impl RemoteDetector {
    pub fn new(client: ModelClient, tracking: bool) -> Self {
        Self { client, tracking }
    }
}

impl DetectorBackend for RemoteDetector {
    fn name(&self) -> &'static str {
        "remote"
    }

    fn supports(&self, capability: Capability) -> bool {
        match capability {
            Capability::ObjectDetection => true,
            Capability::Tracking => self.tracking,
        }
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<RawDetection>> {
        let reply: DetectorReply = self.client.post_frame(frame)?;
        Ok(reply.detections.into_iter().map(RawDetection::from).collect())
    }
}

// ----------------------------------------------------------------------------
// Identity
// ----------------------------------------------------------------------------

#[derive(Deserialize)]
struct IdentityReply {
    #[serde(default)]
    name: Option<String>,
}

pub struct RemoteIdentityResolver {
    client: ModelClient,
}

impl RemoteIdentityResolver {
    pub fn new(client: ModelClient) -> Self {
        Self { client }
    }
}

impl IdentityResolver for RemoteIdentityResolver {
    fn identify(&mut self, frame: &Frame, region: &BoundingBox) -> Result<Identity> {
        let Some(crop) = crop_at_least(frame, region, MIN_FACE_SIZE) else {
            return Ok(Identity::Unknown);
        };
        let reply: IdentityReply = self.client.post_frame(&crop)?;
        Ok(Identity::from_name(reply.name.as_deref()))
    }
}

// ----------------------------------------------------------------------------
// Plates
// ----------------------------------------------------------------------------

#[derive(Deserialize)]
struct PlateReply {
    #[serde(default)]
    candidates: Vec<PlateCandidate>,
}

pub struct RemotePlateReader {
    client: ModelClient,
}

impl RemotePlateReader {
    pub fn new(client: ModelClient) -> Self {
        Self { client }
    }
}

impl PlateReader for RemotePlateReader {
    fn read_plate(&mut self, frame: &Frame, region: &BoundingBox) -> Result<Option<String>> {
        let Some(crop) = crop_at_least(frame, region, MIN_PLATE_SIZE) else {
            return Ok(None);
        };
        let reply: PlateReply = self.client.post_frame(&crop)?;
        Ok(accept_plate_candidate(&reply.candidates))
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::sync::mpsc;

    /// Answer one POST per body with a JSON reply; forwards each request's path and
    /// body length.
    fn serve_json(replies: Vec<&'static str>) -> (String, mpsc::Receiver<(String, usize)>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind test server");
        let addr = listener.local_addr().expect("local addr");
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            for reply in replies {
                let Ok((stream, _)) = listener.accept() else {
                    return;
                };
                let mut reader = BufReader::new(stream.try_clone().expect("clone stream"));
                let mut request_line = String::new();
                reader.read_line(&mut request_line).expect("request line");
                let path = request_line
                    .split_whitespace()
                    .nth(1)
                    .unwrap_or_default()
                    .to_string();
                let mut content_length = 0usize;
                loop {
                    let mut line = String::new();
                    if reader.read_line(&mut line).unwrap_or(0) <= 2 {
                        break;
                    }
                    let lower = line.to_ascii_lowercase();
                    if let Some(value) = lower.strip_prefix("content-length:") {
                        content_length = value.trim().parse().unwrap_or(0);
                    }
                }
                let mut body = vec![0u8; content_length];
                reader.read_exact(&mut body).expect("request body");
                let _ = tx.send((path, body.len()));

                let mut stream = stream;
                let header = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    reply.len()
                );
                let _ = stream.write_all(header.as_bytes());
                let _ = stream.write_all(reply.as_bytes());
            }
        });
        (format!("http://{}/v1/model", addr), rx)
    }

    fn client(url: &str) -> ModelClient {
        ModelClient::new(url, Duration::from_secs(2), 80)
    }

    #[test]
    fn remote_detector_maps_reply() -> Result<()> {
        let (url, requests) = serve_json(vec![
            r#"{"detections":[{"label":"person","confidence":0.91,"bbox":[10,20,110,220],"track_id":7},{"label":"car","confidence":1.4,"bbox":[0,0,50,40]}]}"#,
        ]);
        let mut detector = RemoteDetector::new(client(&url), true);
        assert!(detector.supports(Capability::Tracking));

        let detections = detector.detect(&Frame::filled(64, 48, [10, 20, 30]))?;
        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0].track_id, Some(7));
        assert_eq!(detections[0].bbox, BoundingBox::new(10.0, 20.0, 110.0, 220.0));
        assert_eq!(detections[1].confidence, 1.0);
        assert_eq!(detections[1].track_id, None);

        let (path, body_len) = requests.recv_timeout(Duration::from_secs(2))?;
        assert_eq!(path, "/v1/model");
        assert!(body_len > 0);
        Ok(())
    }

    #[test]
    fn identity_reply_unknown_is_not_a_match() -> Result<()> {
        let (url, _requests) = serve_json(vec![r#"{"name":"Unknown"}"#, r#"{"name":"Alice"}"#]);
        let mut resolver = RemoteIdentityResolver::new(client(&url));
        let frame = Frame::filled(64, 64, [90, 90, 90]);
        let region = BoundingBox::new(0.0, 0.0, 40.0, 40.0);

        assert_eq!(resolver.identify(&frame, &region)?, Identity::Unknown);
        assert_eq!(
            resolver.identify(&frame, &region)?,
            Identity::Known("Alice".to_string())
        );
        Ok(())
    }

    #[test]
    fn tiny_regions_skip_the_request() -> Result<()> {
        // Nothing listens here; a request would fail.
        let port = TcpListener::bind("127.0.0.1:0")?.local_addr()?.port();
        let url = format!("http://127.0.0.1:{}/", port);
        let frame = Frame::filled(64, 64, [0, 0, 0]);

        let mut resolver = RemoteIdentityResolver::new(client(&url));
        let face = BoundingBox::new(0.0, 0.0, 19.0, 40.0);
        assert_eq!(resolver.identify(&frame, &face)?, Identity::Unknown);

        let mut reader = RemotePlateReader::new(client(&url));
        let plate = BoundingBox::new(0.0, 0.0, 40.0, 9.0);
        assert_eq!(reader.read_plate(&frame, &plate)?, None);
        Ok(())
    }

    #[test]
    fn plate_reader_filters_candidates() -> Result<()> {
        let (url, _requests) = serve_json(vec![
            r#"{"candidates":[{"text":"EXIT","confidence":0.9},{"text":"ab12 cde","confidence":0.7}]}"#,
        ]);
        let mut reader = RemotePlateReader::new(client(&url));
        let frame = Frame::filled(64, 64, [0, 0, 0]);
        let plate = reader.read_plate(&frame, &BoundingBox::new(0.0, 0.0, 60.0, 30.0))?;
        assert_eq!(plate.as_deref(), Some("AB12CDE"));
        Ok(())
    }

    #[test]
    fn request_failures_are_errors() -> Result<()> {
        let port = TcpListener::bind("127.0.0.1:0")?.local_addr()?.port();
        let mut detector = RemoteDetector::new(
            ModelClient::new(format!("http://127.0.0.1:{}/", port), Duration::from_millis(200), 80),
            false,
        );
        assert!(!detector.supports(Capability::Tracking));
        assert!(detector.detect(&Frame::filled(8, 8, [0, 0, 0])).is_err());
        Ok(())
    }

    #[test]
    fn encodes_jpeg() -> Result<()> {
        let bytes = encode_jpeg(&Frame::filled(16, 16, [255, 0, 0]), 90)?;
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        Ok(())
    }
}
