//! HTTP snapshot polling source.
//!
//! Many Wi-Fi cameras hold up much better when polled for single stills than when
//! asked for a continuous stream. Each `next_frame` call issues one bounded GET,
//! decodes the image in memory and returns it. Failures are absorbed: the call
//! returns no frame and the next call simply tries again.
//!
//! Polling is rate limited so a fast capture loop cannot hammer the origin.

use anyhow::{anyhow, Context, Result};
use std::io::Read;
use std::time::{Duration, Instant};

use super::{decode_image, ConnectionInfo, FrameSource, ResolutionTracker, MAX_IMAGE_BYTES};
use crate::frame::Frame;

/// Polling `FrameSource` for still-image endpoints.
pub struct SnapshotSource {
    url: String,
    agent: ureq::Agent,
    poll_interval: Duration,
    last_poll: Option<Instant>,
    resolution: ResolutionTracker,
    connected: bool,
    frames_fetched: u64,
    failed_fetches: u64,
}

impl SnapshotSource {
    pub fn new(url: String, poll_interval: Duration, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            url,
            agent,
            poll_interval,
            last_poll: None,
            resolution: ResolutionTracker::default(),
            connected: false,
            frames_fetched: 0,
            failed_fetches: 0,
        }
    }

    pub fn frames_fetched(&self) -> u64 {
        self.frames_fetched
    }

    pub fn failed_fetches(&self) -> u64 {
        self.failed_fetches
    }

    fn wait_for_slot(&mut self) {
        if let Some(last) = self.last_poll {
            let elapsed = last.elapsed();
            if elapsed < self.poll_interval {
                std::thread::sleep(self.poll_interval - elapsed);
            }
        }
        self.last_poll = Some(Instant::now());
    }

    fn fetch(&self) -> Result<Frame> {
        let response = self
            .agent
            .get(&self.url)
            .call()
            .with_context(|| format!("fetch snapshot from {}", self.url))?;
        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_IMAGE_BYTES as u64 + 1)
            .read_to_end(&mut bytes)
            .context("read snapshot body")?;
        if bytes.is_empty() {
            return Err(anyhow!("empty snapshot from {}", self.url));
        }
        if bytes.len() > MAX_IMAGE_BYTES {
            return Err(anyhow!("snapshot from {} exceeds {} bytes", self.url, MAX_IMAGE_BYTES));
        }
        decode_image(&bytes)
    }
}

impl FrameSource for SnapshotSource {
    fn describe(&self) -> String {
        format!("snapshot:{}", self.url)
    }

    /// Probe the endpoint once; the session is considered open afterwards.
    fn connect(&mut self) -> Result<ConnectionInfo> {
        self.wait_for_slot();
        let frame = self.fetch()?;
        let description = self.describe();
        self.resolution.observe(&description, frame.resolution());
        self.connected = true;
        log::info!("SnapshotSource: connected to {}", self.url);
        Ok(ConnectionInfo {
            description,
            resolution: self.resolution.last(),
        })
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        self.wait_for_slot();
        match self.fetch() {
            Ok(frame) => {
                let description = self.describe();
                self.resolution.observe(&description, frame.resolution());
                self.frames_fetched += 1;
                Ok(Some(frame))
            }
            Err(err) => {
                self.failed_fetches += 1;
                log::debug!("{}: snapshot failed: {:#}", self.describe(), err);
                Ok(None)
            }
        }
    }

    fn release(&mut self) {
        if self.connected {
            log::info!("SnapshotSource: released {}", self.url);
        }
        self.connected = false;
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
