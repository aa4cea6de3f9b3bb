//! Continuous stream wrapper with local reconnect.
//!
//! A `StreamDecoder` knows how to open a stream and pull decoded frames from it.
//! `StreamingSource` adds the recovery policy on top: a failed read releases the
//! decoder and the call yields no frame. The reopen is attempted once the
//! reconnect backoff has elapsed; until then calls return immediately with no
//! frame, so the caller stays free to stop. A reopen that fails is returned as an
//! error, which the capture loop reports as the `error` state.

use anyhow::Result;
use std::time::{Duration, Instant};

use super::{ConnectionInfo, FrameSource, ResolutionTracker};
use crate::frame::Frame;

/// A continuous decoder (device, RTSP, MJPEG, synthetic).
pub trait StreamDecoder: Send {
    fn describe(&self) -> String;

    /// Open (or reopen) the stream.
    fn open(&mut self) -> Result<ConnectionInfo>;

    /// Block until the next decoded frame is available.
    fn read(&mut self) -> Result<Frame>;

    /// Release the stream handle. Called before every reopen.
    fn close(&mut self);
}

/// Streaming `FrameSource` that reconnects its decoder on read failure.
pub struct StreamingSource<D: StreamDecoder> {
    decoder: D,
    backoff: Duration,
    open: bool,
    retry_at: Option<Instant>,
    reconnects: u64,
    resolution: ResolutionTracker,
}

impl<D: StreamDecoder> StreamingSource<D> {
    pub fn new(decoder: D, backoff: Duration) -> Self {
        Self {
            decoder,
            backoff,
            open: false,
            retry_at: None,
            reconnects: 0,
            resolution: ResolutionTracker::default(),
        }
    }

    /// Number of reconnect cycles performed since creation.
    pub fn reconnects(&self) -> u64 {
        self.reconnects
    }

    pub fn decoder(&self) -> &D {
        &self.decoder
    }

    fn drop_stream(&mut self) {
        self.decoder.close();
        self.open = false;
        self.retry_at = Some(Instant::now() + self.backoff);
    }

    /// Reopen the decoder once the backoff has elapsed. `Ok(false)` while waiting.
    fn reconnect(&mut self) -> Result<bool> {
        if self.retry_at.is_some_and(|at| Instant::now() < at) {
            return Ok(false);
        }
        self.reconnects += 1;
        match self.decoder.open() {
            Ok(_) => {
                self.open = true;
                self.retry_at = None;
                log::info!("{}: stream reopened", self.decoder.describe());
                Ok(true)
            }
            Err(err) => {
                self.retry_at = Some(Instant::now() + self.backoff);
                Err(err.context(format!("reopen {}", self.decoder.describe())))
            }
        }
    }
}

impl<D: StreamDecoder> FrameSource for StreamingSource<D> {
    fn describe(&self) -> String {
        self.decoder.describe()
    }

    fn connect(&mut self) -> Result<ConnectionInfo> {
        let info = self.decoder.open()?;
        self.open = true;
        self.retry_at = None;
        if let Some(resolution) = info.resolution {
            self.resolution.observe(&info.description, resolution);
        }
        Ok(info)
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if !self.open && !self.reconnect()? {
            return Ok(None);
        }
        match self.decoder.read() {
            Ok(frame) => {
                let description = self.decoder.describe();
                self.resolution.observe(&description, frame.resolution());
                Ok(Some(frame))
            }
            Err(err) => {
                log::warn!(
                    "{}: stream lost ({:#}), reconnecting in {:?}",
                    self.decoder.describe(),
                    err,
                    self.backoff
                );
                self.drop_stream();
                Ok(None)
            }
        }
    }

    fn release(&mut self) {
        if self.open {
            self.decoder.close();
            self.open = false;
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
