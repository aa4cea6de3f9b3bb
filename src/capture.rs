//! Capture actor: a dedicated thread that keeps the latest frame.
//!
//! `FrameBuffer` owns a `FrameSource` and drives it from its own thread. Every
//! decoded frame overwrites a single "latest" slot; there is no queue, so a slow
//! consumer never blocks capture and always sees the freshest frame. Dropped frames
//! are the intended trade-off.
//!
//! Readers (`FrameReader`) get a copy of the slot under the same lock the capture
//! thread writes with, so a partially written frame is never observable.
//!
//! The capture thread does not die on I/O errors: connect and read failures are
//! logged, surfaced through `CameraStatus`, and retried after a fixed backoff.
//! Only `stop()` ends it.

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::frame::{Frame, Resolution};
use crate::ingest::FrameSource;

/// Sleep granularity for backoffs, so a pending `stop()` is noticed quickly.
const STOP_POLL: Duration = Duration::from_millis(20);

/// Pause after a call that produced no frame, to avoid spinning on idle sources.
const IDLE_WAIT: Duration = Duration::from_millis(10);

// ----------------------------------------------------------------------------
// Status
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraState {
    #[default]
    Stopped,
    Starting,
    Active,
    Error,
}

impl CameraState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CameraState::Stopped => "stopped",
            CameraState::Starting => "starting",
            CameraState::Active => "active",
            CameraState::Error => "error",
        }
    }
}

/// Live capture metrics. Written only by the capture side.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct CameraStatus {
    pub state: CameraState,
    /// Frames published during the last complete one-second window.
    pub fps: u32,
    pub resolution: Resolution,
}

// ----------------------------------------------------------------------------
// Settings
// ----------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct CaptureSettings {
    /// Wait after a connect or read error before retrying.
    pub error_backoff: Duration,
    /// Upper bound on how long `stop()` waits for the capture thread.
    pub join_timeout: Duration,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            error_backoff: Duration::from_secs(1),
            join_timeout: Duration::from_secs(2),
        }
    }
}

// ----------------------------------------------------------------------------
// Shared state
// ----------------------------------------------------------------------------

struct Shared {
    slot: Mutex<Option<Frame>>,
    frame_counter: AtomicU64,
    running: AtomicBool,
    status: Mutex<CameraStatus>,
}

impl Shared {
    fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            frame_counter: AtomicU64::new(0),
            running: AtomicBool::new(false),
            status: Mutex::new(CameraStatus::default()),
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn publish(&self, mut frame: Frame, fps: u32) {
        let resolution = frame.resolution();
        {
            let mut slot = lock(&self.slot);
            frame.sequence = self.frame_counter.fetch_add(1, Ordering::Relaxed) + 1;
            *slot = Some(frame);
        }
        let mut status = lock(&self.status);
        // Checked under the status lock so a late frame cannot overwrite `stopped`.
        if self.is_running() {
            status.state = CameraState::Active;
            status.resolution = resolution;
            status.fps = fps;
        }
    }

    fn set_state_if_running(&self, state: CameraState) {
        let mut status = lock(&self.status);
        if self.is_running() {
            status.state = state;
        }
    }

    fn set_fps_if_running(&self, fps: u32) {
        let mut status = lock(&self.status);
        if self.is_running() {
            status.fps = fps;
        }
    }

    fn set_resolution(&self, resolution: Resolution) {
        lock(&self.status).resolution = resolution;
    }

    fn set_state(&self, state: CameraState) {
        let mut status = lock(&self.status);
        status.state = state;
        if state == CameraState::Stopped {
            status.fps = 0;
        }
    }

    /// Sleep for `duration`, returning early once the running flag is cleared.
    fn sleep_while_running(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        while self.is_running() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            std::thread::sleep(STOP_POLL.min(deadline - now));
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ----------------------------------------------------------------------------
// FrameReader: consumer handle
// ----------------------------------------------------------------------------

/// Read side of a latest-frame holder, as seen by the analysis pipeline.
pub trait FrameFeed: Send {
    fn frame(&self) -> Option<Frame>;
    fn frame_counter(&self) -> u64;
    fn status(&self) -> CameraStatus;
}

/// Cheap, cloneable read handle onto a `FrameBuffer`.
#[derive(Clone)]
pub struct FrameReader {
    shared: Arc<Shared>,
}

impl FrameFeed for FrameReader {
    /// Copy of the latest frame, or `None` if nothing has been captured yet.
    fn frame(&self) -> Option<Frame> {
        lock(&self.shared.slot).clone()
    }

    /// Number of frames published so far.
    ///
    /// Read without synchronizing against the capture thread; use it as a cadence
    /// hint, not as an exact position.
    fn frame_counter(&self) -> u64 {
        self.shared.frame_counter.load(Ordering::Relaxed)
    }

    fn status(&self) -> CameraStatus {
        *lock(&self.shared.status)
    }
}

// ----------------------------------------------------------------------------
// FrameBuffer: capture actor
// ----------------------------------------------------------------------------

struct Worker {
    handle: JoinHandle<Box<dyn FrameSource>>,
    done: mpsc::Receiver<()>,
}

/// Owns the capture thread and the latest-frame slot.
pub struct FrameBuffer {
    shared: Arc<Shared>,
    source: Option<Box<dyn FrameSource>>,
    worker: Option<Worker>,
    settings: CaptureSettings,
    description: String,
}

impl FrameBuffer {
    pub fn new<S: FrameSource + 'static>(source: S, settings: CaptureSettings) -> Self {
        let description = source.describe();
        Self {
            shared: Arc::new(Shared::new()),
            source: Some(Box::new(source)),
            worker: None,
            settings,
            description,
        }
    }

    pub fn reader(&self) -> FrameReader {
        FrameReader {
            shared: self.shared.clone(),
        }
    }

    pub fn frame(&self) -> Option<Frame> {
        self.reader().frame()
    }

    pub fn frame_counter(&self) -> u64 {
        self.reader().frame_counter()
    }

    pub fn status(&self) -> CameraStatus {
        self.reader().status()
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// Spawn the capture thread. Calling `start` on a running buffer is a no-op.
    pub fn start(&mut self) -> Result<()> {
        if self.shared.is_running() {
            return Ok(());
        }
        if self.worker.is_some() {
            self.reclaim_source()?;
        }
        let source = self
            .source
            .take()
            .ok_or_else(|| anyhow!("capture source for {} is unavailable", self.description))?;

        self.shared.running.store(true, Ordering::Release);
        self.shared.set_state(CameraState::Starting);

        let (done_tx, done_rx) = mpsc::channel();
        let shared = self.shared.clone();
        let settings = self.settings.clone();
        let spawned = std::thread::Builder::new()
            .name("frame-capture".to_string())
            .spawn(move || {
                let source = run_capture(source, &shared, &settings);
                let _ = done_tx.send(());
                source
            });
        match spawned {
            Ok(handle) => {
                self.worker = Some(Worker {
                    handle,
                    done: done_rx,
                });
                Ok(())
            }
            Err(err) => {
                self.shared.running.store(false, Ordering::Release);
                self.shared.set_state(CameraState::Error);
                Err(err).context("spawn capture thread")
            }
        }
    }

    /// Signal the capture thread to exit and wait for it, bounded by the join timeout.
    ///
    /// Idempotent. Status is `stopped` afterwards even when the thread is still
    /// blocked inside its source; it exits (and releases the source) on its own.
    pub fn stop(&mut self) {
        let was_running = self.shared.running.swap(false, Ordering::AcqRel);
        if let Some(worker) = self.worker.take() {
            match worker.done.recv_timeout(self.settings.join_timeout) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => self.join_worker(worker),
                Err(RecvTimeoutError::Timeout) => {
                    log::warn!(
                        "capture thread for {} did not exit within {:?}",
                        self.description,
                        self.settings.join_timeout
                    );
                    self.worker = Some(worker);
                }
            }
        }
        self.shared.set_state(CameraState::Stopped);
        if was_running {
            log::info!("capture stopped: {}", self.description);
        }
    }

    fn join_worker(&mut self, worker: Worker) {
        match worker.handle.join() {
            Ok(source) => self.source = Some(source),
            Err(_) => log::error!("capture thread for {} panicked", self.description),
        }
    }

    /// Recover the source from a thread that outlived a previous `stop()`.
    fn reclaim_source(&mut self) -> Result<()> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        match worker.done.recv_timeout(self.settings.join_timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                self.join_worker(worker);
                Ok(())
            }
            Err(RecvTimeoutError::Timeout) => {
                self.worker = Some(worker);
                Err(anyhow!(
                    "previous capture thread for {} is still running",
                    self.description
                ))
            }
        }
    }
}

impl Drop for FrameBuffer {
    fn drop(&mut self) {
        if self.shared.is_running() || self.worker.is_some() {
            self.stop();
        }
    }
}

// ----------------------------------------------------------------------------
// Capture loop
// ----------------------------------------------------------------------------

/// Rolling one-second frame counter.
struct FpsWindow {
    window_start: Instant,
    frames: u32,
    fps: u32,
}

impl FpsWindow {
    fn new(now: Instant) -> Self {
        Self {
            window_start: now,
            frames: 0,
            fps: 0,
        }
    }

    fn record(&mut self, now: Instant) -> u32 {
        self.frames += 1;
        self.roll(now)
    }

    fn roll(&mut self, now: Instant) -> u32 {
        if now.duration_since(self.window_start) >= Duration::from_secs(1) {
            self.fps = self.frames;
            self.frames = 0;
            self.window_start = now;
        }
        self.fps
    }
}

fn run_capture(
    mut source: Box<dyn FrameSource>,
    shared: &Shared,
    settings: &CaptureSettings,
) -> Box<dyn FrameSource> {
    let description = source.describe();
    log::info!("capture thread started: {}", description);

    let mut fps = FpsWindow::new(Instant::now());
    let mut connected = false;

    while shared.is_running() {
        if !connected {
            match source.connect() {
                Ok(info) => {
                    connected = true;
                    if let Some(resolution) = info.resolution {
                        shared.set_resolution(resolution);
                    }
                    log::info!("capture connected: {}", info.description);
                }
                Err(err) => {
                    log::warn!("capture connect failed for {}: {:#}", description, err);
                    shared.set_state_if_running(CameraState::Error);
                    shared.sleep_while_running(settings.error_backoff);
                    continue;
                }
            }
        }

        match source.next_frame() {
            Ok(Some(frame)) => {
                let current = fps.record(Instant::now());
                shared.publish(frame, current);
            }
            Ok(None) => {
                shared.set_fps_if_running(fps.roll(Instant::now()));
                shared.sleep_while_running(IDLE_WAIT);
            }
            Err(err) => {
                log::warn!("capture read failed for {}: {:#}", description, err);
                shared.set_state_if_running(CameraState::Error);
                shared.sleep_while_running(settings.error_backoff);
            }
        }
    }

    source.release();
    log::info!("capture thread stopped: {}", description);
    source
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
