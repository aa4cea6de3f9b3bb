//! Synthetic stream decoder for `stub://` sources.
//!
//! Produces a moving gradient at a fixed size and pace so the capture and
//! analysis paths can run without a camera attached.

use anyhow::{anyhow, Result};
use std::time::{Duration, Instant};

use super::{ConnectionInfo, StreamDecoder};
use crate::frame::{Frame, Resolution, RGB_CHANNELS};

pub struct SyntheticDecoder {
    name: String,
    width: u32,
    height: u32,
    target_fps: u32,
    frame_count: u64,
    /// Simulated scene state; changes every 50 frames.
    scene_state: u8,
    last_frame_at: Option<Instant>,
    open: bool,
}

impl SyntheticDecoder {
    /// `target_fps == 0` disables pacing.
    pub fn new(name: String, width: u32, height: u32, target_fps: u32) -> Self {
        Self {
            name,
            width,
            height,
            target_fps,
            frame_count: 0,
            scene_state: 0,
            last_frame_at: None,
            open: false,
        }
    }

    fn pace(&mut self) {
        if self.target_fps > 0 {
            let interval = Duration::from_millis((1000 / self.target_fps as u64).max(1));
            if let Some(last) = self.last_frame_at {
                let elapsed = last.elapsed();
                if elapsed < interval {
                    std::thread::sleep(interval - elapsed);
                }
            }
        }
        self.last_frame_at = Some(Instant::now());
    }

    fn generate_pixels(&mut self) -> Vec<u8> {
        let pixel_count = self.width as usize * self.height as usize * RGB_CHANNELS;

        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }

        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.frame_count + self.scene_state as u64) % 256) as u8;
        }
        pixels
    }
}

impl StreamDecoder for SyntheticDecoder {
    fn describe(&self) -> String {
        format!("stub://{}", self.name)
    }

    fn open(&mut self) -> Result<ConnectionInfo> {
        self.open = true;
        log::info!("SyntheticDecoder: connected to stub://{} (synthetic)", self.name);
        Ok(ConnectionInfo {
            description: self.describe(),
            resolution: Some(Resolution::new(self.width, self.height)),
        })
    }

    fn read(&mut self) -> Result<Frame> {
        if !self.open {
            return Err(anyhow!("stub://{} is not open", self.name));
        }
        self.pace();
        self.frame_count += 1;
        let pixels = self.generate_pixels();
        Frame::new(pixels, self.width, self.height)
    }

    fn close(&mut self) {
        self.open = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_frames_change_between_reads() -> Result<()> {
        let mut decoder = SyntheticDecoder::new("test".to_string(), 16, 8, 0);
        let info = decoder.open()?;
        assert_eq!(info.resolution, Some(Resolution::new(16, 8)));

        let first = decoder.read()?;
        let second = decoder.read()?;
        assert_eq!(first.resolution(), Resolution::new(16, 8));
        assert_ne!(first.pixels(), second.pixels());
        Ok(())
    }

    #[test]
    fn synthetic_reads_are_paced() -> Result<()> {
        let mut decoder = SyntheticDecoder::new("paced".to_string(), 4, 4, 50);
        decoder.open()?;
        let started = Instant::now();
        for _ in 0..3 {
            decoder.read()?;
        }
        assert!(started.elapsed() >= Duration::from_millis(40));
        Ok(())
    }
}
