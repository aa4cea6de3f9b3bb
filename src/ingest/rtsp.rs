//! RTSP decoder using GStreamer (feature: rtsp-gstreamer).
//!
//! Pipeline: `rtspsrc ! decodebin ! videoconvert ! RGB appsink`. The appsink keeps
//! a single buffer and drops older ones, which matches the latest-frame-wins
//! capture model.

use anyhow::{anyhow, Context, Result};
use gstreamer::prelude::*;
use std::time::Duration;

use super::{ConnectionInfo, StreamDecoder};
use crate::frame::{Frame, RGB_CHANNELS};

pub struct RtspDecoder {
    url: String,
    target_fps: u32,
    pipeline: Option<(gstreamer::Pipeline, gstreamer_app::AppSink)>,
    last_error: Option<String>,
}

impl RtspDecoder {
    pub fn new(url: String, target_fps: u32) -> Result<Self> {
        gstreamer::init().context("initialize gstreamer")?;
        Ok(Self {
            url,
            target_fps,
            pipeline: None,
            last_error: None,
        })
    }

    fn build_pipeline(&self) -> Result<(gstreamer::Pipeline, gstreamer_app::AppSink)> {
        let description = format!(
            "rtspsrc location={} latency=0 ! decodebin ! videoconvert ! video/x-raw,format=RGB ! \
             appsink name=appsink sync=false max-buffers=1 drop=true",
            self.url
        );
        let pipeline = gstreamer::parse::launch(&description)
            .context("build RTSP pipeline")?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| anyhow!("RTSP pipeline is not a Pipeline"))?;

        let appsink = pipeline
            .by_name("appsink")
            .context("appsink element missing from pipeline")?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| anyhow!("appsink element has unexpected type"))?;

        let caps = gstreamer::Caps::builder("video/x-raw")
            .field("format", "RGB")
            .build();
        appsink.set_caps(Some(&caps));
        appsink.set_max_buffers(1);
        appsink.set_drop(true);
        appsink.set_sync(false);
        Ok((pipeline, appsink))
    }

    fn frame_timeout(&self) -> Duration {
        let base_ms = if self.target_fps == 0 {
            500
        } else {
            (1000 / self.target_fps).saturating_mul(4)
        };
        Duration::from_millis(base_ms.max(500) as u64)
    }

    fn poll_bus(&mut self, pipeline: &gstreamer::Pipeline) {
        let Some(bus) = pipeline.bus() else {
            return;
        };
        while let Some(message) = bus.pop() {
            use gstreamer::MessageView;
            match message.view() {
                MessageView::Error(err) => {
                    self.last_error = Some(format!(
                        "gstreamer error from {:?}: {}",
                        err.src().map(|s| s.path_string()),
                        err.error()
                    ));
                }
                MessageView::Eos(..) => {
                    self.last_error = Some("gstreamer reached EOS".to_string());
                }
                _ => {}
            }
        }
    }
}

impl StreamDecoder for RtspDecoder {
    fn describe(&self) -> String {
        format!("rtsp:{}", self.url)
    }

    fn open(&mut self) -> Result<ConnectionInfo> {
        let (pipeline, appsink) = self.build_pipeline()?;
        pipeline
            .set_state(gstreamer::State::Playing)
            .context("set RTSP pipeline to Playing")?;
        self.pipeline = Some((pipeline, appsink));
        self.last_error = None;
        log::info!("RtspDecoder: connected to {}", self.url);
        Ok(ConnectionInfo {
            description: self.describe(),
            resolution: None,
        })
    }

    fn read(&mut self) -> Result<Frame> {
        let (pipeline, appsink) = self
            .pipeline
            .clone()
            .ok_or_else(|| anyhow!("RTSP pipeline not connected"))?;
        self.poll_bus(&pipeline);
        if let Some(err) = self.last_error.take() {
            return Err(anyhow!(err));
        }

        let timeout = gstreamer::ClockTime::from_mseconds(self.frame_timeout().as_millis() as u64);
        let sample = appsink
            .try_pull_sample(timeout)
            .ok_or_else(|| anyhow!("RTSP stream stalled"))?;
        sample_to_frame(&sample)
    }

    fn close(&mut self) {
        if let Some((pipeline, _)) = self.pipeline.take() {
            if let Err(err) = pipeline.set_state(gstreamer::State::Null) {
                log::warn!("RtspDecoder: failed to stop pipeline for {}: {}", self.url, err);
            }
        }
    }
}

fn sample_to_frame(sample: &gstreamer::Sample) -> Result<Frame> {
    let buffer = sample.buffer().context("RTSP sample missing buffer")?;
    let caps = sample.caps().context("RTSP sample missing caps")?;
    let info =
        gstreamer_video::VideoInfo::from_caps(caps).context("parse RTSP caps as video info")?;

    let width = info.width();
    let height = info.height();
    let row_bytes = width as usize * RGB_CHANNELS;
    let stride = info.stride()[0] as usize;

    let map = buffer.map_readable().context("map RTSP buffer")?;
    let data = map.as_slice();

    if stride == row_bytes {
        let packed = data
            .get(..row_bytes * height as usize)
            .context("RTSP buffer shorter than frame")?;
        return Frame::new(packed.to_vec(), width, height);
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        pixels.extend_from_slice(
            data.get(start..start + row_bytes)
                .context("RTSP buffer row is out of bounds")?,
        );
    }
    Frame::new(pixels, width, height)
}
