//! V4L2 capture device decoder (feature: ingest-v4l2).
//!
//! Opens a local device node (`/dev/videoN`), requests packed RGB at the preferred
//! size and frame rate, and falls back to MJPEG decode when the driver insists on
//! a compressed format.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;

use super::{decode_image, ConnectionInfo, StreamDecoder};
use crate::frame::{Frame, Resolution};

const BUFFER_COUNT: u32 = 4;

pub struct V4l2Decoder {
    device: String,
    width: u32,
    height: u32,
    target_fps: u32,
    state: Option<DeviceState>,
    active: Resolution,
    fourcc: [u8; 4],
}

#[self_referencing]
struct DeviceState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Decoder {
    pub fn new(device: String, width: u32, height: u32, target_fps: u32) -> Self {
        Self {
            device,
            width,
            height,
            target_fps,
            state: None,
            active: Resolution::new(width, height),
            fourcc: *b"RGB3",
        }
    }
}

impl StreamDecoder for V4l2Decoder {
    fn describe(&self) -> String {
        format!("v4l2:{}", self.device)
    }

    fn open(&mut self) -> Result<ConnectionInfo> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&self.device)
            .with_context(|| format!("open v4l2 device {}", self.device))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = self.width;
        format.height = self.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2Decoder: failed to set format on {}: {}",
                    self.device,
                    err
                );
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };

        if self.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!("V4l2Decoder: failed to set fps on {}: {}", self.device, err);
            }
        }

        self.active = Resolution::new(format.width, format.height);
        self.fourcc = format.fourcc.repr;

        let state = DeviceStateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, BUFFER_COUNT)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;
        self.state = Some(state);

        log::info!(
            "V4l2Decoder: connected to {} ({}, {})",
            self.device,
            self.active,
            String::from_utf8_lossy(&self.fourcc)
        );
        Ok(ConnectionInfo {
            description: self.describe(),
            resolution: Some(self.active),
        })
    }

    fn read(&mut self) -> Result<Frame> {
        use v4l::io::traits::CaptureStream;

        let state = self.state.as_mut().context("v4l2 device not connected")?;
        let bytes = state
            .with_mut(|fields| fields.stream.next().map(|(buf, _meta)| buf.to_vec()))
            .context("capture v4l2 frame")?;

        match &self.fourcc {
            b"RGB3" => Frame::new(bytes, self.active.width, self.active.height),
            b"MJPG" => decode_image(&bytes),
            other => Err(anyhow!(
                "unsupported v4l2 pixel format {}",
                String::from_utf8_lossy(other)
            )),
        }
    }

    fn close(&mut self) {
        self.state = None;
    }
}
