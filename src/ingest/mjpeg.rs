//! HTTP multipart MJPEG decoder.
//!
//! IP cameras and phone camera apps commonly serve `multipart/x-mixed-replace`
//! streams of JPEG images. The decoder scans the byte stream for JPEG start/end
//! markers rather than trusting part headers, which vary between vendors.

use anyhow::{anyhow, Context, Result};
use std::io::Read;
use std::time::Duration;

use super::{decode_image, ConnectionInfo, StreamDecoder, MAX_IMAGE_BYTES};
use crate::frame::Frame;

const READ_CHUNK_BYTES: usize = 8192;

/// Streaming decoder for HTTP MJPEG endpoints.
pub struct MjpegDecoder {
    url: String,
    agent: ureq::Agent,
    stream: Option<MjpegStream>,
}

impl MjpegDecoder {
    pub fn new(url: String, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .build();
        Self {
            url,
            agent,
            stream: None,
        }
    }
}

impl StreamDecoder for MjpegDecoder {
    fn describe(&self) -> String {
        format!("mjpeg:{}", self.url)
    }

    fn open(&mut self) -> Result<ConnectionInfo> {
        let response = self
            .agent
            .get(&self.url)
            .call()
            .with_context(|| format!("connect to mjpeg stream {}", self.url))?;
        let content_type = response.header("Content-Type").unwrap_or("").to_lowercase();
        if !content_type.contains("multipart") {
            return Err(anyhow!(
                "{} is not a multipart stream (content type '{}')",
                self.url,
                content_type
            ));
        }
        self.stream = Some(MjpegStream::new(response.into_reader()));
        log::info!("MjpegDecoder: connected to {}", self.url);
        Ok(ConnectionInfo {
            description: self.describe(),
            resolution: None,
        })
    }

    fn read(&mut self) -> Result<Frame> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| anyhow!("mjpeg stream not connected"))?;
        let jpeg = stream.read_next_jpeg()?;
        decode_image(&jpeg)
    }

    fn close(&mut self) {
        self.stream = None;
    }
}

/// Incremental JPEG extractor over an arbitrary byte stream.
pub(crate) struct MjpegStream {
    reader: Box<dyn Read + Send>,
    buffer: Vec<u8>,
}

impl MjpegStream {
    pub(crate) fn new(reader: Box<dyn Read + Send>) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(64 * 1024),
        }
    }

    pub(crate) fn read_next_jpeg(&mut self) -> Result<Vec<u8>> {
        let mut chunk = vec![0u8; READ_CHUNK_BYTES];
        loop {
            if let Some((start, end)) = find_jpeg_bounds(&self.buffer) {
                let jpeg = self.buffer[start..end].to_vec();
                self.buffer.drain(..end);
                return Ok(jpeg);
            }

            let read = self.reader.read(&mut chunk).context("read mjpeg chunk")?;
            if read == 0 {
                return Err(anyhow!("mjpeg stream ended"));
            }
            self.buffer.extend_from_slice(&chunk[..read]);

            // A runaway part without an end marker: keep only the tail so a marker
            // split across reads is not lost.
            if self.buffer.len() > MAX_IMAGE_BYTES * 2 {
                let drain_len = self.buffer.len() - 2;
                self.buffer.drain(..drain_len);
            }
        }
    }
}

/// Locate the first complete JPEG in `buffer`.
///
/// When the part headers carry a `Content-Length`, the declared length wins: an
/// embedded EXIF thumbnail has its own EOI marker that would otherwise end the
/// image early. Without a usable length, scan for SOI `FFD8` .. EOI `FFD9`.
fn find_jpeg_bounds(buffer: &[u8]) -> Option<(usize, usize)> {
    let start = buffer.windows(2).position(|w| w[0] == 0xFF && w[1] == 0xD8)?;

    if let Some(len) = declared_length(&buffer[..start]) {
        let end = start + len;
        if end > buffer.len() {
            return None;
        }
        if buffer[end - 2..end] == [0xFF, 0xD9] {
            return Some((start, end));
        }
        log::debug!("mjpeg part length {} does not end on EOI, scanning", len);
    }

    let end = buffer[start + 2..]
        .windows(2)
        .position(|w| w[0] == 0xFF && w[1] == 0xD9)?;
    Some((start, start + 2 + end + 2))
}

/// `Content-Length` from the part headers preceding the image, if sane.
fn declared_length(headers: &[u8]) -> Option<usize> {
    let text = String::from_utf8_lossy(headers);
    text.lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .filter(|len| (4..=MAX_IMAGE_BYTES).contains(len))
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn finds_jpeg_between_part_headers() {
        let mut data = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n".to_vec();
        data.extend_from_slice(&[0xFF, 0xD8, 1, 2, 3, 0xFF, 0xD9]);
        data.extend_from_slice(b"\r\n--frame\r\n");

        let (start, end) = find_jpeg_bounds(&data).unwrap();
        assert_eq!(&data[start..end], &[0xFF, 0xD8, 1, 2, 3, 0xFF, 0xD9]);
    }

    #[test]
    fn incomplete_jpeg_has_no_bounds() {
        assert!(find_jpeg_bounds(&[0xFF, 0xD8, 1, 2]).is_none());
        assert!(find_jpeg_bounds(&[1, 2, 3]).is_none());
    }

    #[test]
    fn content_length_keeps_embedded_thumbnail() {
        // Outer image with a thumbnail whose EOI comes before the real one.
        let jpeg = [0xFF, 0xD8, 1, 0xFF, 0xD8, 2, 0xFF, 0xD9, 3, 0xFF, 0xD9];
        let mut data = format!(
            "--frame\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
            jpeg.len()
        )
        .into_bytes();
        data.extend_from_slice(&jpeg);
        data.extend_from_slice(b"\r\n--frame\r\n");

        let (start, end) = find_jpeg_bounds(&data).unwrap();
        assert_eq!(&data[start..end], &jpeg);
    }

    #[test]
    fn declared_length_waits_for_the_whole_part() {
        let mut data = b"--frame\r\nContent-Length: 11\r\n\r\n".to_vec();
        data.extend_from_slice(&[0xFF, 0xD8, 1, 0xFF, 0xD8, 2, 0xFF, 0xD9]);
        assert!(find_jpeg_bounds(&data).is_none());
    }

    #[test]
    fn wrong_declared_length_falls_back_to_markers() {
        let mut data = b"--frame\r\ncontent-length: 6\r\n\r\n".to_vec();
        data.extend_from_slice(&[0xFF, 0xD8, 1, 2, 3, 0xFF, 0xD9]);

        let (start, end) = find_jpeg_bounds(&data).unwrap();
        assert_eq!(&data[start..end], &[0xFF, 0xD8, 1, 2, 3, 0xFF, 0xD9]);
    }

    #[test]
    fn stream_yields_consecutive_images_then_ends() {
        let mut data = Vec::new();
        data.extend_from_slice(b"--b\r\n\r\n");
        data.extend_from_slice(&[0xFF, 0xD8, 0xAA, 0xFF, 0xD9]);
        data.extend_from_slice(b"--b\r\n\r\n");
        data.extend_from_slice(&[0xFF, 0xD8, 0xBB, 0xFF, 0xD9]);

        let mut stream = MjpegStream::new(Box::new(Cursor::new(data)));
        assert_eq!(stream.read_next_jpeg().unwrap(), vec![0xFF, 0xD8, 0xAA, 0xFF, 0xD9]);
        assert_eq!(stream.read_next_jpeg().unwrap(), vec![0xFF, 0xD8, 0xBB, 0xFF, 0xD9]);
        assert!(stream.read_next_jpeg().is_err());
    }
}
