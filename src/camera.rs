//! Camera abstraction and frame preparation.
//!
//! A `Camera` hands out raw buffers in whatever layout the device produces.
//! `prepare_frame` turns one into a display-ready RGB frame at the fixed
//! display size.

use crate::types::{PixelOrder, RawFrame, DISPLAY_SIZE};
use image::imageops::{self, FilterType};
use image::RgbImage;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CameraError {
    #[error("failed to open camera {device}: {reason}")]
    Open { device: u32, reason: String },
    #[error("camera read failed: {0}")]
    Read(String),
    #[error("unsupported pixel format: {0}")]
    UnsupportedFormat(String),
    #[error("frame buffer is {actual} bytes, expected {expected} for {width}x{height}")]
    BadBuffer {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
}

/// Device selection and requested resolution.
#[derive(Debug, Clone)]
pub struct CameraConfig {
    /// Device index (`/dev/video{index}` on Linux).
    pub device: u32,
    pub width: u32,
    pub height: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: 0,
            width: 640,
            height: 480,
        }
    }
}

/// A source of raw frames.
///
/// `Ok(None)` means the device had no frame ready; callers skip the sample.
pub trait Camera {
    fn read(&mut self) -> Result<Option<RawFrame>, CameraError>;

    /// Short human-readable description for logs.
    fn describe(&self) -> String;
}

impl<C: Camera + ?Sized> Camera for Box<C> {
    fn read(&mut self) -> Result<Option<RawFrame>, CameraError> {
        (**self).read()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Validate, color-convert and resize a raw frame to `DISPLAY_SIZE`².
pub fn prepare_frame(raw: &RawFrame) -> Result<RgbImage, CameraError> {
    let expected = raw.order.buffer_len(raw.width, raw.height);
    if raw.width == 0 || raw.height == 0 || raw.data.len() != expected {
        return Err(CameraError::BadBuffer {
            width: raw.width,
            height: raw.height,
            expected,
            actual: raw.data.len(),
        });
    }

    let rgb = match raw.order {
        PixelOrder::Rgb => raw.data.clone(),
        PixelOrder::Bgr => bgr_to_rgb(&raw.data),
        PixelOrder::Yuyv => yuyv_to_rgb(&raw.data),
    };

    let full = RgbImage::from_raw(raw.width, raw.height, rgb).ok_or(CameraError::BadBuffer {
        width: raw.width,
        height: raw.height,
        expected,
        actual: raw.data.len(),
    })?;

    if full.width() == DISPLAY_SIZE && full.height() == DISPLAY_SIZE {
        return Ok(full);
    }
    Ok(imageops::resize(
        &full,
        DISPLAY_SIZE,
        DISPLAY_SIZE,
        FilterType::Triangle,
    ))
}

fn bgr_to_rgb(data: &[u8]) -> Vec<u8> {
    let mut out = data.to_vec();
    for px in out.chunks_exact_mut(3) {
        px.swap(0, 2);
    }
    out
}

/// BT.601 YUV 4:2:2 → packed RGB.
fn yuyv_to_rgb(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() / 2 * 3);
    for quad in data.chunks_exact(4) {
        let (y0, u, y1, v) = (quad[0], quad[1], quad[2], quad[3]);
        out.extend_from_slice(&yuv_pixel(y0, u, v));
        out.extend_from_slice(&yuv_pixel(y1, u, v));
    }
    out
}

fn yuv_pixel(y: u8, u: u8, v: u8) -> [u8; 3] {
    let y = y as f32;
    let u = u as f32 - 128.0;
    let v = v as f32 - 128.0;
    let r = y + 1.402 * v;
    let g = y - 0.344_136 * u - 0.714_136 * v;
    let b = y + 1.772 * u;
    [clamp_u8(r), clamp_u8(g), clamp_u8(b)]
}

fn clamp_u8(x: f32) -> u8 {
    x.round().clamp(0.0, 255.0) as u8
}
