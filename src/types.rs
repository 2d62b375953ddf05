use chrono::{DateTime, Local};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

// ─── Constants ──────────────────────────────────────────────────────────────

/// Side length of the square display frame, in pixels.
pub const DISPLAY_SIZE: u32 = 300;

/// Column order of the experiment log and of the chart series.
pub const FIELD_NAMES: [&str; 3] = ["oil", "emulsion", "water"];

// ─── Camera frames ──────────────────────────────────────────────────────────

/// Byte layout of a raw camera buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelOrder {
    /// Packed 8-bit B, G, R triplets (OpenCV-style cameras).
    Bgr,
    /// Packed 8-bit R, G, B triplets.
    Rgb,
    /// Packed YUV 4:2:2, two pixels per four bytes.
    Yuyv,
}

impl PixelOrder {
    /// Expected buffer size for a `width`×`height` image in this layout.
    pub fn buffer_len(self, width: u32, height: u32) -> usize {
        let pixels = width as usize * height as usize;
        match self {
            PixelOrder::Bgr | PixelOrder::Rgb => pixels * 3,
            PixelOrder::Yuyv => pixels * 2,
        }
    }
}

/// A frame exactly as the camera delivered it.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    pub order: PixelOrder,
    pub data: Vec<u8>,
}

/// A display-ready frame: RGB, `DISPLAY_SIZE`×`DISPLAY_SIZE`.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Capture sequence number, starting at 0 for the first produced frame.
    pub seq: u64,
    /// Microseconds since the producer's clock started.
    pub captured_us: u64,
    pub image: RgbImage,
}

impl Frame {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

// ─── Measurements ───────────────────────────────────────────────────────────

/// Phase composition at one sampling instant, in percent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Fractions {
    pub oil: f64,
    pub emulsion: f64,
    pub water: f64,
}

impl Fractions {
    pub fn new(oil: f64, emulsion: f64, water: f64) -> Self {
        Self {
            oil,
            emulsion,
            water,
        }
    }

    /// Values in `FIELD_NAMES` order.
    pub fn as_array(&self) -> [f64; 3] {
        [self.oil, self.emulsion, self.water]
    }
}

impl From<(f64, f64, f64)> for Fractions {
    fn from((oil, emulsion, water): (f64, f64, f64)) -> Self {
        Self::new(oil, emulsion, water)
    }
}

impl fmt::Display for Fractions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "oil={:.1}% emulsion={:.1}% water={:.1}%",
            self.oil, self.emulsion, self.water
        )
    }
}

/// A fraction reading stamped with local receive time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeasurementSample {
    pub timestamp: DateTime<Local>,
    pub fractions: Fractions,
}

/// One decoded reply from the segmentation server.
#[derive(Debug, Clone)]
pub struct SegmentationResult {
    pub mask: RgbImage,
    pub fractions: Fractions,
}

// ─── Inter-thread messages ──────────────────────────────────────────────────

/// Messages from the poller worker to the UI thread.
#[derive(Debug, Clone)]
pub enum PollerEvent {
    Measurement {
        sample: MeasurementSample,
        mask: RgbImage,
    },
    /// The server refused the connection; polling has stopped.
    Disconnected,
    /// Any other poll failure; polling has stopped.
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
}

impl ConnectionStatus {
    pub fn message(self) -> &'static str {
        match self {
            ConnectionStatus::Connected => "Server is connected",
            ConnectionStatus::Disconnected => "Server is disconnected",
        }
    }
}

// ─── Clocks ─────────────────────────────────────────────────────────────────

/// Monotonic time source for scheduling periodic work.
pub trait Clock: Send {
    /// Time elapsed since the clock started.
    fn now(&self) -> Duration;
}

/// Wall-clock backed session clock.
#[derive(Clone)]
pub struct SessionClock {
    start: Instant,
}

impl SessionClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for SessionClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SessionClock {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }
}

/// Clock that only moves when told to. Clones share the same time.
#[derive(Clone, Default)]
pub struct ManualClock {
    now_us: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.now_us
            .fetch_add(by.as_micros() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_micros(self.now_us.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_len_per_layout() {
        assert_eq!(PixelOrder::Bgr.buffer_len(4, 2), 24);
        assert_eq!(PixelOrder::Rgb.buffer_len(4, 2), 24);
        assert_eq!(PixelOrder::Yuyv.buffer_len(4, 2), 16);
    }

    #[test]
    fn test_manual_clock_clones_share_time() {
        let clock = ManualClock::new();
        let other = clock.clone();
        clock.advance(Duration::from_millis(250));
        assert_eq!(other.now(), Duration::from_millis(250));
    }

    #[test]
    fn test_status_messages() {
        assert_eq!(ConnectionStatus::Connected.message(), "Server is connected");
        assert_eq!(
            ConnectionStatus::Disconnected.message(),
            "Server is disconnected"
        );
    }
}
