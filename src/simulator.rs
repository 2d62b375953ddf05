//! Hardware-free stand-ins: a camera looking at a settling separator and a
//! segmentation server reporting on the same vessel.
//!
//! Both follow `separation_profile`, so a demo run shows the emulsion layer
//! shrinking while oil and water grow.

use crate::camera::{Camera, CameraConfig, CameraError};
use crate::payload::encode_payload;
use crate::types::{Clock, Fractions, PixelOrder, RawFrame, SegmentationResult, SessionClock};
use image::{Rgb, RgbImage};
use log::{debug, info, warn};
use std::io::{self, Write};
use std::net::{SocketAddr, TcpListener};

/// Seconds for the emulsion to mostly settle out.
const SETTLE_SECS: f64 = 600.0;

/// Phase composition of the simulated vessel `t_secs` into a run.
/// Always sums to 100.
pub fn separation_profile(t_secs: f64) -> Fractions {
    let s = smoothstep((t_secs / SETTLE_SECS).clamp(0.0, 1.0));
    // Small ripple so consecutive readings differ
    let ripple = (t_secs * 0.7).sin() * 0.8;
    let oil = lerp(20.0, 42.0, s) + ripple;
    let emulsion = lerp(50.0, 6.0, s);
    let water = 100.0 - oil - emulsion;
    Fractions::new(oil, emulsion, water)
}

/// Paint top-to-bottom bands (oil, emulsion, water) with the given colors.
fn paint_bands(width: u32, height: u32, f: &Fractions, colors: [[u8; 3]; 3]) -> RgbImage {
    let oil_end = (height as f64 * f.oil / 100.0).round() as u32;
    let emulsion_end = oil_end + (height as f64 * f.emulsion / 100.0).round() as u32;
    RgbImage::from_fn(width, height, |_, y| {
        let band = if y < oil_end {
            0
        } else if y < emulsion_end {
            1
        } else {
            2
        };
        Rgb(colors[band])
    })
}

// ─── Camera ────────────────────────────────────────────────────────────────

/// Synthetic camera producing BGR frames of the vessel.
pub struct SimulatedCamera<K: Clock = SessionClock> {
    width: u32,
    height: u32,
    clock: K,
    reads: u64,
    /// Every n-th read reports "no frame", to exercise the skip path.
    miss_every: Option<u64>,
}

impl SimulatedCamera<SessionClock> {
    pub fn new(config: &CameraConfig) -> Self {
        Self::with_clock(config, SessionClock::new())
    }
}

impl<K: Clock> SimulatedCamera<K> {
    pub fn with_clock(config: &CameraConfig, clock: K) -> Self {
        Self {
            width: config.width,
            height: config.height,
            clock,
            reads: 0,
            miss_every: None,
        }
    }

    pub fn with_misses(mut self, every: u64) -> Self {
        self.miss_every = Some(every).filter(|&n| n > 0);
        self
    }
}

impl<K: Clock> Camera for SimulatedCamera<K> {
    fn read(&mut self) -> Result<Option<RawFrame>, CameraError> {
        self.reads += 1;
        if let Some(n) = self.miss_every {
            if self.reads % n == 0 {
                return Ok(None);
            }
        }
        let f = separation_profile(self.clock.now().as_secs_f64());
        // Amber oil, milky emulsion, blue-gray water; stored BGR like a real webcam
        let rgb = paint_bands(
            self.width,
            self.height,
            &f,
            [[150, 95, 20], [225, 210, 170], [70, 110, 140]],
        );
        let mut data = rgb.into_raw();
        for px in data.chunks_exact_mut(3) {
            px.swap(0, 2);
        }
        Ok(Some(RawFrame {
            width: self.width,
            height: self.height,
            order: PixelOrder::Bgr,
            data,
        }))
    }

    fn describe(&self) -> String {
        format!("simulated camera {}x{}", self.width, self.height)
    }
}

// ─── Segmentation server ───────────────────────────────────────────────────

/// Answers every TCP connection with one encoded segmentation result,
/// then closes it.
pub struct SimulatedServer {
    listener: TcpListener,
    clock: SessionClock,
    mask_size: u32,
}

impl SimulatedServer {
    pub fn bind(addr: &str, mask_size: u32) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        Ok(Self {
            listener,
            clock: SessionClock::new(),
            mask_size: mask_size.max(1),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Result the server would send right now.
    pub fn current_result(&self) -> SegmentationResult {
        let fractions = separation_profile(self.clock.now().as_secs_f64());
        let mask = paint_bands(
            self.mask_size,
            self.mask_size,
            &fractions,
            [[255, 0, 0], [0, 255, 0], [0, 0, 255]],
        );
        SegmentationResult { mask, fractions }
    }

    /// Serve connections. Blocks the calling thread; `limit` caps the number
    /// of replies (`None` = forever).
    pub fn run(self, limit: Option<usize>) {
        info!(
            "Segmentation server listening on {}",
            self.local_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| "?".into())
        );
        let mut served = 0usize;
        for stream in self.listener.incoming() {
            if limit.is_some_and(|n| served >= n) {
                break;
            }
            match stream {
                Ok(mut stream) => {
                    let result = self.current_result();
                    let bytes = encode_payload(&result);
                    match stream.write_all(&bytes) {
                        Ok(()) => debug!("Served {} ({} bytes)", result.fractions, bytes.len()),
                        Err(e) => warn!("Client write failed: {}", e),
                    }
                    served += 1;
                    if limit.is_some_and(|n| served >= n) {
                        break;
                    }
                }
                Err(e) => warn!("TCP accept error: {}", e),
            }
        }
        info!("Segmentation server stopped after {} replies", served);
    }
}

fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

fn smoothstep(t: f64) -> f64 {
    t * t * (3.0 - 2.0 * t)
}
