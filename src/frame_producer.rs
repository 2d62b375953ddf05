use crate::camera::{prepare_frame, Camera};
use crate::frame_queue::{FrameSender, PushOutcome};
use crate::types::{Clock, Frame};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use log::{debug, info, warn};
use std::time::Duration;

/// Result of one scheduling decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Less than one period since the last capture.
    NotDue,
    /// A frame was captured and handed to the queue.
    Produced(PushOutcome),
    /// A capture was due but the camera gave nothing usable.
    Skipped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProducerStats {
    pub produced: u64,
    pub skipped: u64,
    pub dropped: u64,
}

/// Captures one frame per period and pushes it onto the frame queue.
///
/// The first capture happens one full period after construction.
pub struct FrameProducer<C: Camera, K: Clock> {
    camera: C,
    clock: K,
    queue: FrameSender,
    period: Duration,
    last_capture: Duration,
    seq: u64,
    stats: ProducerStats,
}

impl<C: Camera, K: Clock> FrameProducer<C, K> {
    pub fn new(camera: C, clock: K, queue: FrameSender, period: Duration) -> Self {
        let last_capture = clock.now();
        Self {
            camera,
            clock,
            queue,
            period,
            last_capture,
            seq: 0,
            stats: ProducerStats::default(),
        }
    }

    pub fn stats(&self) -> ProducerStats {
        self.stats
    }

    /// Capture if a period has elapsed since the previous attempt.
    pub fn tick(&mut self) -> TickOutcome {
        let now = self.clock.now();
        if now.saturating_sub(self.last_capture) < self.period {
            return TickOutcome::NotDue;
        }
        // Reset even on failure so a dead camera is polled at the same rate.
        self.last_capture = now;

        let raw = match self.camera.read() {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                self.stats.skipped += 1;
                debug!("Camera had no frame ready, skipping");
                return TickOutcome::Skipped;
            }
            Err(e) => {
                self.stats.skipped += 1;
                warn!("Camera read failed, skipping: {}", e);
                return TickOutcome::Skipped;
            }
        };

        let image = match prepare_frame(&raw) {
            Ok(img) => img,
            Err(e) => {
                self.stats.skipped += 1;
                warn!("Discarding unusable frame: {}", e);
                return TickOutcome::Skipped;
            }
        };

        let frame = Frame {
            seq: self.seq,
            captured_us: now.as_micros() as u64,
            image,
        };
        self.seq += 1;

        let outcome = self.queue.push(frame);
        match outcome {
            PushOutcome::Queued => self.stats.produced += 1,
            PushOutcome::ReplacedOldest => {
                self.stats.produced += 1;
                self.stats.dropped += 1;
            }
            PushOutcome::Dropped => self.stats.dropped += 1,
            PushOutcome::Closed => {}
        }
        TickOutcome::Produced(outcome)
    }

    /// Time left until the next capture is due.
    pub fn until_due(&self) -> Duration {
        let since = self.clock.now().saturating_sub(self.last_capture);
        self.period.saturating_sub(since)
    }

    /// Run the capture loop. Blocks the calling thread until `shutdown`
    /// receives a message or disconnects, or the UI side of the queue is
    /// dropped.
    pub fn run<T>(mut self, shutdown: Receiver<T>) -> ProducerStats {
        info!(
            "Frame producer running: {} every {:?}",
            self.camera.describe(),
            self.period
        );

        loop {
            if let TickOutcome::Produced(PushOutcome::Closed) = self.tick() {
                info!("Frame queue closed");
                break;
            }
            match shutdown.recv_timeout(self.until_due()) {
                Ok(_) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {}
            }
        }

        info!(
            "Frame producer stopped: {} produced, {} skipped, {} dropped",
            self.stats.produced, self.stats.skipped, self.stats.dropped
        );
        self.stats
    }
}
