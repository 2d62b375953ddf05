use crate::types::Frame;
use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError, TrySendError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// What to do when the producer finds the queue full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OverflowPolicy {
    /// Evict the oldest undisplayed frame to make room.
    DropOldest,
    /// Discard the incoming frame.
    DropNewest,
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub capacity: usize,
    pub policy: OverflowPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 4,
            policy: OverflowPolicy::DropOldest,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    ReplacedOldest,
    Dropped,
    /// The consumer side is gone.
    Closed,
}

/// Create a bounded frame queue. The sender half goes to the capture
/// thread, the receiver half to the UI thread.
pub fn frame_queue(config: &QueueConfig) -> (FrameSender, FrameReceiver) {
    let (tx, rx) = bounded::<Frame>(config.capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    let closed = Arc::new(AtomicBool::new(false));
    (
        FrameSender {
            tx,
            evict_rx: rx.clone(),
            policy: config.policy,
            dropped: dropped.clone(),
            closed: closed.clone(),
        },
        FrameReceiver {
            rx,
            dropped,
            closed,
        },
    )
}

pub struct FrameSender {
    tx: Sender<Frame>,
    // Only used to evict under DropOldest.
    evict_rx: Receiver<Frame>,
    policy: OverflowPolicy,
    dropped: Arc<AtomicU64>,
    closed: Arc<AtomicBool>,
}

impl FrameSender {
    pub fn push(&self, frame: Frame) -> PushOutcome {
        if self.is_closed() {
            return PushOutcome::Closed;
        }
        match self.tx.try_send(frame) {
            Ok(()) => PushOutcome::Queued,
            Err(TrySendError::Disconnected(_)) => PushOutcome::Closed,
            Err(TrySendError::Full(frame)) => match self.policy {
                OverflowPolicy::DropNewest => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    PushOutcome::Dropped
                }
                OverflowPolicy::DropOldest => {
                    let evicted = self.evict_rx.try_recv().is_ok();
                    self.push_after_eviction(evicted, frame)
                }
            },
        }
    }

    /// Retry a push once room was (or, if the consumer got there first,
    /// was not) made by evicting the oldest frame.
    fn push_after_eviction(&self, evicted: bool, frame: Frame) -> PushOutcome {
        if evicted {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        match self.tx.try_send(frame) {
            Ok(()) if evicted => PushOutcome::ReplacedOldest,
            Ok(()) => PushOutcome::Queued,
            Err(TrySendError::Disconnected(_)) => PushOutcome::Closed,
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                PushOutcome::Dropped
            }
        }
    }

    /// True once the `FrameReceiver` has been dropped.
    pub fn is_closed(&self) -> bool {
        // evict_rx keeps the channel connected, so track the UI half directly.
        self.closed.load(Ordering::Acquire)
    }
}

pub struct FrameReceiver {
    rx: Receiver<Frame>,
    dropped: Arc<AtomicU64>,
    closed: Arc<AtomicBool>,
}

impl Drop for FrameReceiver {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::Release);
    }
}

impl FrameReceiver {
    /// Take at most one frame. Empty queue → `None`, nothing else happens.
    pub fn drain_one(&self) -> Option<Frame> {
        match self.rx.try_recv() {
            Ok(frame) => Some(frame),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Frames discarded by the overflow policy so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
