use crate::frame_queue::FrameReceiver;
use crate::types::Frame;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use image::RgbImage;
use log::{info, warn};
use std::io::{self, Write};
use std::time::Duration;

/// Something that can show a frame.
pub trait FramePainter {
    fn paint(&mut self, frame: &Frame) -> io::Result<()>;
}

/// Renders frames as an ANSI truecolor preview, two pixel rows per text row.
pub struct ConsolePainter<W: Write> {
    out: W,
    cols: u32,
    title: String,
}

impl ConsolePainter<io::Stdout> {
    pub fn stdout(title: &str, cols: u32) -> Self {
        Self::new(io::stdout(), title, cols)
    }
}

impl<W: Write> ConsolePainter<W> {
    pub fn new(out: W, title: &str, cols: u32) -> Self {
        Self {
            out,
            cols: cols.max(2),
            title: title.to_string(),
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> FramePainter for ConsolePainter<W> {
    fn paint(&mut self, frame: &Frame) -> io::Result<()> {
        // Clear screen and move cursor home
        write!(self.out, "\x1b[2J\x1b[H")?;
        let rule = "═".repeat(self.cols as usize);
        writeln!(self.out, "╔{}╗", rule)?;
        writeln!(
            self.out,
            "║ {:<width$}║",
            format!("{}  #{}  t={:.2}s", self.title, frame.seq, frame.captured_us as f64 / 1e6),
            width = self.cols as usize - 1
        )?;
        writeln!(self.out, "╠{}╣", rule)?;
        for line in preview_lines(&frame.image, self.cols) {
            writeln!(self.out, "║{}\x1b[0m║", line)?;
        }
        writeln!(self.out, "╚{}╝", rule)?;
        self.out.flush()
    }
}

/// Downsample `image` to `cols` columns and render with upper-half blocks.
pub fn preview_lines(image: &RgbImage, cols: u32) -> Vec<String> {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return Vec::new();
    }
    // Keep the aspect ratio: each text row covers two sample rows.
    let sample_rows = ((cols as u64 * h as u64 / w as u64).max(2) as u32 + 1) & !1;
    let sample = |col: u32, row: u32| {
        let x = (col as u64 * w as u64 / cols as u64) as u32;
        let y = (row as u64 * h as u64 / sample_rows as u64) as u32;
        image.get_pixel(x.min(w - 1), y.min(h - 1)).0
    };

    (0..sample_rows / 2)
        .map(|text_row| {
            let mut line = String::new();
            for col in 0..cols {
                let [tr, tg, tb] = sample(col, text_row * 2);
                let [br, bg, bb] = sample(col, text_row * 2 + 1);
                line.push_str(&format!(
                    "\x1b[38;2;{};{};{}m\x1b[48;2;{};{};{}m▀",
                    tr, tg, tb, br, bg, bb
                ));
            }
            line
        })
        .collect()
}

/// Drains the frame queue on a fixed tick and paints what it finds.
///
/// Each tick takes at most one frame. The last painted frame is held
/// until the next one replaces it.
pub struct UiRefreshLoop<P: FramePainter> {
    rx: FrameReceiver,
    painter: P,
    tick_interval: Duration,
    current: Option<Frame>,
    painted: u64,
}

impl<P: FramePainter> UiRefreshLoop<P> {
    pub fn new(rx: FrameReceiver, painter: P, tick: Duration) -> Self {
        Self {
            rx,
            painter,
            tick_interval: tick,
            current: None,
            painted: 0,
        }
    }

    /// One refresh. Returns the sequence number of the frame painted, if any.
    pub fn tick(&mut self) -> io::Result<Option<u64>> {
        let Some(frame) = self.rx.drain_one() else {
            return Ok(None);
        };
        self.painter.paint(&frame)?;
        let seq = frame.seq;
        self.current = Some(frame);
        self.painted += 1;
        Ok(Some(seq))
    }

    pub fn current(&self) -> Option<&Frame> {
        self.current.as_ref()
    }

    pub fn painted(&self) -> u64 {
        self.painted
    }

    pub fn painter(&self) -> &P {
        &self.painter
    }

    /// Run on the calling thread until `shutdown` fires or disconnects.
    /// `crossbeam_channel::after` and `never` work as shutdown sources.
    pub fn run<T>(mut self, shutdown: Receiver<T>) -> u64 {
        loop {
            if let Err(e) = self.tick() {
                warn!("Paint failed: {}", e);
            }
            match shutdown.recv_timeout(self.tick_interval) {
                Ok(_) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {}
            }
        }
        info!(
            "UI loop stopped: {} frames painted, {} dropped by queue",
            self.painted,
            self.rx.dropped()
        );
        self.painted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_queue::{frame_queue, QueueConfig};
    use image::Rgb;

    #[derive(Default)]
    struct RecordingPainter {
        seqs: Vec<u64>,
    }

    impl FramePainter for RecordingPainter {
        fn paint(&mut self, frame: &Frame) -> io::Result<()> {
            self.seqs.push(frame.seq);
            Ok(())
        }
    }

    fn frame(seq: u64) -> Frame {
        Frame {
            seq,
            captured_us: 0,
            image: RgbImage::from_pixel(8, 8, Rgb([200, 10, 10])),
        }
    }

    #[test]
    fn test_tick_paints_at_most_one() {
        let (tx, rx) = frame_queue(&QueueConfig::default());
        tx.push(frame(0));
        tx.push(frame(1));
        let mut ui = UiRefreshLoop::new(rx, RecordingPainter::default(), Duration::from_millis(1));

        assert_eq!(ui.tick().unwrap(), Some(0));
        assert_eq!(ui.painter().seqs, vec![0]);
        assert_eq!(ui.tick().unwrap(), Some(1));
        assert_eq!(ui.tick().unwrap(), None);
        assert_eq!(ui.painted(), 2);
        // Last frame stays up after the queue runs dry
        assert_eq!(ui.current().map(|f| f.seq), Some(1));
    }

    #[test]
    fn test_console_painter_output() {
        let mut painter = ConsolePainter::new(Vec::new(), "Separation Dynamics", 20);
        painter.paint(&frame(7)).unwrap();
        let text = String::from_utf8(painter.into_inner()).unwrap();
        assert!(text.contains("Separation Dynamics"));
        assert!(text.contains("#7"));
        assert!(text.contains("38;2;200;10;10"));
        assert!(text.contains('▀'));
    }

    #[test]
    fn test_run_until_deadline() {
        let (tx, rx) = frame_queue(&QueueConfig::default());
        tx.push(frame(0));
        tx.push(frame(1));
        let ui = UiRefreshLoop::new(rx, RecordingPainter::default(), Duration::from_millis(1));
        let painted = ui.run(crossbeam_channel::after(Duration::from_millis(100)));
        assert_eq!(painted, 2);
    }

    #[test]
    fn test_preview_keeps_aspect() {
        let img = RgbImage::new(300, 300);
        let lines = preview_lines(&img, 40);
        assert_eq!(lines.len(), 20);
    }
}
