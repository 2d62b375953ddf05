//! End-to-end integration tests for the separator monitor.
//!
//! These exercise the two pipelines with real threads and sockets:
//!   SimulatedCamera → FrameProducer → frame queue → UiRefreshLoop
//!   SimulatedServer → TCP → ResultPoller → Monitor → chart / labels / CSV log

use chrono::Local;
use crossbeam_channel::{after, bounded};
use std::io;
use std::path::Path;
use std::thread;
use std::time::Duration;

use separator_monitor::camera::CameraConfig;
use separator_monitor::chart::export_chart;
use separator_monitor::display::{FramePainter, UiRefreshLoop};
use separator_monitor::experiment_log::{read_rows, ExperimentLog, LogConfig};
use separator_monitor::frame_producer::FrameProducer;
use separator_monitor::frame_queue::{frame_queue, OverflowPolicy, QueueConfig};
use separator_monitor::monitor::Monitor;
use separator_monitor::result_poller::PollerConfig;
use separator_monitor::simulator::{SimulatedCamera, SimulatedServer};
use separator_monitor::types::*;

// ─── Helpers ───────────────────────────────────────────────────────────────

/// Remembers what it was asked to paint.
#[derive(Default)]
struct RecordingPainter {
    seqs: Vec<u64>,
    sizes: Vec<(u32, u32)>,
}

impl FramePainter for RecordingPainter {
    fn paint(&mut self, frame: &Frame) -> io::Result<()> {
        self.seqs.push(frame.seq);
        self.sizes.push(frame.image.dimensions());
        Ok(())
    }
}

/// Start a simulated server that answers `replies` connections, then exits.
fn spawn_server(replies: usize, mask_size: u32) -> (String, thread::JoinHandle<()>) {
    let server = SimulatedServer::bind("127.0.0.1:0", mask_size).unwrap();
    let addr = server.local_addr().unwrap().to_string();
    let handle = thread::spawn(move || server.run(Some(replies)));
    (addr, handle)
}

fn new_monitor(dir: &Path, server: String) -> Monitor {
    let log = ExperimentLog::create(
        &LogConfig {
            dir: dir.to_path_buf(),
        },
        Local::now(),
    )
    .unwrap();
    Monitor::new(
        PollerConfig {
            server,
            period: Duration::from_millis(20),
            read_timeout: Some(Duration::from_secs(5)),
        },
        log,
    )
}

/// Apply poller events until `Disconnected`/`Failed` arrives. Returns the
/// number of measurements seen.
fn pump_until_stopped(monitor: &mut Monitor) -> usize {
    let mut measurements = 0;
    loop {
        let event = monitor
            .events()
            .recv_timeout(Duration::from_secs(10))
            .expect("poller went quiet");
        let stop = !matches!(event, PollerEvent::Measurement { .. });
        if !stop {
            measurements += 1;
        }
        monitor.apply(event).unwrap();
        if stop {
            return measurements;
        }
    }
}

// ─── Camera pipeline ───────────────────────────────────────────────────────

#[test]
fn test_camera_to_display() {
    let config = CameraConfig {
        device: 0,
        width: 64,
        height: 48,
    };
    let (tx, rx) = frame_queue(&QueueConfig::default());
    let (stop_tx, stop_rx) = bounded::<()>(1);

    let producer = thread::spawn(move || {
        FrameProducer::new(
            SimulatedCamera::new(&config),
            SessionClock::new(),
            tx,
            Duration::from_millis(10),
        )
        .run(stop_rx)
    });

    let mut ui = UiRefreshLoop::new(rx, RecordingPainter::default(), Duration::from_millis(1));
    let deadline = after(Duration::from_millis(400));
    while deadline.try_recv().is_err() {
        ui.tick().unwrap();
        thread::sleep(Duration::from_millis(1));
    }
    drop(stop_tx);
    let stats = producer.join().unwrap();

    let painter = ui.painter();
    assert!(painter.seqs.len() >= 5, "painted only {}", painter.seqs.len());
    // UI keeps up with a 10ms producer, so every frame is shown in order
    assert!(painter.seqs.windows(2).all(|w| w[1] > w[0]));
    assert!(painter
        .sizes
        .iter()
        .all(|&s| s == (DISPLAY_SIZE, DISPLAY_SIZE)));
    assert!(stats.produced as usize >= painter.seqs.len());
}

#[test]
fn test_slow_display_drop_newest_keeps_first_frames() {
    let config = CameraConfig {
        device: 0,
        width: 32,
        height: 32,
    };
    let (tx, rx) = frame_queue(&QueueConfig {
        capacity: 2,
        policy: OverflowPolicy::DropNewest,
    });
    let (stop_tx, stop_rx) = bounded::<()>(1);
    let producer = thread::spawn(move || {
        FrameProducer::new(
            SimulatedCamera::new(&config),
            SessionClock::new(),
            tx,
            Duration::from_millis(5),
        )
        .run(stop_rx)
    });

    // Nobody drains for a while
    thread::sleep(Duration::from_millis(200));
    stop_tx.send(()).unwrap();
    let stats = producer.join().unwrap();

    assert_eq!(rx.len(), 2);
    assert_eq!(rx.drain_one().unwrap().seq, 0);
    assert_eq!(rx.drain_one().unwrap().seq, 1);
    assert!(stats.dropped > 0);
    assert_eq!(stats.produced, 2);
}

// ─── Monitor pipeline ──────────────────────────────────────────────────────

#[test]
fn test_poll_simulated_server_then_disconnect() {
    let (addr, server) = spawn_server(3, 16);
    let dir = tempfile::tempdir().unwrap();
    let mut monitor = new_monitor(dir.path(), addr);

    assert!(monitor.connect().unwrap());
    let measurements = pump_until_stopped(&mut monitor);
    server.join().unwrap();

    // Three replies, then the listener is gone and the connect is refused
    assert_eq!(measurements, 3);
    assert_eq!(monitor.status(), ConnectionStatus::Disconnected);
    assert!(monitor.last_error().is_none());
    assert!(!monitor.is_polling());

    // Chart, labels, mask and log all agree on the latest measurement
    let latest = monitor.chart().latest().unwrap().fractions;
    assert_eq!(monitor.chart().len(), 3);
    assert_eq!(
        monitor.labels().oil,
        format!("Oil fraction: {:.1}%", latest.oil)
    );
    assert_eq!(
        monitor.labels().water,
        format!("Water fraction: {:.1}%", latest.water)
    );
    assert_eq!(monitor.mask().unwrap().dimensions(), (16, 16));

    let rows = read_rows(monitor.log().path()).unwrap();
    let charted: Vec<Fractions> = monitor
        .chart()
        .samples()
        .iter()
        .map(|s| s.fractions)
        .collect();
    assert_eq!(rows, charted);
    for f in rows {
        assert!((f.oil + f.emulsion + f.water - 100.0).abs() < 1e-6);
    }
}

#[test]
fn test_reconnect_after_disconnect() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let dir = tempfile::tempdir().unwrap();
    let mut monitor = new_monitor(dir.path(), addr.clone());
    assert!(monitor.connect().unwrap());
    assert_eq!(pump_until_stopped(&mut monitor), 0);
    assert_eq!(monitor.status(), ConnectionStatus::Disconnected);

    // Server comes up on the same port; a second connect picks it up
    let server = SimulatedServer::bind(&addr, 8).unwrap();
    let handle = thread::spawn(move || server.run(Some(1)));
    // The applied Disconnected already retired the first poller
    assert!(!monitor.is_polling());
    assert!(monitor.connect().unwrap());
    assert_eq!(pump_until_stopped(&mut monitor), 1);
    handle.join().unwrap();
    assert_eq!(monitor.log().rows(), 1);
}

#[test]
fn test_export_chart_from_monitor_log() {
    let (addr, server) = spawn_server(4, 8);
    let dir = tempfile::tempdir().unwrap();
    let mut monitor = new_monitor(dir.path(), addr);
    monitor.connect().unwrap();
    assert_eq!(pump_until_stopped(&mut monitor), 4);
    server.join().unwrap();

    let svg = dir.path().join("run.svg");
    assert_eq!(monitor.save_chart(&svg).unwrap(), 4);
    let text = std::fs::read_to_string(&svg).unwrap();
    assert!(text.contains("<svg"));

    let png = dir.path().join("run.png");
    assert_eq!(export_chart(monitor.log().path(), &png).unwrap(), 4);
    let bytes = std::fs::read(&png).unwrap();
    assert_eq!(&bytes[1..4], b"PNG");
}
