use separator_monitor::camera::{Camera, CameraConfig, CameraError};
use separator_monitor::chart::export_chart;
use separator_monitor::display::{ConsolePainter, UiRefreshLoop};
use separator_monitor::experiment_log::{ExperimentLog, LogConfig};
use separator_monitor::frame_producer::{FrameProducer, ProducerStats};
use separator_monitor::frame_queue::{frame_queue, OverflowPolicy, QueueConfig};
use separator_monitor::monitor::Monitor;
use separator_monitor::result_poller::PollerConfig;
use separator_monitor::simulator::{SimulatedCamera, SimulatedServer};
use separator_monitor::types::SessionClock;
#[cfg(feature = "hardware")]
use separator_monitor::v4l_camera::V4lCamera;

use anyhow::{anyhow, bail, Context, Result};
use chrono::Local;
use clap::{Args, Parser, Subcommand};
use crossbeam_channel::{after, bounded, never, select, unbounded, Receiver};
use log::{error, info};
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

/// Where `monitor` polls and `serve` listens unless told otherwise.
const DEFAULT_SERVER: &str = "127.0.0.1:80";

/// How often the monitor loop re-checks whether it has anything left to do.
const IDLE_CHECK: Duration = Duration::from_millis(250);

#[derive(Parser)]
#[command(name = "separator-monitor")]
#[command(about = "Oil/emulsion/water separator monitoring")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Live camera preview in the terminal
    Camera(CameraArgs),
    /// Poll the segmentation server, log and chart the phase fractions
    Monitor(MonitorArgs),
    /// Run a simulated segmentation server
    Serve(ServeArgs),
    /// Render an experiment log to a chart image (.svg or .png)
    Export(ExportArgs),
}

#[derive(Args)]
struct CameraArgs {
    /// Use a real V4L2 device (requires the 'hardware' feature)
    #[arg(long)]
    hardware: bool,

    /// Camera device index (/dev/video<N>)
    #[arg(long, default_value_t = 0)]
    device: u32,

    /// Requested capture width
    #[arg(long, default_value_t = 640)]
    width: u32,

    /// Requested capture height
    #[arg(long, default_value_t = 480)]
    height: u32,

    /// Capture period (ms)
    #[arg(long, default_value_t = 100)]
    period_ms: u64,

    /// UI refresh tick (ms)
    #[arg(long, default_value_t = 1)]
    tick_ms: u64,

    /// Frames buffered between capture and display
    #[arg(long, default_value_t = 4)]
    queue_capacity: usize,

    /// What to do when the display falls behind
    #[arg(long, value_enum, default_value_t = OverflowPolicy::DropOldest)]
    overflow: OverflowPolicy,

    /// Preview width in terminal columns
    #[arg(long, default_value_t = 60)]
    preview_cols: u32,

    /// Stop after this many seconds (default: run until killed)
    #[arg(long)]
    duration_s: Option<u64>,
}

#[derive(Args)]
struct MonitorArgs {
    /// Segmentation server address
    #[arg(long, default_value = DEFAULT_SERVER)]
    server: String,

    /// Poll period (ms)
    #[arg(long, default_value_t = 1000)]
    period_ms: u64,

    /// Give up on a reply after this long (default: wait for the server)
    #[arg(long)]
    read_timeout_ms: Option<u64>,

    /// Directory for experiment logs
    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,

    /// Start polling immediately instead of waiting for 'connect'
    #[arg(long)]
    connect: bool,

    /// Width of the trend lines in the dashboard
    #[arg(long, default_value_t = 40)]
    trend_width: usize,
}

#[derive(Args)]
struct ServeArgs {
    /// Bind address (matches the monitor's default server)
    #[arg(long, default_value = DEFAULT_SERVER)]
    addr: String,

    /// Side length of the mask image (pixels)
    #[arg(long, default_value_t = 300)]
    mask_size: u32,

    /// Exit after this many replies
    #[arg(long)]
    limit: Option<usize>,
}

#[derive(Args)]
struct ExportArgs {
    /// Experiment log (CSV)
    log: PathBuf,

    /// Output image; .svg renders vector, anything else a bitmap
    output: PathBuf,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info"),
    )
    .format_timestamp_millis()
    .init();

    let cli = Cli::parse();

    info!("═══════════════════════════════════════════════");
    info!("  SEPARATOR MONITOR v{}", env!("CARGO_PKG_VERSION"));
    match &cli.command {
        Command::Camera(a) => info!(
            "  Mode: CAMERA ({})",
            if a.hardware { "HARDWARE" } else { "SIMULATOR" }
        ),
        Command::Monitor(a) => info!("  Mode: MONITOR → {}", a.server),
        Command::Serve(a) => info!("  Mode: SERVER on {}", a.addr),
        Command::Export(a) => info!("  Mode: EXPORT {}", a.log.display()),
    }
    info!("═══════════════════════════════════════════════");

    match cli.command {
        Command::Camera(args) => run_camera(args),
        Command::Monitor(args) => run_monitor(args),
        Command::Serve(args) => run_serve(args),
        Command::Export(args) => run_export(args),
    }
}

// ─── camera ────────────────────────────────────────────────────────────────

fn open_camera(hardware: bool, config: &CameraConfig) -> Result<Box<dyn Camera>, CameraError> {
    if hardware {
        #[cfg(feature = "hardware")]
        {
            return Ok(Box::new(V4lCamera::open(config)?));
        }
        #[cfg(not(feature = "hardware"))]
        {
            error!("Hardware camera requires 'hardware' feature. Falling back to simulator.");
        }
    }
    Ok(Box::new(SimulatedCamera::new(config)))
}

fn run_camera(args: CameraArgs) -> Result<()> {
    let camera_config = CameraConfig {
        device: args.device,
        width: args.width,
        height: args.height,
    };
    let queue_config = QueueConfig {
        capacity: args.queue_capacity.max(1),
        policy: args.overflow,
    };
    let period = Duration::from_millis(args.period_ms.max(1));
    let hardware = args.hardware;

    let (frame_tx, frame_rx) = frame_queue(&queue_config);
    let (ready_tx, ready_rx) = bounded::<Result<String, CameraError>>(1);
    let (stop_tx, stop_rx) = bounded::<()>(1);

    // The device is opened on the capture thread and stays there.
    let producer = thread::Builder::new()
        .name("camera".into())
        .spawn(move || {
            let camera = match open_camera(hardware, &camera_config) {
                Ok(c) => c,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return ProducerStats::default();
                }
            };
            let _ = ready_tx.send(Ok(camera.describe()));
            FrameProducer::new(camera, SessionClock::new(), frame_tx, period).run(stop_rx)
        })
        .context("spawning camera thread")?;

    match ready_rx.recv() {
        Ok(Ok(desc)) => info!("Camera ready: {}", desc),
        Ok(Err(e)) => {
            let _ = producer.join();
            return Err(e).context("opening camera");
        }
        Err(_) => bail!("camera thread exited before reporting"),
    }

    let deadline: Receiver<Instant> = match args.duration_s {
        Some(s) => after(Duration::from_secs(s)),
        None => {
            info!("Running until killed. Press Ctrl+C to stop.");
            never()
        }
    };

    let painter = ConsolePainter::stdout("Separation Dynamics", args.preview_cols);
    let ui = UiRefreshLoop::new(frame_rx, painter, Duration::from_millis(args.tick_ms.max(1)));
    ui.run(deadline);

    drop(stop_tx);
    let stats = producer
        .join()
        .map_err(|_| anyhow!("camera thread panicked"))?;
    info!(
        "Capture summary: {} produced, {} skipped, {} dropped",
        stats.produced, stats.skipped, stats.dropped
    );
    Ok(())
}

// ─── monitor ───────────────────────────────────────────────────────────────

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

fn print_help() {
    println!("Commands: connect | save <path> | status | help | quit");
}

fn handle_command(monitor: &mut Monitor, line: &str) -> Flow {
    let mut parts = line.splitn(2, char::is_whitespace);
    let verb = parts.next().unwrap_or("");
    let arg = parts.next().map(str::trim).filter(|s| !s.is_empty());

    match (verb, arg) {
        ("", _) => {}
        ("connect", _) => match monitor.connect() {
            Ok(true) => {}
            Ok(false) => println!("Already polling"),
            Err(e) => error!("Could not start poller: {}", e),
        },
        ("save", Some(path)) => match monitor.save_chart(Path::new(path)) {
            Ok(n) => println!("Saved chart of {} samples to {}", n, path),
            Err(e) => error!("Save failed: {}", e),
        },
        ("save", None) => println!("usage: save <path>"),
        ("status", _) => println!("{}", monitor.status_json()),
        ("help", _) => print_help(),
        ("quit" | "exit", _) => return Flow::Quit,
        (other, _) => println!("Unknown command '{}', try 'help'", other),
    }
    Flow::Continue
}

fn run_monitor(args: MonitorArgs) -> Result<()> {
    let poller_config = PollerConfig {
        server: args.server,
        period: Duration::from_millis(args.period_ms.max(1)),
        read_timeout: args.read_timeout_ms.map(Duration::from_millis),
    };
    let log_config = LogConfig { dir: args.log_dir };
    let log = ExperimentLog::create(&log_config, Local::now())
        .context("creating experiment log")?;
    info!("Logging to {}", log.path().display());

    let mut monitor = Monitor::new(poller_config, log);
    if args.connect {
        monitor.connect().context("starting poller")?;
    }

    let (cmd_tx, cmd_rx) = unbounded::<String>();
    thread::Builder::new()
        .name("stdin".into())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if cmd_tx.send(line).is_err() {
                    break;
                }
            }
        })
        .context("spawning stdin reader")?;

    print_help();
    println!("{}", monitor.render(args.trend_width));

    let events = monitor.events().clone();
    let mut commands = cmd_rx;
    let mut stdin_open = true;

    loop {
        let mut stdin_closed = false;
        select! {
            recv(events) -> event => {
                // The monitor keeps a sender alive, so this never disconnects.
                if let Ok(event) = event {
                    monitor.apply(event).context("writing experiment log")?;
                    println!("{}", monitor.render(args.trend_width));
                }
            }
            recv(commands) -> line => match line {
                Ok(line) => {
                    if handle_command(&mut monitor, line.trim()) == Flow::Quit {
                        break;
                    }
                }
                Err(_) => stdin_closed = true,
            },
            default(IDLE_CHECK) => {
                if !stdin_open && !monitor.is_polling() && events.is_empty() {
                    break;
                }
            }
        }
        if stdin_closed {
            info!("stdin closed, exiting once polling stops");
            commands = never();
            stdin_open = false;
        }
    }

    monitor.shutdown();
    info!(
        "{} rows written to {}",
        monitor.log().rows(),
        monitor.log().path().display()
    );
    Ok(())
}

// ─── serve / export ────────────────────────────────────────────────────────

fn run_serve(args: ServeArgs) -> Result<()> {
    let server = SimulatedServer::bind(&args.addr, args.mask_size)
        .with_context(|| format!("binding {}", args.addr))?;
    server.run(args.limit);
    Ok(())
}

fn run_export(args: ExportArgs) -> Result<()> {
    let rows = export_chart(&args.log, &args.output)
        .with_context(|| format!("exporting {}", args.log.display()))?;
    info!("Wrote {} samples to {}", rows, args.output.display());
    Ok(())
}
