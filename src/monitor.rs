use crate::chart::{export_chart, ChartError, TimeSeriesChart};
use crate::display::preview_lines;
use crate::experiment_log::{ExperimentLog, LogError};
use crate::result_poller::{PollerConfig, PollerHandle, ResultPoller};
use crate::types::{ConnectionStatus, Fractions, PollerEvent, FIELD_NAMES};
use crossbeam_channel::{unbounded, Receiver, Sender};
use image::RgbImage;
use log::{debug, info, warn};
use serde_json::json;
use std::io;
use std::path::Path;

const EMPTY_MESSAGE: &str = "Unknown";
/// Terminal columns used to draw the segmented mask.
const MASK_PREVIEW_COLS: u32 = 24;

/// Text of the three fraction labels.
#[derive(Debug, Clone, PartialEq)]
pub struct FractionLabels {
    pub oil: String,
    pub emulsion: String,
    pub water: String,
}

impl FractionLabels {
    pub fn unknown() -> Self {
        Self {
            oil: format!("Oil fraction: {}", EMPTY_MESSAGE),
            emulsion: format!("Emulsion fraction: {}", EMPTY_MESSAGE),
            water: format!("Water fraction: {}", EMPTY_MESSAGE),
        }
    }

    pub fn set(&mut self, f: &Fractions) {
        self.oil = format!("Oil fraction: {:.1}%", f.oil);
        self.emulsion = format!("Emulsion fraction: {:.1}%", f.emulsion);
        self.water = format!("Water fraction: {:.1}%", f.water);
    }

    pub fn lines(&self) -> [&str; 3] {
        [&self.oil, &self.emulsion, &self.water]
    }
}

impl Default for FractionLabels {
    fn default() -> Self {
        Self::unknown()
    }
}

/// UI-side state of the monitor front-end.
///
/// Owns the poller worker and routes each result to every sink: chart
/// history, labels, mask display and experiment log.
pub struct Monitor {
    config: PollerConfig,
    events_tx: Sender<PollerEvent>,
    events_rx: Receiver<PollerEvent>,
    poller: Option<PollerHandle>,
    status: ConnectionStatus,
    chart: TimeSeriesChart,
    labels: FractionLabels,
    mask: Option<RgbImage>,
    log: ExperimentLog,
    last_error: Option<String>,
}

impl Monitor {
    pub fn new(config: PollerConfig, log: ExperimentLog) -> Self {
        let (events_tx, events_rx) = unbounded();
        Self {
            config,
            events_tx,
            events_rx,
            poller: None,
            status: ConnectionStatus::Disconnected,
            chart: TimeSeriesChart::new(),
            labels: FractionLabels::unknown(),
            mask: None,
            log,
            last_error: None,
        }
    }

    /// Start polling unless a poller is already running.
    /// Returns whether a new poller was started.
    ///
    /// Events still queued from a previous poller are applied first, so a
    /// poller that has already reported its stop never blocks a reconnect.
    pub fn connect(&mut self) -> io::Result<bool> {
        self.process_pending().map_err(io::Error::other)?;
        if self.is_polling() {
            debug!("Connect ignored, poller already running");
            return Ok(false);
        }
        if let Some(old) = self.poller.take() {
            old.stop();
        }
        info!("Connecting to {}", self.config.server);
        let handle = ResultPoller::new(&self.config, self.events_tx.clone()).spawn()?;
        self.poller = Some(handle);
        Ok(true)
    }

    pub fn is_polling(&self) -> bool {
        self.poller.as_ref().is_some_and(|p| !p.is_finished())
    }

    /// Channel the poller reports on, for use in `select!`.
    pub fn events(&self) -> &Receiver<PollerEvent> {
        &self.events_rx
    }

    /// Apply every event already waiting. Returns how many were applied.
    pub fn process_pending(&mut self) -> Result<usize, LogError> {
        let mut n = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            self.apply(event)?;
            n += 1;
        }
        Ok(n)
    }

    pub fn apply(&mut self, event: PollerEvent) -> Result<(), LogError> {
        match event {
            PollerEvent::Measurement { sample, mask } => {
                debug!("Measurement: {}", sample.fractions);
                self.log.append(&sample.fractions)?;
                self.chart.push(sample);
                self.labels.set(&sample.fractions);
                self.mask = Some(mask);
                self.status = ConnectionStatus::Connected;
                self.last_error = None;
            }
            PollerEvent::Disconnected => {
                info!("{}", ConnectionStatus::Disconnected.message());
                self.status = ConnectionStatus::Disconnected;
                // The stop event is the worker's last send; this join is short.
                self.shutdown();
            }
            PollerEvent::Failed(reason) => {
                warn!("Polling stopped: {}", reason);
                self.status = ConnectionStatus::Disconnected;
                self.last_error = Some(reason);
                self.shutdown();
            }
        }
        Ok(())
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn chart(&self) -> &TimeSeriesChart {
        &self.chart
    }

    pub fn labels(&self) -> &FractionLabels {
        &self.labels
    }

    pub fn mask(&self) -> Option<&RgbImage> {
        self.mask.as_ref()
    }

    pub fn log(&self) -> &ExperimentLog {
        &self.log
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Render the current log to an image file.
    pub fn save_chart(&self, path: &Path) -> Result<usize, ChartError> {
        export_chart(self.log.path(), path)
    }

    pub fn status_json(&self) -> serde_json::Value {
        json!({
            "status": self.status,
            "message": self.status.message(),
            "polling": self.is_polling(),
            "server": self.config.server,
            "samples": self.chart.len(),
            "latest": self.chart.latest(),
            "log_file": self.log.path().display().to_string(),
            "last_error": self.last_error,
        })
    }

    /// Text dashboard: status line, labels, one trend per column.
    pub fn render(&self, trend_width: usize) -> String {
        let mut out = String::new();
        out.push_str(&format!("[{}]\n", self.status.message()));
        for (label, (column, name)) in self.labels.lines().iter().zip(FIELD_NAMES.iter().enumerate()) {
            out.push_str(&format!(
                "  {:<28} {:>9} {}\n",
                label,
                name,
                self.chart.sparkline(column, trend_width)
            ));
        }
        match &self.mask {
            Some(m) => {
                out.push_str(&format!("  mask: {}x{}\n", m.width(), m.height()));
                for line in preview_lines(m, MASK_PREVIEW_COLS) {
                    out.push_str(&format!("  {}\x1b[0m\n", line));
                }
            }
            None => out.push_str("  mask: ---\n"),
        }
        out
    }

    /// Stop the poller, if any, and wait for it.
    pub fn shutdown(&mut self) {
        if let Some(p) = self.poller.take() {
            p.stop();
        }
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
