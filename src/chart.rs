use crate::experiment_log::{read_rows, LogError};
use crate::types::{Fractions, MeasurementSample, FIELD_NAMES};
use log::info;
use plotters::coord::Shift;
use plotters::prelude::*;
use std::path::Path;
use thiserror::Error;

const EXPORT_SIZE: (u32, u32) = (1200, 800);

#[derive(Debug, Error)]
pub enum ChartError {
    #[error(transparent)]
    Log(#[from] LogError),
    #[error("chart drawing failed: {0}")]
    Draw(String),
}

/// In-memory fraction history. Grows for the lifetime of the process.
#[derive(Debug, Default, Clone)]
pub struct TimeSeriesChart {
    samples: Vec<MeasurementSample>,
}

impl TimeSeriesChart {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sample: MeasurementSample) {
        self.samples.push(sample);
    }

    pub fn samples(&self) -> &[MeasurementSample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn latest(&self) -> Option<&MeasurementSample> {
        self.samples.last()
    }

    /// One column as (minutes since first sample, percent) points.
    /// `column` indexes `FIELD_NAMES`.
    pub fn series(&self, column: usize) -> Vec<(f64, f64)> {
        let Some(first) = self.samples.first() else {
            return Vec::new();
        };
        self.samples
            .iter()
            .map(|s| {
                let minutes = (s.timestamp - first.timestamp).num_milliseconds() as f64 / 60_000.0;
                (minutes, s.fractions.as_array()[column])
            })
            .collect()
    }

    /// Compact one-line trend of a column, newest on the right.
    pub fn sparkline(&self, column: usize, width: usize) -> String {
        const BARS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];
        let start = self.samples.len().saturating_sub(width);
        self.samples[start..]
            .iter()
            .map(|s| {
                let v = s.fractions.as_array()[column].clamp(0.0, 100.0);
                BARS[((v / 100.0) * (BARS.len() - 1) as f64).round() as usize]
            })
            .collect()
    }
}

/// Re-read `log_path` and render one line per column to `image_path`.
///
/// `.svg` targets use the SVG backend, everything else the bitmap backend
/// (format picked from the extension). Returns the number of rows plotted.
pub fn export_chart(log_path: &Path, image_path: &Path) -> Result<usize, ChartError> {
    let rows = read_rows(log_path)?;
    render_rows(&rows, image_path)?;
    info!(
        "Chart of {} rows from {} → {}",
        rows.len(),
        log_path.display(),
        image_path.display()
    );
    Ok(rows.len())
}

pub fn render_rows(rows: &[Fractions], image_path: &Path) -> Result<(), ChartError> {
    let is_svg = image_path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("svg"));

    if is_svg {
        let root = SVGBackend::new(image_path, EXPORT_SIZE).into_drawing_area();
        draw(&root, rows)?;
        root.present().map_err(draw_err)
    } else {
        let root = BitMapBackend::new(image_path, EXPORT_SIZE).into_drawing_area();
        draw(&root, rows)?;
        root.present().map_err(draw_err)
    }
}

fn draw_err<E: std::error::Error + Send + Sync>(e: DrawingAreaErrorKind<E>) -> ChartError {
    ChartError::Draw(e.to_string())
}

fn draw<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    rows: &[Fractions],
) -> Result<(), ChartError> {
    root.fill(&WHITE).map_err(draw_err)?;

    let x_max = rows.len().saturating_sub(1).max(1) as f64;
    let y_max = rows
        .iter()
        .flat_map(|r| r.as_array())
        .fold(100.0_f64, f64::max);

    let mut chart = ChartBuilder::on(root)
        .margin(20)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(0.0..x_max, 0.0..y_max)
        .map_err(draw_err)?;

    chart
        .configure_mesh()
        .x_desc("Time, minutes")
        .y_desc("Fraction, %")
        .draw()
        .map_err(draw_err)?;

    let colors = [RED, BLUE, GREEN];
    for (column, (name, color)) in FIELD_NAMES.iter().zip(colors).enumerate() {
        chart
            .draw_series(LineSeries::new(
                rows.iter()
                    .enumerate()
                    .map(|(i, r)| (i as f64, r.as_array()[column])),
                color.stroke_width(2),
            ))
            .map_err(draw_err)?
            .label(*name)
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color.stroke_width(2)));
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.9))
        .border_style(BLACK)
        .draw()
        .map_err(draw_err)?;

    Ok(())
}
