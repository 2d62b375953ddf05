use crate::types::Fractions;
use chrono::{DateTime, Local};
use log::info;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

const FILE_SUFFIX: &str = "_experiment_log.csv";

#[derive(Debug, Error)]
pub enum LogError {
    #[error("log I/O on {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("CSV error in {path}: {source}")]
    Csv { path: PathBuf, source: csv::Error },
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub dir: PathBuf,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("logs"),
        }
    }
}

/// `DD-MM-YY-HH-MM_experiment_log.csv` for the given start time.
pub fn log_file_name(started: &DateTime<Local>) -> String {
    format!("{}{}", started.format("%d-%m-%y-%H-%M"), FILE_SUFFIX)
}

/// Append-only, header-less CSV of fraction rows (oil, emulsion, water).
///
/// One file per run. Rows are flushed as they are written so the file can
/// be re-read for chart export at any time.
pub struct ExperimentLog {
    path: PathBuf,
    writer: csv::Writer<File>,
    rows: u64,
}

impl ExperimentLog {
    /// Create the log directory if needed and create (truncate) this run's file.
    pub fn create(config: &LogConfig, started: DateTime<Local>) -> Result<Self, LogError> {
        fs::create_dir_all(&config.dir).map_err(|source| LogError::Io {
            path: config.dir.clone(),
            source,
        })?;
        let path = config.dir.join(log_file_name(&started));
        let file = File::create(&path).map_err(|source| LogError::Io {
            path: path.clone(),
            source,
        })?;
        let writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);

        info!("Experiment log → {}", path.display());
        Ok(Self {
            path,
            writer,
            rows: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn append(&mut self, fractions: &Fractions) -> Result<(), LogError> {
        self.writer
            .serialize((fractions.oil, fractions.emulsion, fractions.water))
            .map_err(|source| LogError::Csv {
                path: self.path.clone(),
                source,
            })?;
        self.writer.flush().map_err(|source| LogError::Io {
            path: self.path.clone(),
            source,
        })?;
        self.rows += 1;
        Ok(())
    }
}

/// Read every row of a log file, in file order.
pub fn read_rows(path: &Path) -> Result<Vec<Fractions>, LogError> {
    let csv_err = |source| LogError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_path(path)
        .map_err(csv_err)?;

    let mut rows = Vec::new();
    for record in reader.deserialize::<(f64, f64, f64)>() {
        rows.push(Fractions::from(record.map_err(csv_err)?));
    }
    Ok(rows)
}
