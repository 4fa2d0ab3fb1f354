//! CSV / JSON export and import of candle series

use crate::data::Candle;
use crate::error::{HistoryError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Csv,
    Json,
}

impl ExportFormat {
    pub const SUPPORTED: [ExportFormat; 2] = [ExportFormat::Csv, ExportFormat::Json];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
        }
    }

    /// Guess the format from a file extension
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default();
        ext.parse()
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportFormat {
    type Err = HistoryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            _ => Err(HistoryError::UnsupportedFormat(s.to_string())),
        }
    }
}

/// Write candles to `path`, creating parent directories.
///
/// Columns (CSV) and keys (JSON) are the candle fields; decimals are written
/// as strings so nothing is lost to float formatting.
pub fn write_candles(format: ExportFormat, path: &Path, candles: &[Candle]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let file = File::create(path)?;

    match format {
        ExportFormat::Csv => {
            let mut writer = csv::Writer::from_writer(BufWriter::new(file));
            for candle in candles {
                writer.serialize(candle)?;
            }
            writer.flush()?;
        }
        ExportFormat::Json => {
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, candles)?;
            writer.write_all(b"\n")?;
            writer.flush()?;
        }
    }
    Ok(())
}

/// Read a file produced by [`write_candles`]
pub fn read_candles(format: ExportFormat, path: &Path) -> Result<Vec<Candle>> {
    let file = File::open(path)?;
    match format {
        ExportFormat::Csv => {
            let mut reader = csv::Reader::from_reader(BufReader::new(file));
            let mut candles = Vec::new();
            for row in reader.deserialize() {
                candles.push(row?);
            }
            Ok(candles)
        }
        ExportFormat::Json => Ok(serde_json::from_reader(BufReader::new(file))?),
    }
}
