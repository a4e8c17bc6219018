//! CSV file provider: one `<SYMBOL>.csv` per symbol in a directory

use std::io::Read;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use tracing::{debug, info};

use super::{normalize_symbol, DataProvider, Timeframe};
use crate::error::DataError;
use crate::types::Bar;

const TIMESTAMP_COLUMNS: &[&str] = &["timestamp", "date", "time", "datetime", "open_time"];

/// Epoch values above this are treated as milliseconds
const EPOCH_MILLIS_THRESHOLD: i64 = 100_000_000_000;

/// Reads OHLCV bars from CSV files on disk
#[derive(Debug, Clone)]
pub struct CsvDataProvider {
    dir: PathBuf,
}

impl CsvDataProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, symbol: &str) -> PathBuf {
        self.dir.join(format!("{}.csv", normalize_symbol(symbol)))
    }

    /// Load and sort every row of a single file
    pub fn load_file(path: &Path) -> Result<Vec<Bar>, DataError> {
        let file = std::fs::File::open(path).map_err(|e| DataError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        parse_bars(file)
    }
}

/// Parse CSV with a header row; column names are matched case-insensitively
pub fn parse_bars<R: Read>(reader: R) -> Result<Vec<Bar>, DataError> {
    let mut rdr = ::csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(::csv::Trim::All)
        .from_reader(reader);

    let headers: Vec<String> = rdr.headers()?.iter().map(|h| h.to_lowercase()).collect();
    let find = |name: &'static str| -> Result<usize, DataError> {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or(DataError::MissingColumn(name))
    };

    let ts_col = headers
        .iter()
        .position(|h| TIMESTAMP_COLUMNS.contains(&h.as_str()))
        .ok_or(DataError::MissingColumn("timestamp"))?;
    let open_col = find("open")?;
    let high_col = find("high")?;
    let low_col = find("low")?;
    let close_col = find("close")?;
    let volume_col = headers.iter().position(|h| h == "volume");

    let mut bars = Vec::new();
    for (row, record) in rdr.records().enumerate() {
        let record = record?;
        let field = |idx: usize| record.get(idx).unwrap_or("");
        let number = |idx: usize, column: &'static str| -> Result<f64, DataError> {
            field(idx)
                .parse::<f64>()
                .map_err(|_| DataError::InvalidValue {
                    column,
                    value: field(idx).to_string(),
                    row: row + 1,
                })
        };

        bars.push(Bar {
            timestamp: parse_timestamp(field(ts_col))?,
            open: number(open_col, "open")?,
            high: number(high_col, "high")?,
            low: number(low_col, "low")?,
            close: number(close_col, "close")?,
            volume: match volume_col {
                Some(idx) if !field(idx).is_empty() => number(idx, "volume")?,
                _ => 0.0,
            },
        });
    }

    // stable: duplicate timestamps keep file order
    bars.sort_by_key(|b| b.timestamp);
    Ok(bars)
}

/// RFC 3339, `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DD`, or epoch seconds/milliseconds
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, DataError> {
    let raw = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }
    if let Ok(epoch) = raw.parse::<i64>() {
        let parsed = if epoch.abs() >= EPOCH_MILLIS_THRESHOLD {
            Utc.timestamp_millis_opt(epoch).single()
        } else {
            Utc.timestamp_opt(epoch, 0).single()
        };
        if let Some(dt) = parsed {
            return Ok(dt);
        }
    }

    Err(DataError::Timestamp(raw.to_string()))
}

#[async_trait]
impl DataProvider for CsvDataProvider {
    fn name(&self) -> &str {
        "csv"
    }

    async fn historical_bars(&self, symbol: &str, timeframe: Timeframe) -> Result<Vec<Bar>, DataError> {
        let path = self.path_for(symbol);
        if !path.exists() {
            return Err(DataError::UnknownSymbol(symbol.to_string()));
        }

        debug!(path = %path.display(), %timeframe, "Loading CSV bars");
        let bars = tokio::task::spawn_blocking(move || Self::load_file(&path))
            .await
            .map_err(|e| DataError::Io {
                path: self.path_for(symbol).display().to_string(),
                source: std::io::Error::new(std::io::ErrorKind::Other, e),
            })??;

        if bars.is_empty() {
            return Err(DataError::Empty(symbol.to_string()));
        }

        info!(symbol, bars = bars.len(), "Loaded CSV data");
        Ok(bars)
    }
}
