//! Append-only audit trail of delivered readings.
//!
//! One line per reading confirmed by the collection endpoint:
//! `timestamp,serial,wattage`, where `timestamp` is Unix seconds with
//! millisecond precision.
//!
//! A batch interrupted mid-write leaves an unterminated line. The next
//! writer starts on a fresh line, and readers report such lines in
//! [`AuditContents::invalid`] instead of failing the whole file.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::device::Reading;

/// Audit log errors.
#[derive(Debug, Error)]
pub enum AuditError {
    /// Opening, writing or syncing the file failed.
    #[error("audit log i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A line does not follow `timestamp,serial,wattage`.
    #[error("invalid audit line '{line}': {reason}")]
    Parse { line: String, reason: String },
}

/// One audit line.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditRecord {
    /// Reading timestamp.
    pub timestamp: DateTime<Utc>,
    /// Device serial.
    pub serial: String,
    /// Instantaneous power in watts.
    pub wattage: f64,
}

impl AuditRecord {
    /// Render as an audit line (without newline).
    pub fn to_line(&self) -> String {
        let millis = self.timestamp.timestamp_millis();
        let sign = if millis < 0 { "-" } else { "" };
        let abs = millis.unsigned_abs();
        format!(
            "{sign}{}.{:03},{},{:?}",
            abs / 1000,
            abs % 1000,
            self.serial,
            self.wattage
        )
    }
}

impl From<&Reading> for AuditRecord {
    fn from(reading: &Reading) -> Self {
        Self {
            timestamp: reading.timestamp,
            serial: reading.serial.clone(),
            wattage: reading.wattage,
        }
    }
}

impl FromStr for AuditRecord {
    type Err = AuditError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| AuditError::Parse {
            line: line.to_string(),
            reason: reason.to_string(),
        };

        let (timestamp, rest) = line.split_once(',').ok_or_else(|| invalid("missing fields"))?;
        let (serial, wattage) = rest.rsplit_once(',').ok_or_else(|| invalid("missing fields"))?;

        let seconds: f64 = timestamp
            .trim()
            .parse()
            .map_err(|_| invalid("timestamp is not a number"))?;
        let timestamp = DateTime::from_timestamp_millis((seconds * 1000.0).round() as i64)
            .ok_or_else(|| invalid("timestamp out of range"))?;

        if serial.is_empty() {
            return Err(invalid("empty serial"));
        }

        let wattage: f64 = wattage
            .trim()
            .parse()
            .map_err(|_| invalid("wattage is not a number"))?;

        Ok(Self {
            timestamp,
            serial: serial.to_string(),
            wattage,
        })
    }
}

/// Parsed content of an audit file.
#[derive(Debug, Default)]
pub struct AuditContents {
    /// Well-formed records, in file order.
    pub records: Vec<AuditRecord>,
    /// Lines that failed to parse, as [`AuditError::Parse`].
    pub invalid: Vec<AuditError>,
}

/// Single-writer handle to the audit file.
#[derive(Debug)]
pub struct AuditLog {
    path: PathBuf,
    file: File,
    /// The file may end without a newline.
    unterminated: bool,
}

impl AuditLog {
    /// Open (or create) the audit file in append mode, creating parent
    /// directories as needed.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        let unterminated = ends_mid_line(&path).await?;
        if unterminated {
            tracing::warn!(path = %path.display(), "Audit log ends with a partial line");
        }
        Ok(Self {
            path,
            file,
            unterminated,
        })
    }

    /// Path of the audit file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one line per reading and sync to disk.
    ///
    /// Returns the number of lines written.
    pub async fn append(&mut self, readings: &[Reading]) -> Result<usize, AuditError> {
        if readings.is_empty() {
            return Ok(0);
        }

        let mut text = String::with_capacity(readings.len() * 48 + 1);
        if self.unterminated {
            text.push('\n');
        }
        for reading in readings {
            text.push_str(&AuditRecord::from(reading).to_line());
            text.push('\n');
        }

        // A failed write may have landed partially
        self.unterminated = true;
        self.file.write_all(text.as_bytes()).await?;
        self.file.flush().await?;
        self.unterminated = false;
        self.file.sync_data().await?;
        Ok(readings.len())
    }

    /// Read every record of an audit file.
    ///
    /// A missing file is empty. Malformed lines are collected in
    /// [`AuditContents::invalid`]; only I/O failures are errors.
    pub async fn read_all(path: impl AsRef<Path>) -> Result<AuditContents, AuditError> {
        let content = match tokio::fs::read_to_string(path.as_ref()).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(AuditContents::default());
            }
            Err(e) => return Err(e.into()),
        };

        let mut contents = AuditContents::default();
        for line in content.lines().filter(|line| !line.trim().is_empty()) {
            match line.parse::<AuditRecord>() {
                Ok(record) => contents.records.push(record),
                Err(e) => contents.invalid.push(e),
            }
        }
        Ok(contents)
    }
}

/// Whether a non-empty file lacks a trailing newline.
async fn ends_mid_line(path: &Path) -> Result<bool, AuditError> {
    let mut file = File::open(path).await?;
    if file.metadata().await?.len() == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::End(-1)).await?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last).await?;
    Ok(last[0] != b'\n')
}
