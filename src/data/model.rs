use std::fmt;
use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};

/// Canonical name of the sound-level column in every output table.
pub const DECIBEL_FIELD: &str = "Recorded.Value..dBA.";
pub const DATE_FIELD: &str = "Date";
pub const TIME_FIELD: &str = "Time";
/// Column / metadata key identifying the source file.
pub const LOCATION_FIELD: &str = "location";

// ---------------------------------------------------------------------------
// MetadataRecord – the key/value block at the top of an export
// ---------------------------------------------------------------------------

/// Flat header-key → header-value mapping for one file.
///
/// Keys keep the order in which they first appeared; re-inserting a key
/// overwrites its value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataRecord {
    entries: Vec<(String, String)>,
}

impl MetadataRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// RawTable – the tabular section before normalization
// ---------------------------------------------------------------------------

/// Unnormalized table read after the metadata block.
///
/// Every row has exactly `headers.len()` cells.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Whether a header is an unlabeled placeholder column (blank, or the
/// `Unnamed: N` label spreadsheet tools give blank headers).
pub fn is_placeholder_column(header: &str) -> bool {
    let header = header.trim();
    header.is_empty() || header.starts_with("Unnamed")
}

// ---------------------------------------------------------------------------
// DeviceFamily – which export layout a file uses
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceFamily {
    /// Time column holds `M:SS.s` offsets from the metadata `Start Time`.
    OffsetClock,
    /// Time column holds absolute `YYYY-MM-DD HH:MM:SS.SSS` timestamps.
    WallClock,
}

impl DeviceFamily {
    /// Pick the family from the file's base name: any marker substring
    /// selects [`DeviceFamily::OffsetClock`].
    pub fn detect(path: &Path, offset_markers: &[String]) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default();
        if offset_markers
            .iter()
            .any(|m| !m.is_empty() && name.contains(m.as_str()))
        {
            DeviceFamily::OffsetClock
        } else {
            DeviceFamily::WallClock
        }
    }
}

impl fmt::Display for DeviceFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceFamily::OffsetClock => write!(f, "offset-clock"),
            DeviceFamily::WallClock => write!(f, "wall-clock"),
        }
    }
}

/// Location tag for a file: its base name without extension.
pub fn location_for(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// ReadingRow – one normalized measurement
// ---------------------------------------------------------------------------

/// A normalized reading. `time` is always truncated to whole milliseconds.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadingRow {
    pub decibels: Option<f64>,
    pub date: Option<NaiveDate>,
    pub time: Option<NaiveTime>,
}

impl ReadingRow {
    pub fn new(decibels: Option<f64>, timestamp: Option<NaiveDateTime>) -> Self {
        let (date, time) = match timestamp {
            Some(ts) => (Some(ts.date()), Some(truncate_to_millis(ts.time()))),
            None => (None, None),
        };
        ReadingRow {
            decibels,
            date,
            time,
        }
    }

    /// `YYYY-MM-DD`, or `None` when the timestamp was unparseable.
    pub fn date_string(&self) -> Option<String> {
        self.date.map(|d| d.format("%Y-%m-%d").to_string())
    }

    /// `HH:MM:SS.mmm`, or `None` when the timestamp was unparseable.
    pub fn time_string(&self) -> Option<String> {
        self.time.map(|t| t.format("%H:%M:%S%.3f").to_string())
    }
}

fn truncate_to_millis(time: NaiveTime) -> NaiveTime {
    let nanos = time.nanosecond() / 1_000_000 * 1_000_000;
    time.with_nanosecond(nanos).unwrap_or(time)
}

/// A reading tagged with the location of the file it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct LocatedReading {
    pub location: String,
    pub reading: ReadingRow,
}

// ---------------------------------------------------------------------------
// Normalization results
// ---------------------------------------------------------------------------

/// Outcome of normalizing one raw table.
#[derive(Debug, Clone, PartialEq)]
pub enum Normalization {
    /// Rows projected onto the three canonical fields.
    Complete(Vec<ReadingRow>),
    /// The clock column was absent; the raw table is handed back untouched
    /// so the caller can decide what to do with it.
    Partial {
        table: RawTable,
        missing_column: String,
    },
}

/// Everything produced from a single export file.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedFile {
    pub location: String,
    pub family: DeviceFamily,
    /// Header block plus the injected `location` key.
    pub metadata: MetadataRecord,
    pub normalization: Normalization,
}
