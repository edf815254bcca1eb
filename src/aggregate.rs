use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use log::{error, info, warn};

use crate::config::{DeviceConfig, PartialPolicy};
use crate::data::model::{LocatedReading, MetadataRecord, Normalization, NormalizedFile, LOCATION_FIELD};
use crate::data::normalize::normalize_file;

// ---------------------------------------------------------------------------
// Run state
// ---------------------------------------------------------------------------

/// What happened to a single input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Processed { rows: usize },
    /// Metadata kept, readings withheld (no timestamp column).
    Partial,
    Missing,
    Failed,
}

/// Per-run bookkeeping, in processing order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub processed: Vec<String>,
    pub partial: Vec<String>,
    pub missing: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

impl RunReport {
    /// Whether any input did not fully contribute readings.
    pub fn has_skips(&self) -> bool {
        !self.missing.is_empty() || !self.failed.is_empty() || !self.partial.is_empty()
    }

    pub fn skip_summary(&self) -> String {
        format!(
            "{} file(s) missing, {} failed, {} partial",
            self.missing.len(),
            self.failed.len(),
            self.partial.len()
        )
    }
}

/// Accumulates normalized files between `new` and `finish`.
pub struct Aggregator {
    device: DeviceConfig,
    on_partial: PartialPolicy,
    metadata: Vec<MetadataRecord>,
    readings: Vec<LocatedReading>,
    report: RunReport,
}

impl Aggregator {
    pub fn new(device: DeviceConfig, on_partial: PartialPolicy) -> Self {
        Self {
            device,
            on_partial,
            metadata: Vec::new(),
            readings: Vec::new(),
            report: RunReport::default(),
        }
    }

    /// Normalize one file and fold it in.
    ///
    /// Missing files and per-file normalization errors are logged and
    /// skipped. Only a partial result under [`PartialPolicy::Fail`] aborts.
    pub fn ingest(&mut self, path: &Path) -> Result<IngestOutcome> {
        if !path.exists() {
            warn!("File not found: {}", path.display());
            self.report.missing.push(path.to_path_buf());
            return Ok(IngestOutcome::Missing);
        }

        match normalize_file(path, &self.device) {
            Ok(file) => self.add(file),
            Err(e) => {
                error!("Skipping {}: {e}", path.display());
                self.report.failed.push((path.to_path_buf(), e.to_string()));
                Ok(IngestOutcome::Failed)
            }
        }
    }

    /// Fold an already-normalized file in.
    pub fn add(&mut self, file: NormalizedFile) -> Result<IngestOutcome> {
        let NormalizedFile {
            location,
            family,
            metadata,
            normalization,
        } = file;

        match normalization {
            Normalization::Complete(rows) => {
                let count = rows.len();
                self.readings.extend(rows.into_iter().map(|reading| LocatedReading {
                    location: location.clone(),
                    reading,
                }));
                self.metadata.push(metadata);
                info!("Processed: {location} ({family}, {count} readings)");
                self.report.processed.push(location);
                Ok(IngestOutcome::Processed { rows: count })
            }
            Normalization::Partial { missing_column, .. } => match self.on_partial {
                PartialPolicy::Fail => {
                    bail!("{location}: expected column '{missing_column}' not found")
                }
                PartialPolicy::Skip => {
                    warn!("{location}: column '{missing_column}' not found, readings not normalized");
                    self.metadata.push(metadata);
                    self.report.partial.push(location);
                    Ok(IngestOutcome::Partial)
                }
            },
        }
    }

    pub fn finish(self) -> CombinedTables {
        CombinedTables {
            metadata: MetadataTable::from_records(&self.metadata),
            readings: self.readings,
            report: self.report,
        }
    }
}

// ---------------------------------------------------------------------------
// Combined output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct CombinedTables {
    pub metadata: MetadataTable,
    pub readings: Vec<LocatedReading>,
    pub report: RunReport,
}

/// One row per file; columns are the union of all keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataTable {
    pub columns: Vec<String>,
    /// `None` where a file lacks the column.
    pub rows: Vec<Vec<Option<String>>>,
}

impl MetadataTable {
    /// Columns appear in first-seen order with `location` moved last.
    ///
    /// Plain first-seen order would put `location` ahead of keys that only
    /// later files carry; pinning it last keeps the table shape stable.
    pub fn from_records(records: &[MetadataRecord]) -> Self {
        let mut columns: Vec<String> = Vec::new();
        for key in records.iter().flat_map(|r| r.keys()) {
            if key != LOCATION_FIELD && !columns.iter().any(|c| c == key) {
                columns.push(key.to_string());
            }
        }
        if records.iter().any(|r| r.get(LOCATION_FIELD).is_some()) {
            columns.push(LOCATION_FIELD.to_string());
        }

        let rows = records
            .iter()
            .map(|r| columns.iter().map(|c| r.get(c).map(str::to_string)).collect())
            .collect();

        MetadataTable { columns, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
