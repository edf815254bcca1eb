use std::path::Path;

use csv::{ReaderBuilder, Trim};
use log::{debug, warn};

use super::model::{is_placeholder_column, MetadataRecord, RawTable};
use crate::error::NormalizeError;

/// A file split into its header block and its table section.
#[derive(Debug, Clone, PartialEq)]
pub struct RawExport {
    pub metadata: MetadataRecord,
    pub table: RawTable,
}

// ---------------------------------------------------------------------------
// Public entry-point
// ---------------------------------------------------------------------------

/// Read an export file fully into memory and split it.
///
/// Layout:
/// ```text
///  line 1..=N   key: value          (metadata block, other lines ignored)
///  line N+1     header,header,...   (table header)
///  line N+2..   value,value,...
/// ```
pub fn load_export(path: &Path, metadata_lines: usize) -> Result<RawExport, NormalizeError> {
    let text = std::fs::read_to_string(path).map_err(|source| NormalizeError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_export(&text, metadata_lines)
}

/// Same as [`load_export`] for text already in memory.
pub fn parse_export(text: &str, metadata_lines: usize) -> Result<RawExport, NormalizeError> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let (block, body) = split_metadata_block(text, metadata_lines);

    let metadata = parse_metadata_block(block);
    if metadata.is_empty() {
        warn!("no key: value fields in the {metadata_lines}-line metadata block");
    }
    let table = parse_table(body, metadata_lines)?;
    if table.is_empty() {
        warn!("table has a header but no data rows");
    }
    debug!(
        "parsed {} metadata fields, {} columns, {} rows",
        metadata.len(),
        table.headers.len(),
        table.len()
    );

    Ok(RawExport { metadata, table })
}

// ---------------------------------------------------------------------------
// Metadata block
// ---------------------------------------------------------------------------

fn split_metadata_block(text: &str, lines: usize) -> (&str, &str) {
    let mut offset = 0;
    for _ in 0..lines {
        match text[offset..].find('\n') {
            Some(i) => offset += i + 1,
            None => {
                offset = text.len();
                break;
            }
        }
    }
    text.split_at(offset)
}

/// Keep only `key: value` lines, split at the first colon.
fn parse_metadata_block(block: &str) -> MetadataRecord {
    let mut metadata = MetadataRecord::new();
    for line in block.lines() {
        if let Some((key, value)) = line.trim().split_once(':') {
            metadata.insert(key.trim(), value.trim());
        }
    }
    metadata
}

// ---------------------------------------------------------------------------
// Table section
// ---------------------------------------------------------------------------

fn parse_table(body: &str, metadata_lines: usize) -> Result<RawTable, NormalizeError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(body.as_bytes());

    let all_headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    if all_headers.is_empty() {
        return Err(NormalizeError::EmptyTable {
            lines: metadata_lines,
        });
    }

    // Column indices that carry a real label.
    let kept: Vec<usize> = all_headers
        .iter()
        .enumerate()
        .filter(|(_, h)| !is_placeholder_column(h))
        .map(|(i, _)| i)
        .collect();
    let dropped = all_headers.len() - kept.len();
    if dropped > 0 {
        debug!("dropping {dropped} unlabeled column(s)");
    }

    let headers = kept.iter().map(|&i| all_headers[i].clone()).collect();
    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result?;
        let row = kept
            .iter()
            .map(|&i| record.get(i).unwrap_or("").to_string())
            .collect();
        rows.push(row);
    }

    Ok(RawTable { headers, rows })
}
