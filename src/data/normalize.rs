use std::path::Path;

use chrono::{Duration, NaiveDate, NaiveDateTime};
use log::{debug, info, warn};

use super::loader::{load_export, RawExport};
use super::model::{
    location_for, DeviceFamily, MetadataRecord, Normalization, NormalizedFile, RawTable,
    ReadingRow, LOCATION_FIELD,
};
use crate::config::DeviceConfig;
use crate::error::NormalizeError;

/// Layout accepted for the offset-clock `Start Time` metadata field.
const START_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Layouts tried, in order, for wall-clock timestamp cells.
const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

// ---------------------------------------------------------------------------
// Public entry-point
// ---------------------------------------------------------------------------

/// Load one export and normalize it according to its device family.
///
/// The returned metadata carries the injected `location` key.
pub fn normalize_file(path: &Path, config: &DeviceConfig) -> Result<NormalizedFile, NormalizeError> {
    let family = DeviceFamily::detect(path, &config.offset_markers);
    let location = location_for(path);
    debug!("{} detected as {family} export", path.display());

    let RawExport {
        mut metadata,
        table,
    } = load_export(path, config.metadata_lines)?;
    let normalization = normalize_table(family, &metadata, table, config)?;

    metadata.insert(LOCATION_FIELD, location.clone());
    Ok(NormalizedFile {
        location,
        family,
        metadata,
        normalization,
    })
}

/// Project a raw table onto the canonical fields.
pub fn normalize_table(
    family: DeviceFamily,
    metadata: &MetadataRecord,
    table: RawTable,
    config: &DeviceConfig,
) -> Result<Normalization, NormalizeError> {
    match family {
        DeviceFamily::OffsetClock => {
            normalize_offset_clock(metadata, &table, config).map(Normalization::Complete)
        }
        DeviceFamily::WallClock => normalize_wall_clock(table, config),
    }
}

// ---------------------------------------------------------------------------
// Offset-clock devices
// ---------------------------------------------------------------------------

fn normalize_offset_clock(
    metadata: &MetadataRecord,
    table: &RawTable,
    config: &DeviceConfig,
) -> Result<Vec<ReadingRow>, NormalizeError> {
    let start = parse_start_time(metadata, &config.start_time_key)?;
    let decibel_idx = required_column(table, &config.decibel_column)?;
    let offset_idx = required_column(table, &config.timestamp_column)?;

    let (rows, nulled) = project_rows(table, decibel_idx, offset_idx, |cell| {
        parse_offset(cell).and_then(|d| start.checked_add_signed(d))
    });
    nulled.log("offsets", rows.len());
    Ok(rows)
}

fn parse_start_time(metadata: &MetadataRecord, key: &str) -> Result<NaiveDateTime, NormalizeError> {
    let value = metadata
        .get(key)
        .ok_or_else(|| NormalizeError::MissingStartTime {
            key: key.to_string(),
        })?;
    let invalid = || NormalizeError::InvalidStartTime {
        key: key.to_string(),
        value: value.to_string(),
    };

    // `%.f` alone would accept a missing fraction or nanosecond digits;
    // the device always writes a dot followed by up to six digits.
    let (_, fraction) = value.rsplit_once('.').ok_or_else(invalid)?;
    if fraction.is_empty() || fraction.len() > 6 || !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    NaiveDateTime::parse_from_str(value, START_TIME_FORMAT).map_err(|_| invalid())
}

/// Parse an elapsed `M:SS.s` offset into `minutes + (seconds mod 60)`.
///
/// Anything other than exactly two finite numeric parts yields `None`.
pub fn parse_offset(s: &str) -> Option<Duration> {
    let (minutes, seconds) = s.trim().split_once(':')?;
    if seconds.contains(':') {
        return None;
    }
    let minutes: f64 = minutes.trim().parse().ok()?;
    let seconds: f64 = seconds.trim().parse().ok()?;
    if !minutes.is_finite() || !seconds.is_finite() {
        return None;
    }

    let micros = (minutes * 60.0 + seconds.rem_euclid(60.0)) * 1_000_000.0;
    if micros.abs() >= i64::MAX as f64 {
        return None;
    }
    Some(Duration::microseconds(micros.round() as i64))
}

// ---------------------------------------------------------------------------
// Wall-clock devices
// ---------------------------------------------------------------------------

fn normalize_wall_clock(table: RawTable, config: &DeviceConfig) -> Result<Normalization, NormalizeError> {
    let Some(timestamp_idx) = table.column_index(&config.timestamp_column) else {
        return Ok(Normalization::Partial {
            table,
            missing_column: config.timestamp_column.clone(),
        });
    };
    let decibel_idx = required_column(&table, &config.decibel_column)?;

    let (rows, nulled) = project_rows(&table, decibel_idx, timestamp_idx, parse_timestamp);
    nulled.log("timestamps", rows.len());
    Ok(Normalization::Complete(rows))
}

/// Lenient absolute timestamp parsing; unrecognised input yields `None`.
pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

fn required_column(table: &RawTable, column: &str) -> Result<usize, NormalizeError> {
    table
        .column_index(column)
        .ok_or_else(|| NormalizeError::MissingColumn {
            column: column.to_string(),
        })
}

fn parse_decibels(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().filter(|v| !v.is_nan())
}

/// Cells turned into nulls while projecting rows.
#[derive(Debug, Default, PartialEq, Eq)]
struct NulledCells {
    clock: usize,
    /// Non-empty dBA cells that were not numeric.
    decibels: usize,
}

impl NulledCells {
    fn log(&self, clock_kind: &str, total: usize) {
        if self.clock > 0 {
            info!("{} of {total} {clock_kind} could not be parsed", self.clock);
        }
        if self.decibels > 0 {
            warn!("{} of {total} dBA values are not numeric and were dropped", self.decibels);
        }
    }
}

/// Project every row onto (dBA, timestamp), keeping row order.
fn project_rows<F>(
    table: &RawTable,
    decibel_idx: usize,
    clock_idx: usize,
    clock: F,
) -> (Vec<ReadingRow>, NulledCells)
where
    F: Fn(&str) -> Option<NaiveDateTime>,
{
    let mut nulled = NulledCells::default();
    let rows = table
        .rows
        .iter()
        .map(|row| {
            let timestamp = clock(&row[clock_idx]);
            if timestamp.is_none() {
                nulled.clock += 1;
            }
            let cell = &row[decibel_idx];
            let decibels = parse_decibels(cell);
            if decibels.is_none() && !cell.trim().is_empty() {
                nulled.decibels += 1;
            }
            ReadingRow::new(decibels, timestamp)
        })
        .collect();
    (rows, nulled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const DBA: &str = "Recorded Value (dBA)";
    const STAMP: &str = "Time Stamp (yyyy-MM-dd HH:mm:ss.SSS)";

    fn header_block(start_time: Option<&str>) -> String {
        let mut lines = vec![
            "Device Name: SLM".to_string(),
            "Model Number: 8928".to_string(),
        ];
        if let Some(start) = start_time {
            lines.push(format!("Start Time: {start}"));
        }
        while lines.len() < 8 {
            lines.push(String::new());
        }
        lines.join("\n") + "\n"
    }

    fn write_export(dir: &TempDir, name: &str, start_time: Option<&str>, table: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, header_block(start_time) + table).unwrap();
        path
    }

    fn complete(file: &NormalizedFile) -> &[ReadingRow] {
        match &file.normalization {
            Normalization::Complete(rows) => rows,
            other => panic!("expected complete normalization, got {other:?}"),
        }
    }

    fn cells(row: &ReadingRow) -> (Option<f64>, Option<String>, Option<String>) {
        (row.decibels, row.date_string(), row.time_string())
    }

    #[test]
    fn offset_clock_example() {
        let dir = TempDir::new().unwrap();
        let path = write_export(
            &dir,
            "target_section.csv",
            Some("2024-06-01 18:00:00.000000"),
            &format!("{DBA},{STAMP},\n62.3,05:30.0,\n"),
        );

        let file = normalize_file(&path, &DeviceConfig::default()).unwrap();
        assert_eq!(file.family, DeviceFamily::OffsetClock);
        assert_eq!(file.location, "target_section");
        assert_eq!(file.metadata.get(LOCATION_FIELD), Some("target_section"));

        let rows = complete(&file);
        assert_eq!(rows.len(), 1);
        assert_eq!(
            cells(&rows[0]),
            (Some(62.3), Some("2024-06-01".into()), Some("18:05:30.000".into()))
        );
    }

    #[test]
    fn wall_clock_example() {
        let dir = TempDir::new().unwrap();
        let path = write_export(
            &dir,
            "SZB_back_area.csv",
            None,
            &format!("{STAMP},{DBA}\n2024-06-01 18:05:30.123,58.1\n"),
        );

        let file = normalize_file(&path, &DeviceConfig::default()).unwrap();
        assert_eq!(file.family, DeviceFamily::WallClock);
        assert_eq!(
            cells(&complete(&file)[0]),
            (Some(58.1), Some("2024-06-01".into()), Some("18:05:30.123".into()))
        );
    }

    #[test]
    fn offset_arithmetic_wraps_seconds_and_crosses_midnight() {
        let dir = TempDir::new().unwrap();
        let path = write_export(
            &dir,
            "target_section.csv",
            Some("2024-06-01 23:59:00.250000"),
            &format!("{DBA},{STAMP}\n50,29:14.1\n51,0:75.5\n52,1.5:00\n"),
        );

        let file = normalize_file(&path, &DeviceConfig::default()).unwrap();
        let rows = complete(&file);
        // 23:59:00.25 + 29 min + 14.1 s
        assert_eq!(rows[0].date_string().as_deref(), Some("2024-06-02"));
        assert_eq!(rows[0].time_string().as_deref(), Some("00:28:14.350"));
        // 75.5 mod 60 = 15.5
        assert_eq!(rows[1].time_string().as_deref(), Some("23:59:15.750"));
        // fractional minutes
        assert_eq!(rows[2].time_string().as_deref(), Some("00:00:30.250"));
    }

    #[test]
    fn bad_offsets_keep_the_row_with_null_time() {
        let dir = TempDir::new().unwrap();
        let path = write_export(
            &dir,
            "target_section.csv",
            Some("2024-06-01 18:00:00.000000"),
            &format!("{DBA},{STAMP}\n60.1,garbage\n60.2,\n60.3,1:2:3\n60.4,nan:00\n60.5,00:01.0\n"),
        );

        let file = normalize_file(&path, &DeviceConfig::default()).unwrap();
        let rows = complete(&file);
        assert_eq!(rows.len(), 5);
        for row in &rows[..4] {
            assert!(row.date.is_none() && row.time.is_none());
        }
        let values: Vec<_> = rows.iter().map(|r| r.decibels).collect();
        assert_eq!(values, vec![Some(60.1), Some(60.2), Some(60.3), Some(60.4), Some(60.5)]);
        assert_eq!(rows[4].time_string().as_deref(), Some("18:00:01.000"));
    }

    #[test]
    fn missing_start_time_is_fatal() {
        let dir = TempDir::new().unwrap();
        let path = write_export(
            &dir,
            "target_section.csv",
            None,
            &format!("{DBA},{STAMP}\n62.3,05:30.0\n"),
        );

        let err = normalize_file(&path, &DeviceConfig::default()).unwrap_err();
        assert!(matches!(err, NormalizeError::MissingStartTime { ref key } if key == "Start Time"));
    }

    #[test]
    fn malformed_start_time_is_fatal() {
        let dir = TempDir::new().unwrap();
        let path = write_export(
            &dir,
            "target_section.csv",
            Some("June 1st, 6pm"),
            &format!("{DBA},{STAMP}\n62.3,05:30.0\n"),
        );

        let err = normalize_file(&path, &DeviceConfig::default()).unwrap_err();
        assert!(matches!(err, NormalizeError::InvalidStartTime { .. }));
    }

    #[test]
    fn unparseable_wall_clock_timestamps_become_null() {
        let dir = TempDir::new().unwrap();
        let path = write_export(
            &dir,
            "22nd_street_construction.csv",
            None,
            &format!("{DBA},{STAMP}\n70.2,not a time\n71.0,2024-06-01T09:00:00.5\n,2024/06/01 09:00:01\n"),
        );

        let file = normalize_file(&path, &DeviceConfig::default()).unwrap();
        let rows = complete(&file);
        assert_eq!(rows.len(), 3);
        assert_eq!(cells(&rows[0]), (Some(70.2), None, None));
        assert_eq!(rows[1].time_string().as_deref(), Some("09:00:00.500"));
        assert_eq!(cells(&rows[2]), (None, Some("2024-06-01".into()), Some("09:00:01.000".into())));
    }

    #[test]
    fn wall_clock_without_timestamp_column_is_partial() {
        let dir = TempDir::new().unwrap();
        let path = write_export(&dir, "SZB_back_area.csv", None, &format!("{DBA},Other\n55.0,x\n"));

        let file = normalize_file(&path, &DeviceConfig::default()).unwrap();
        match file.normalization {
            Normalization::Partial {
                table,
                missing_column,
            } => {
                assert_eq!(missing_column, STAMP);
                assert_eq!(table.headers, vec![DBA, "Other"]);
                assert_eq!(table.len(), 1);
            }
            other => panic!("expected partial normalization, got {other:?}"),
        }
    }

    #[test]
    fn missing_decibel_column_is_fatal() {
        let dir = TempDir::new().unwrap();
        let path = write_export(&dir, "SZB_back_area.csv", None, &format!("{STAMP}\n2024-06-01 18:05:30.123\n"));

        let err = normalize_file(&path, &DeviceConfig::default()).unwrap_err();
        assert!(matches!(err, NormalizeError::MissingColumn { ref column } if column == DBA));
    }

    #[test]
    fn normalizing_twice_is_identical() {
        let dir = TempDir::new().unwrap();
        let path = write_export(
            &dir,
            "target_section.csv",
            Some("2024-06-01 18:00:00.000000"),
            &format!("{DBA},{STAMP}\n62.3,05:30.0\n63.1,bad\n"),
        );

        let config = DeviceConfig::default();
        let first = normalize_file(&path, &config).unwrap();
        let second = normalize_file(&path, &config).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn start_time_needs_a_short_fraction() {
        let mut meta = MetadataRecord::new();
        for value in [
            "2024-06-01 18:00:00",
            "2024-06-01 18:00:00.123456789",
            "2024-06-01 18:00:00.",
            "2024-06-01 18:00:00.12a",
        ] {
            meta.insert("Start Time", value);
            let err = parse_start_time(&meta, "Start Time").unwrap_err();
            assert!(
                matches!(err, NormalizeError::InvalidStartTime { value: ref v, .. } if v == value),
                "{value} should be rejected, got {err:?}"
            );
        }

        meta.insert("Start Time", "2024-06-01 18:00:00.5");
        let start = parse_start_time(&meta, "Start Time").unwrap();
        assert_eq!(start.format("%H:%M:%S%.3f").to_string(), "18:00:00.500");
    }

    #[test]
    fn start_time_without_fraction_fails_the_file() {
        let dir = TempDir::new().unwrap();
        let path = write_export(
            &dir,
            "target_section.csv",
            Some("2024-06-01 18:00:00"),
            &format!("{DBA},{STAMP}\n62.3,05:30.0\n"),
        );

        let err = normalize_file(&path, &DeviceConfig::default()).unwrap_err();
        assert!(matches!(err, NormalizeError::InvalidStartTime { .. }));
    }

    #[test]
    fn offset_clock_without_offset_column_is_fatal() {
        let dir = TempDir::new().unwrap();
        let path = write_export(
            &dir,
            "target_section.csv",
            Some("2024-06-01 18:00:00.000000"),
            &format!("{DBA},\n62.3,\n"),
        );

        let err = normalize_file(&path, &DeviceConfig::default()).unwrap_err();
        assert!(matches!(err, NormalizeError::MissingColumn { ref column } if column == STAMP));
    }

    #[test]
    fn offset_clock_without_decibel_column_is_fatal() {
        let dir = TempDir::new().unwrap();
        let path = write_export(
            &dir,
            "target_section.csv",
            Some("2024-06-01 18:00:00.000000"),
            &format!("{STAMP}\n05:30.0\n"),
        );

        let err = normalize_file(&path, &DeviceConfig::default()).unwrap_err();
        assert!(matches!(err, NormalizeError::MissingColumn { ref column } if column == DBA));
    }

    #[test]
    fn non_numeric_decibels_are_counted() {
        let table = RawTable {
            headers: vec![DBA.into(), STAMP.into()],
            rows: vec![
                vec!["58.1".into(), "2024-06-01 18:05:30.123".into()],
                vec!["HI".into(), "2024-06-01 18:05:30.223".into()],
                vec!["".into(), "later".into()],
            ],
        };

        let (rows, nulled) = project_rows(&table, 0, 1, parse_timestamp);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1].decibels, None);
        assert_eq!(rows[1].time_string().as_deref(), Some("18:05:30.223"));
        // the empty cell is missing data, not a dropped value
        assert_eq!(nulled, NulledCells { clock: 1, decibels: 1 });
    }

    #[test]
    fn parse_offset_formula() {
        assert_eq!(parse_offset("05:30.0"), Some(Duration::seconds(330)));
        assert_eq!(parse_offset("1:-1"), Some(Duration::seconds(119)));
        assert_eq!(parse_offset("10"), None);
        assert_eq!(parse_offset("a:1"), None);
        assert_eq!(parse_offset("1:inf"), None);
    }
}
