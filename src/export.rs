use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::array::{ArrayRef, Float64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use arrow::util::pretty::pretty_format_batches;
use clap::ValueEnum;
use log::info;
use parquet::arrow::ArrowWriter;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::aggregate::{CombinedTables, MetadataTable};
use crate::data::model::{LocatedReading, DATE_FIELD, DECIBEL_FIELD, LOCATION_FIELD, TIME_FIELD};

pub const METADATA_STEM: &str = "all_locations_metadata";
pub const READINGS_STEM: &str = "all_locations_raw_data";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Csv,
    Json,
    Parquet,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Csv => "csv",
            OutputFormat::Json => "json",
            OutputFormat::Parquet => "parquet",
        }
    }
}

/// Where the two tables were written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportPaths {
    pub metadata: PathBuf,
    pub readings: PathBuf,
}

// ---------------------------------------------------------------------------
// Public entry-point
// ---------------------------------------------------------------------------

/// Write both combined tables into `dir`.
pub fn export_tables(tables: &CombinedTables, dir: &Path, format: OutputFormat) -> Result<ExportPaths> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let paths = ExportPaths {
        metadata: dir.join(format!("{METADATA_STEM}.{}", format.extension())),
        readings: dir.join(format!("{READINGS_STEM}.{}", format.extension())),
    };

    match format {
        OutputFormat::Csv => {
            write_metadata_csv(&tables.metadata, create(&paths.metadata)?)?;
            write_readings_csv(&tables.readings, create(&paths.readings)?)?;
        }
        OutputFormat::Json => {
            write_json(&metadata_json(&tables.metadata), create(&paths.metadata)?)?;
            write_json(&readings_json(&tables.readings)?, create(&paths.readings)?)?;
        }
        OutputFormat::Parquet => {
            write_parquet(&metadata_batch(&tables.metadata)?, &paths.metadata)?;
            write_parquet(&readings_batch(&tables.readings)?, &paths.readings)?;
        }
    }

    info!("Exported all metadata → {}", paths.metadata.display());
    info!("Exported combined raw data → {}", paths.readings.display());
    Ok(paths)
}

/// Render the first `limit` readings as a text table.
pub fn preview(readings: &[LocatedReading], limit: usize) -> Result<String> {
    let batch = readings_batch(&readings[..limit.min(readings.len())])?;
    Ok(pretty_format_batches(&[batch])
        .context("formatting preview")?
        .to_string())
}

fn create(path: &Path) -> Result<BufWriter<File>> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    Ok(BufWriter::new(file))
}

// ---------------------------------------------------------------------------
// CSV
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct ReadingRecord<'a> {
    #[serde(rename = "Recorded.Value..dBA.")]
    decibels: Option<f64>,
    #[serde(rename = "Date")]
    date: Option<String>,
    #[serde(rename = "Time")]
    time: Option<String>,
    location: &'a str,
}

impl<'a> From<&'a LocatedReading> for ReadingRecord<'a> {
    fn from(r: &'a LocatedReading) -> Self {
        ReadingRecord {
            decibels: r.reading.decibels,
            date: r.reading.date_string(),
            time: r.reading.time_string(),
            location: &r.location,
        }
    }
}

fn write_readings_csv<W: Write>(readings: &[LocatedReading], out: W) -> Result<()> {
    // Header written by hand so an empty table still has one.
    let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(out);
    writer.write_record([DECIBEL_FIELD, DATE_FIELD, TIME_FIELD, LOCATION_FIELD])?;
    for r in readings {
        writer.serialize(ReadingRecord::from(r))?;
    }
    writer.flush().context("writing readings CSV")?;
    Ok(())
}

fn write_metadata_csv<W: Write>(table: &MetadataTable, out: W) -> Result<()> {
    let mut writer = csv::Writer::from_writer(out);
    writer.write_record(&table.columns)?;
    for row in &table.rows {
        writer.write_record(row.iter().map(|c| c.as_deref().unwrap_or("")))?;
    }
    writer.flush().context("writing metadata CSV")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// JSON (records-oriented)
// ---------------------------------------------------------------------------

fn metadata_json(table: &MetadataTable) -> JsonValue {
    let records = table
        .rows
        .iter()
        .map(|row| {
            let obj: Map<String, JsonValue> = table
                .columns
                .iter()
                .zip(row)
                .map(|(col, cell)| {
                    let value = cell.clone().map(JsonValue::String).unwrap_or(JsonValue::Null);
                    (col.clone(), value)
                })
                .collect();
            JsonValue::Object(obj)
        })
        .collect();
    JsonValue::Array(records)
}

fn readings_json(readings: &[LocatedReading]) -> Result<JsonValue> {
    let records = readings
        .iter()
        .map(|r| serde_json::to_value(ReadingRecord::from(r)))
        .collect::<Result<Vec<_>, _>>()
        .context("serializing readings")?;
    Ok(JsonValue::Array(records))
}

fn write_json<W: Write>(value: &JsonValue, mut out: W) -> Result<()> {
    serde_json::to_writer_pretty(&mut out, value).context("serializing JSON")?;
    out.flush().context("writing JSON")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Arrow / Parquet
// ---------------------------------------------------------------------------

fn readings_batch(readings: &[LocatedReading]) -> Result<RecordBatch> {
    let schema = Arc::new(Schema::new(vec![
        Field::new(DECIBEL_FIELD, DataType::Float64, true),
        Field::new(DATE_FIELD, DataType::Utf8, true),
        Field::new(TIME_FIELD, DataType::Utf8, true),
        Field::new(LOCATION_FIELD, DataType::Utf8, false),
    ]));

    let decibels = Float64Array::from(readings.iter().map(|r| r.reading.decibels).collect::<Vec<_>>());
    let dates = StringArray::from(readings.iter().map(|r| r.reading.date_string()).collect::<Vec<_>>());
    let times = StringArray::from(readings.iter().map(|r| r.reading.time_string()).collect::<Vec<_>>());
    let locations = StringArray::from(readings.iter().map(|r| r.location.as_str()).collect::<Vec<_>>());

    let columns: Vec<ArrayRef> = vec![
        Arc::new(decibels),
        Arc::new(dates),
        Arc::new(times),
        Arc::new(locations),
    ];
    RecordBatch::try_new(schema, columns).context("building readings batch")
}

fn metadata_batch(table: &MetadataTable) -> Result<RecordBatch> {
    let schema = Arc::new(Schema::new(
        table
            .columns
            .iter()
            .map(|c| Field::new(c, DataType::Utf8, true))
            .collect::<Vec<_>>(),
    ));
    if table.columns.is_empty() {
        return Ok(RecordBatch::new_empty(schema));
    }

    let columns: Vec<ArrayRef> = (0..table.columns.len())
        .map(|i| {
            let cells: Vec<Option<&str>> = table.rows.iter().map(|row| row[i].as_deref()).collect();
            Arc::new(StringArray::from(cells)) as ArrayRef
        })
        .collect();
    RecordBatch::try_new(schema, columns).context("building metadata batch")
}

fn write_parquet(batch: &RecordBatch, path: &Path) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None).context("creating parquet writer")?;
    writer.write(batch).context("writing parquet batch")?;
    writer.close().context("closing parquet writer")?;
    Ok(())
}
