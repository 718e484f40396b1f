//! Typed tabular arrays built from trackpoint columns.

use std::io::Write;
use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::activity::SampleColumns;
use crate::config::ParseOptions;
use crate::trackpoint::read_trackpoint;
use crate::xml::Document;
use crate::TcxError;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Field {
    Lon,
    Lat,
    Altitude,
    Distance,
    Time,
    HeartRate,
    Elapsed,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum FieldKind {
    Float,
    Timestamp,
    Integer,
}

impl Field {
    pub fn name(self) -> &'static str {
        match self {
            Field::Lon => "lon",
            Field::Lat => "lat",
            Field::Altitude => "altitude",
            Field::Distance => "distance",
            Field::Time => "time",
            Field::HeartRate => "hr_bpm",
            Field::Elapsed => "dt",
        }
    }

    pub fn kind(self) -> FieldKind {
        match self {
            Field::Lon | Field::Lat | Field::Altitude | Field::Distance | Field::Elapsed => {
                FieldKind::Float
            }
            Field::Time => FieldKind::Timestamp,
            Field::HeartRate => FieldKind::Integer,
        }
    }
}

/// Schema of arrays built from one activity.
pub const ACTIVITY_SCHEMA: [Field; 5] = [
    Field::Lon,
    Field::Lat,
    Field::Altitude,
    Field::Distance,
    Field::Time,
];

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub lon: f64,
    pub lat: f64,
    pub altitude: f64,
    pub distance: f64,
    pub time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hr_bpm: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dt: Option<f64>,
}

/// Fixed-schema rows, one per complete trackpoint. Fields outside
/// `schema` are `None` on every record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TabularArray {
    schema: Vec<Field>,
    records: Vec<Record>,
}

impl TabularArray {
    pub fn schema(&self) -> &[Field] {
        &self.schema
    }

    pub fn has_field(&self, field: Field) -> bool {
        self.schema.contains(&field)
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn first(&self) -> Option<&Record> {
        self.records.first()
    }

    pub fn last(&self) -> Option<&Record> {
        self.records.last()
    }

    /// Numeric column as an array. `None` for `Time` and for fields outside
    /// the schema; heart-rate gaps become NaN.
    pub fn column(&self, field: Field) -> Option<Array1<f64>> {
        if !self.has_field(field) {
            return None;
        }
        let values = self.records.iter().map(|r| match field {
            Field::Lon => Some(r.lon),
            Field::Lat => Some(r.lat),
            Field::Altitude => Some(r.altitude),
            Field::Distance => Some(r.distance),
            Field::HeartRate => Some(r.hr_bpm.map(f64::from).unwrap_or(f64::NAN)),
            Field::Elapsed => r.dt,
            Field::Time => None,
        });
        values.collect::<Option<Vec<f64>>>().map(Array1::from_vec)
    }

    /// Column minus its first value.
    pub fn offsets(&self, field: Field) -> Option<Array1<f64>> {
        let column = self.column(field)?;
        let base = *column.get(0)?;
        Some(column - base)
    }

    /// Seconds since the first record, whether or not `dt` is in the schema.
    pub fn elapsed_seconds(&self) -> Array1<f64> {
        let Some(t0) = self.first().map(|r| r.time) else {
            return Array1::zeros(0);
        };
        self.records
            .iter()
            .map(|r| seconds_between(t0, r.time))
            .collect()
    }

    /// CSV with one column per schema field, timestamps in RFC 3339.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), TcxError> {
        let mut writer = csv::Writer::from_writer(writer);
        writer.write_record(self.schema.iter().map(|f| f.name()))?;
        for record in &self.records {
            let row: Vec<String> = self
                .schema
                .iter()
                .map(|&field| match field {
                    Field::Lon => record.lon.to_string(),
                    Field::Lat => record.lat.to_string(),
                    Field::Altitude => record.altitude.to_string(),
                    Field::Distance => record.distance.to_string(),
                    Field::Time => record.time.to_rfc3339_opts(SecondsFormat::AutoSi, true),
                    Field::HeartRate => record.hr_bpm.map(|v| v.to_string()).unwrap_or_default(),
                    Field::Elapsed => record.dt.map(|v| v.to_string()).unwrap_or_default(),
                })
                .collect();
            writer.write_record(&row)?;
        }
        writer.flush()?;
        Ok(())
    }
}

fn seconds_between(t0: DateTime<Utc>, t: DateTime<Utc>) -> f64 {
    (t - t0).num_milliseconds() as f64 / 1000.0
}

fn parse_time(text: &str) -> Result<DateTime<Utc>, TcxError> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| TcxError::InvalidTimestamp(text.to_string()))
}

fn check_len(field: Field, expected: usize, actual: usize) -> Result<(), TcxError> {
    if expected != actual {
        return Err(TcxError::ShapeMismatch {
            field: field.name(),
            expected,
            actual,
        });
    }
    Ok(())
}

/// Transpose per-field sequences into records with the activity schema.
pub fn columns_to_array(columns: &SampleColumns) -> Result<TabularArray, TcxError> {
    let n = columns.time.len();
    check_len(Field::Lon, n, columns.lon.len())?;
    check_len(Field::Lat, n, columns.lat.len())?;
    check_len(Field::Altitude, n, columns.altitude.len())?;
    check_len(Field::Distance, n, columns.distance.len())?;

    let mut records = Vec::with_capacity(n);
    for i in 0..n {
        records.push(Record {
            lon: columns.lon[i],
            lat: columns.lat[i],
            altitude: columns.altitude[i],
            distance: columns.distance[i],
            time: parse_time(&columns.time[i])?,
            hr_bpm: None,
            dt: None,
        });
    }
    Ok(TabularArray {
        schema: ACTIVITY_SCHEMA.to_vec(),
        records,
    })
}

/// Whole-file parse with default options.
pub fn parse_file(path: &Path) -> Result<TabularArray, TcxError> {
    parse_file_with(path, &ParseOptions::default())
}

pub fn parse_file_with(path: &Path, opts: &ParseOptions) -> Result<TabularArray, TcxError> {
    let doc = Document::open(path, opts)?;
    let array = parse_document(&doc)?;
    info!(
        "Parsed {}: {} records ({})",
        path.display(),
        array.len(),
        array
            .schema()
            .iter()
            .map(|f| f.name())
            .collect::<Vec<_>>()
            .join(", ")
    );
    Ok(array)
}

/// Every trackpoint in the document, adding `dt` and `hr_bpm`. Incomplete
/// trackpoints are skipped with a warning; an all-empty `hr_bpm` column is
/// left out of the schema.
pub fn parse_document(doc: &Document) -> Result<TabularArray, TcxError> {
    let tags = doc.tags();
    let mut rows: Vec<(Record, Option<u32>)> = Vec::new();
    let mut skipped = 0usize;

    for tp in doc.descendants_named("Trackpoint") {
        let fields = read_trackpoint(tp, tags)?;
        let (Some(time), Some(distance), Some(altitude), Some(lat), Some(lon)) = (
            fields.time.as_deref(),
            fields.distance,
            fields.altitude,
            fields.lat,
            fields.lon,
        ) else {
            warn!("Skipped trackpoint [{}]", tp.describe_children());
            skipped += 1;
            continue;
        };
        let record = Record {
            lon,
            lat,
            altitude,
            distance,
            time: parse_time(time)?,
            hr_bpm: None,
            dt: None,
        };
        rows.push((record, fields.hr_bpm));
    }

    let t0 = rows.first().map(|(r, _)| r.time).ok_or(TcxError::NoTrackpoints)?;
    let has_hr = rows.iter().any(|(_, hr)| hr.is_some());
    if skipped > 0 {
        warn!("Skipped {} incomplete trackpoints", skipped);
    }

    let mut schema = vec![
        Field::Altitude,
        Field::Distance,
        Field::Lat,
        Field::Lon,
        Field::Time,
    ];
    if has_hr {
        schema.push(Field::HeartRate);
    }
    schema.push(Field::Elapsed);

    let records = rows
        .into_iter()
        .map(|(mut record, hr)| {
            record.dt = Some(seconds_between(t0, record.time));
            record.hr_bpm = hr;
            record
        })
        .collect();

    Ok(TabularArray { schema, records })
}
