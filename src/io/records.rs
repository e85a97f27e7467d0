//! Fixed-layout ground-truth records.
//!
//! Segments: `frame, <sub frame>, euler_x, euler_y, euler_z, t_x, t_y, t_z`
//! Trajectories: `frame, <sub frame>` followed by `x, y, z` per marker,
//! markers in the fixed order of the marker model.
//!
//! The second field is required but ignored. Empty trailing fields (left
//! by exporters that terminate rows with a comma) are not counted.

use csv::{ReaderBuilder, StringRecord, Trim};
use nalgebra::Vector3;

use crate::error::RecordError;

/// Leading `frame, sub frame` fields.
const PREFIX_FIELDS: usize = 2;

/// Per-frame euler + translation record.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentRecord {
    pub frame: u64,
    /// Euler angles in degrees, as exported.
    pub euler: Vector3<f64>,
    pub translation: Vector3<f64>,
}

impl SegmentRecord {
    pub const FIELDS: usize = PREFIX_FIELDS + 6;

    pub fn parse(line: &str) -> Result<Self, RecordError> {
        let fields = split_fields(line, Self::FIELDS)?;
        Ok(Self {
            frame: parse_frame(&fields)?,
            euler: parse_vector(&fields, PREFIX_FIELDS)?,
            translation: parse_vector(&fields, PREFIX_FIELDS + 3)?,
        })
    }
}

/// Per-frame raw marker positions.
#[derive(Debug, Clone, PartialEq)]
pub struct TrajectoryRecord {
    pub frame: u64,
    pub markers: Vec<Vector3<f64>>,
}

impl TrajectoryRecord {
    /// Number of fields for a record carrying `marker_count` markers.
    pub fn fields(marker_count: usize) -> usize {
        PREFIX_FIELDS + 3 * marker_count
    }

    pub fn parse(line: &str, marker_count: usize) -> Result<Self, RecordError> {
        let fields = split_fields(line, Self::fields(marker_count))?;
        let markers = (0..marker_count)
            .map(|i| parse_vector(&fields, PREFIX_FIELDS + 3 * i))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            frame: parse_frame(&fields)?,
            markers,
        })
    }
}

/// Tokenize one line and check the field count against the layout.
fn split_fields(line: &str, expected: usize) -> Result<StringRecord, RecordError> {
    if line.trim().is_empty() {
        return Err(RecordError::Empty);
    }

    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(line.as_bytes());

    let mut record = StringRecord::new();
    match rdr.read_record(&mut record) {
        Ok(true) => {}
        Ok(false) => return Err(RecordError::Empty),
        Err(e) => return Err(RecordError::Csv(e.to_string())),
    }

    let mut found = record.len();
    while found > 0 && record[found - 1].is_empty() {
        found -= 1;
    }
    if found != expected {
        return Err(RecordError::FieldCount { expected, found });
    }
    record.truncate(found);
    Ok(record)
}

fn parse_frame(fields: &StringRecord) -> Result<u64, RecordError> {
    fields[0].parse().map_err(|_| RecordError::Field {
        index: 0,
        value: fields[0].to_string(),
    })
}

fn parse_f64(fields: &StringRecord, index: usize) -> Result<f64, RecordError> {
    fields[index].parse().map_err(|_| RecordError::Field {
        index,
        value: fields[index].to_string(),
    })
}

fn parse_vector(fields: &StringRecord, start: usize) -> Result<Vector3<f64>, RecordError> {
    Ok(Vector3::new(
        parse_f64(fields, start)?,
        parse_f64(fields, start + 1)?,
        parse_f64(fields, start + 2)?,
    ))
}
