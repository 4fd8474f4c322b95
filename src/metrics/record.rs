use crate::metrics::sanitize::sanitize_label_name;
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::fmt;

pub const MAX_METRIC_NAME_LENGTH: usize = 200;
pub const MAX_DIMENSION_VALUE_LENGTH: usize = 100;

/// Label names the encoder adds to every series; dimensions may not collide with them.
pub const METRIC_NAME_LABEL: &str = "__name__";
pub const ACCOUNT_LABEL: &str = "account";

/// The pre-aggregated statistic set carried by each metric stream observation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct StreamValue {
    pub min: f64,
    pub max: f64,
    pub sum: f64,
    pub count: f64,
}

/// How a sample's unit maps to a remote-write sample value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitKind {
    Count,
    Other(String),
    Absent,
}

impl UnitKind {
    pub fn from_unit(unit: Option<&str>) -> Self {
        match unit {
            Some("Count") => UnitKind::Count,
            Some(other) => UnitKind::Other(other.to_string()),
            None => UnitKind::Absent,
        }
    }

    /// Picks the sample value for this unit, or `None` when the unit has no mapping.
    pub fn sample_value(&self, value: &StreamValue) -> Option<f64> {
        match self {
            UnitKind::Count => Some(value.count),
            UnitKind::Other(_) | UnitKind::Absent => None,
        }
    }
}

/// One decoded metric stream line.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MetricSample {
    #[serde(rename = "metric_stream_name", default)]
    pub stream_name: String,
    #[serde(default)]
    pub account_id: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub metric_name: String,
    #[serde(default)]
    pub dimensions: BTreeMap<String, String>,
    // already epoch milliseconds
    #[serde(rename = "timestamp", default)]
    pub timestamp_millis: i64,
    #[serde(default)]
    pub value: StreamValue,
    #[serde(default)]
    pub unit: Option<String>,
}

impl MetricSample {
    pub fn unit_kind(&self) -> UnitKind {
        UnitKind::from_unit(self.unit.as_deref())
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum DecodeErrorKind {
    #[error("malformed metric stream line: {0}")]
    Malformed(String),
    #[error("metric name is empty")]
    EmptyMetricName,
    #[error("metric name is {length} characters long, the limit is {}", MAX_METRIC_NAME_LENGTH)]
    MetricNameTooLong { length: usize },
    #[error(
        "value of dimension {key} is {length} characters long, the limit is {}",
        MAX_DIMENSION_VALUE_LENGTH
    )]
    DimensionValueTooLong { key: String, length: usize },
    #[error("dimension {key} maps to label {label}, which is already in use")]
    DuplicateLabel { key: String, label: String },
    #[error("dimension key {key:?} yields an empty label name")]
    EmptyLabelName { key: String },
}

/// A line that could not be turned into a [`MetricSample`].
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeError {
    pub record_id: String,
    pub kind: DecodeErrorKind,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "record {}: {}", self.record_id, self.kind)
    }
}

impl std::error::Error for DecodeError {}

/// Decodes and validates one metric stream line belonging to `record_id`.
///
/// Unknown fields are ignored and absent fields fall back to their defaults, so only
/// the validation rules below can reject an otherwise well-formed JSON object.
pub fn decode(record_id: &str, line: &[u8]) -> Result<MetricSample, DecodeError> {
    let fail = |kind| DecodeError {
        record_id: record_id.to_string(),
        kind,
    };

    let sample: MetricSample =
        serde_json::from_slice(line).map_err(|e| fail(DecodeErrorKind::Malformed(e.to_string())))?;

    let name_length = sample.metric_name.chars().count();
    if name_length == 0 {
        return Err(fail(DecodeErrorKind::EmptyMetricName));
    }
    if name_length > MAX_METRIC_NAME_LENGTH {
        return Err(fail(DecodeErrorKind::MetricNameTooLong {
            length: name_length,
        }));
    }

    let mut labels: HashSet<String> = [METRIC_NAME_LABEL, ACCOUNT_LABEL]
        .into_iter()
        .map(String::from)
        .collect();
    for (key, value) in &sample.dimensions {
        let length = value.chars().count();
        if length > MAX_DIMENSION_VALUE_LENGTH {
            return Err(fail(DecodeErrorKind::DimensionValueTooLong {
                key: key.clone(),
                length,
            }));
        }
        let label = sanitize_label_name(key);
        if label.is_empty() {
            return Err(fail(DecodeErrorKind::EmptyLabelName { key: key.clone() }));
        }
        if !labels.insert(label.clone()) {
            return Err(fail(DecodeErrorKind::DuplicateLabel {
                key: key.clone(),
                label,
            }));
        }
    }

    Ok(sample)
}
