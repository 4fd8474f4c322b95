use crate::metrics::aggregate::AggregationKey;
use crate::metrics::prompb::metric_metadata::MetricType;
use crate::metrics::prompb::{Label, MetricMetadata, Sample, TimeSeries, WriteRequest};
use crate::metrics::record::{MetricSample, UnitKind, ACCOUNT_LABEL, METRIC_NAME_LABEL};
use crate::metrics::sanitize::{sanitize_label_name, sanitize_metric_name};
use prost::Message;
use tracing::debug;

/// Builds the series and its metadata for one aggregation group.
///
/// Labels are the sanitized dimension keys with their raw values, `__name__` with
/// the sanitized metric name, and `account` with the raw account id, sorted by
/// name. Metadata takes its family name from the namespace of the last sample
/// in the group and its unit from the last sample that carries one.
pub fn build_series(
    key: &AggregationKey,
    samples: &[MetricSample],
) -> (TimeSeries, MetricMetadata) {
    let mut labels: Vec<Label> = key
        .dimensions
        .iter()
        .map(|(name, value)| Label {
            name: sanitize_label_name(name),
            value: value.clone(),
        })
        .collect();
    labels.push(Label {
        name: METRIC_NAME_LABEL.to_string(),
        value: sanitize_metric_name(&key.metric_name),
    });
    labels.push(Label {
        name: ACCOUNT_LABEL.to_string(),
        value: key.account_id.clone(),
    });
    labels.sort_by(|a, b| a.name.cmp(&b.name));

    let mut series = TimeSeries {
        labels,
        samples: Vec::with_capacity(samples.len()),
    };
    let mut metadata = MetricMetadata::default();

    for sample in samples {
        if let Some(unit) = &sample.unit {
            metadata.unit = unit.clone();
        }
        let kind = sample.unit_kind();
        if kind == UnitKind::Count {
            metadata.set_type(MetricType::Counter);
        }
        match kind.sample_value(&sample.value) {
            Some(value) => series.samples.push(Sample {
                value,
                timestamp: sample.timestamp_millis,
            }),
            None => debug!(
                metric = %key.metric_name,
                unit = ?sample.unit,
                "no sample value mapping for unit, sample skipped"
            ),
        }
        metadata.metric_family_name = sanitize_label_name(&sample.namespace);
    }

    (series, metadata)
}

pub fn build_write_request(groups: &[(AggregationKey, Vec<MetricSample>)]) -> WriteRequest {
    let mut request = WriteRequest::default();
    for (key, samples) in groups {
        let (series, metadata) = build_series(key, samples);
        debug!(
            metric = %key.metric_name,
            account = %key.account_id,
            samples = series.samples.len(),
            unit = %metadata.unit,
            "built time series"
        );
        request.timeseries.push(series);
        request.metadata.push(metadata);
    }
    request
}

/// Serializes the groups of one flush into an uncompressed remote-write message.
pub fn encode_write_request(groups: &[(AggregationKey, Vec<MetricSample>)]) -> Vec<u8> {
    build_write_request(groups).encode_to_vec()
}
