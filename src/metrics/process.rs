use crate::config::Config;
use crate::metrics::aggregate::SeriesAggregator;
use crate::metrics::encode::encode_write_request;
use crate::metrics::record::{decode, MetricSample};
use crate::metrics::remote_write::{DeliveryError, RemoteWriter};
use aws_lambda_events::encodings::Base64Data;
use aws_lambda_events::event::firehose::{
    KinesisFirehoseEvent, KinesisFirehoseResponse, KinesisFirehoseResponseRecord,
    KinesisFirehoseResponseRecordMetadata,
};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Result reported back to the delivery stream for one input record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordStatus {
    Ok,
    Dropped,
    ProcessingFailed,
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            RecordStatus::Ok => "Ok",
            RecordStatus::Dropped => "Dropped",
            RecordStatus::ProcessingFailed => "ProcessingFailed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InputRecord {
    pub record_id: String,
    pub data: Vec<u8>,
}

/// Final outcome of one input record. `data` echoes the record for `Ok`/`Dropped`
/// and carries the failure cause for `ProcessingFailed`.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordOutcome {
    pub record_id: String,
    pub status: RecordStatus,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy)]
pub struct ProcessOptions {
    pub batch_size: usize,
    /// Status given to records whose samples were all delivered.
    pub delivered: RecordStatus,
    /// Stop reading records once this instant has passed.
    pub deadline: Option<Instant>,
}

impl ProcessOptions {
    pub fn from_config(config: &Config, deadline: Option<Instant>) -> Self {
        ProcessOptions {
            batch_size: config.batch_size,
            delivered: config.delivered_record_result,
            deadline,
        }
    }

    fn expired(&self) -> bool {
        self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum RecordState {
    // nothing failed so far; final once every flush holding its samples succeeded
    Delivered,
    Dropped,
    Failed(String),
}

#[derive(Debug)]
struct MetricsBatch {
    aggregator: SeriesAggregator,
    contributors: BTreeSet<usize>,
}

impl MetricsBatch {
    fn new(batch_size: usize) -> Self {
        MetricsBatch {
            aggregator: SeriesAggregator::new(batch_size),
            contributors: BTreeSet::new(),
        }
    }

    fn add(&mut self, record_index: usize, sample: MetricSample) {
        self.aggregator.add(sample);
        self.contributors.insert(record_index);
    }

    fn is_empty(&self) -> bool {
        self.aggregator.is_empty()
    }

    fn flush_ready(&self) -> bool {
        self.aggregator.flush_ready()
    }

    /// Encodes and delivers everything batched so far. The batch is empty afterwards
    /// whatever the result; the returned indices are the records that contributed.
    async fn flush(
        &mut self,
        writer: &dyn RemoteWriter,
    ) -> (BTreeSet<usize>, Result<(), DeliveryError>) {
        let samples = self.aggregator.len();
        let groups = self.aggregator.drain();
        let contributors = std::mem::take(&mut self.contributors);
        let payload = encode_write_request(&groups);
        info!(
            samples,
            series = groups.len(),
            records = contributors.len(),
            bytes = payload.len(),
            "flushing metrics batch"
        );
        let result = writer.deliver(&payload).await;
        (contributors, result)
    }
}

fn fail_contributors(states: &mut [RecordState], contributors: &BTreeSet<usize>, reason: &str) {
    for &idx in contributors {
        states[idx] = RecordState::Failed(reason.to_string());
    }
}

/// Decodes every non-blank line of a record. The first decode error fails the record.
fn decode_record(record: &InputRecord) -> Result<Vec<MetricSample>, String> {
    let text = std::str::from_utf8(&record.data)
        .map_err(|e| format!("record {} is not valid UTF-8: {}", record.record_id, e))?;

    let mut samples = Vec::new();
    let mut first_error = None;
    for (line_no, line) in text.split('\n').enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match decode(&record.record_id, line.as_bytes()) {
            Ok(sample) => samples.push(sample),
            Err(error) => {
                warn!(record_id = %record.record_id, line = line_no, %error, "failed to decode metric line");
                first_error.get_or_insert(error);
            }
        }
    }

    match first_error {
        Some(error) => Err(error.to_string()),
        None => Ok(samples),
    }
}

/// Runs one delivery of records through decode, aggregation and flush, returning
/// one outcome per record reached, in input order.
///
/// A flush happens whenever the batch reaches `batch_size` samples, possibly in the
/// middle of a record, and once more at the end. A failed flush fails every record
/// that had samples in it and stops the record being processed; records flushed
/// earlier keep their outcome. Records not reached before the deadline are left
/// out of the result.
pub async fn process_records(
    options: &ProcessOptions,
    writer: &dyn RemoteWriter,
    records: &[InputRecord],
) -> Vec<RecordOutcome> {
    let mut batch = MetricsBatch::new(options.batch_size);
    let mut states: Vec<RecordState> = Vec::with_capacity(records.len());
    let mut flushes = 0usize;
    let mut unsupported_total = 0usize;
    let mut deadline_hit = false;

    'records: for (idx, record) in records.iter().enumerate() {
        if options.expired() {
            deadline_hit = true;
            break;
        }
        debug!(record_id = %record.record_id, bytes = record.data.len(), "received record");

        let samples = match decode_record(record) {
            Ok(samples) => samples,
            Err(reason) => {
                states.push(RecordState::Failed(reason));
                continue;
            }
        };

        let total = samples.len();
        let supported: Vec<MetricSample> = samples
            .into_iter()
            .filter(|s| s.unit_kind().sample_value(&s.value).is_some())
            .collect();
        let unsupported = total - supported.len();
        if unsupported > 0 {
            unsupported_total += unsupported;
            warn!(
                record_id = %record.record_id,
                unsupported,
                total,
                "skipping samples whose unit has no value mapping"
            );
        }
        if supported.is_empty() {
            debug!(record_id = %record.record_id, "nothing to deliver for record");
            states.push(RecordState::Dropped);
            continue;
        }

        states.push(RecordState::Delivered);
        for sample in supported {
            batch.add(idx, sample);
            if !batch.flush_ready() {
                continue;
            }
            if options.expired() {
                deadline_hit = true;
                break 'records;
            }

            flushes += 1;
            let (contributors, result) = batch.flush(writer).await;
            if let Err(error) = result {
                error!(record_id = %record.record_id, flush = flushes, %error, "failed to flush metrics batch");
                fail_contributors(
                    &mut states,
                    &contributors,
                    &format!("Batch failed to write: {error}"),
                );
                continue 'records;
            }
        }
    }

    if deadline_hit {
        warn!(
            processed = states.len(),
            total = records.len(),
            pending_samples = batch.aggregator.len(),
            "invocation deadline reached, remaining records left unprocessed"
        );
        let pending = std::mem::take(&mut batch.contributors);
        fail_contributors(
            &mut states,
            &pending,
            "invocation deadline reached before the batch was delivered",
        );
    } else if !batch.is_empty() {
        flushes += 1;
        let (contributors, result) = batch.flush(writer).await;
        match result {
            Ok(()) => info!(flush = flushes, "sent final metrics batch"),
            Err(error) => {
                error!(flush = flushes, %error, "failed to send final metrics batch");
                fail_contributors(
                    &mut states,
                    &contributors,
                    &format!("Batch failed to write: {error}"),
                );
            }
        }
    }

    let outcomes: Vec<RecordOutcome> = records
        .iter()
        .zip(states)
        .map(|(record, state)| match state {
            RecordState::Delivered => RecordOutcome {
                record_id: record.record_id.clone(),
                status: options.delivered,
                data: record.data.clone(),
            },
            RecordState::Dropped => RecordOutcome {
                record_id: record.record_id.clone(),
                status: RecordStatus::Dropped,
                data: record.data.clone(),
            },
            RecordState::Failed(reason) => RecordOutcome {
                record_id: record.record_id.clone(),
                status: RecordStatus::ProcessingFailed,
                data: reason.into_bytes(),
            },
        })
        .collect();

    let failed = outcomes
        .iter()
        .filter(|o| o.status == RecordStatus::ProcessingFailed)
        .count();
    info!(
        records = records.len(),
        outcomes = outcomes.len(),
        failed,
        flushes,
        unsupported_samples = unsupported_total,
        "metrics transform finished"
    );
    outcomes
}

/// Processes a Firehose transformation event and builds the matching response.
pub async fn transform_firehose_event(
    options: &ProcessOptions,
    writer: &dyn RemoteWriter,
    event: KinesisFirehoseEvent,
) -> KinesisFirehoseResponse {
    info!(
        total_records = event.records.len(),
        batch_size = options.batch_size,
        "metrics transform start"
    );

    let records: Vec<InputRecord> = event
        .records
        .into_iter()
        .map(|record| InputRecord {
            record_id: record.record_id.unwrap_or_default(),
            data: record.data.0,
        })
        .collect();

    let outcomes = process_records(options, writer, &records).await;

    KinesisFirehoseResponse {
        records: outcomes
            .into_iter()
            .map(|outcome| KinesisFirehoseResponseRecord {
                record_id: Some(outcome.record_id),
                result: Some(outcome.status.to_string()),
                data: Base64Data(outcome.data),
                metadata: KinesisFirehoseResponseRecordMetadata {
                    partition_keys: HashMap::new(),
                },
            })
            .collect(),
    }
}
