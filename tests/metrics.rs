use base64::Engine;
use chrono::NaiveDateTime;
use cwstream_remote_write::config::Config;
use cwstream_remote_write::credentials::{Credentials, StaticCredentialsProvider};
use cwstream_remote_write::metrics::prompb::WriteRequest;
use cwstream_remote_write::metrics::sigv4::{self, SignableRequest, SigningScope};
use cwstream_remote_write::AwsClients;
use aws_lambda_events::event::firehose::{KinesisFirehoseEvent, KinesisFirehoseResponse};
use lambda_runtime::{Context, LambdaEvent};
use prost::Message;
use std::sync::{Arc, Mutex};

const REMOTE_WRITE_PATH: &str = "/workspaces/ws-1234/api/v1/remote_write";

fn metric_line(account: &str, metric: &str, ts: i64, count: f64, unit: &str) -> String {
    serde_json::json!({
        "metric_stream_name": "cw-stream",
        "account_id": account,
        "region": "us-east-1",
        "namespace": "AWS/Lambda",
        "metric_name": metric,
        "dimensions": {"FunctionName": "checkout", "Env Name": "prod"},
        "timestamp": ts,
        "value": {"min": 0.0, "max": count, "sum": count, "count": count},
        "unit": unit
    })
    .to_string()
}

fn firehose_event(records: &[Vec<String>]) -> KinesisFirehoseEvent {
    let records: Vec<serde_json::Value> = records
        .iter()
        .enumerate()
        .map(|(i, lines)| {
            let data = lines.join("\n") + "\n";
            serde_json::json!({
                "recordId": format!("record-{i}"),
                "approximateArrivalTimestamp": 1495072949453i64,
                "data": base64::engine::general_purpose::STANDARD.encode(data),
            })
        })
        .collect();
    serde_json::from_value(serde_json::json!({
        "invocationId": "invocation-1",
        "deliveryStreamArn": "arn:aws:firehose:us-east-1:123456789012:deliverystream/metrics",
        "region": "us-east-1",
        "records": records,
    }))
    .unwrap()
}

async fn run_transform(evt: KinesisFirehoseEvent) -> KinesisFirehoseResponse {
    let config = Config::load_from_env().unwrap();
    let credentials = Credentials::new("AKIDEXAMPLE", "secret-key", Some("session".into())).unwrap();
    let clients =
        AwsClients::with_credentials(&config, Arc::new(StaticCredentialsProvider::new(credentials)))
            .unwrap();
    let evt = LambdaEvent::new(evt, Context::default());
    cwstream_remote_write::function_handler(&clients, &config, evt)
        .await
        .unwrap()
}

fn header<'a>(r: &'a wiremock::Request, name: &str) -> &'a str {
    r.headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

/// Recomputes the signature of a received request and compares it with the one sent.
fn signature_matches(r: &wiremock::Request) -> bool {
    let amz_date = header(r, "x-amz-date");
    let Ok(time) = NaiveDateTime::parse_from_str(amz_date, "%Y%m%dT%H%M%SZ") else {
        return false;
    };
    let payload_hash = sigv4::sha256_hex(&r.body);
    if header(r, "x-amz-content-sha256") != payload_hash {
        return false;
    }
    let headers = [
        ("content-type", header(r, "content-type")),
        ("host", header(r, "host")),
        ("x-amz-content-sha256", payload_hash.as_str()),
        ("x-amz-date", amz_date),
        ("x-api-key", header(r, "x-api-key")),
    ];
    let request = SignableRequest {
        method: "POST",
        canonical_uri: r.url.path(),
        query_string: "",
        headers: &headers,
        payload_hash: &payload_hash,
    };
    let scope = SigningScope {
        region: "us-east-1",
        service: "aps",
        time: time.and_utc(),
    };
    let signature = sigv4::sign(&request, &scope, "secret-key").unwrap();
    header(r, "authorization") == signature.authorization_header("AKIDEXAMPLE")
        && header(r, "x-amz-security-token") == "session"
}

fn decode_body(r: &wiremock::Request) -> Option<WriteRequest> {
    let raw = snap::raw::Decoder::new().decompress_vec(&r.body).ok()?;
    WriteRequest::decode(raw.as_slice()).ok()
}

#[test_log::test(tokio::test)]
async fn test_firehose_transform_flow() {
    let requests = Arc::new(Mutex::new(Vec::<WriteRequest>::new()));
    let received = requests.clone();

    let server = wiremock::MockServer::start().await;
    wiremock::Mock::given(wiremock::matchers::method("POST"))
        .and(wiremock::matchers::path(REMOTE_WRITE_PATH))
        .and(wiremock::matchers::header("content-encoding", "snappy"))
        .and(wiremock::matchers::header("content-type", "application/x-protobuf"))
        .and(wiremock::matchers::header("x-prometheus-remote-write-version", "0.1.0"))
        .and(wiremock::matchers::header("x-api-key", "1234456789X"))
        .and(move |r: &wiremock::Request| -> bool {
            if !signature_matches(r) {
                return false;
            }
            match decode_body(r) {
                Some(request) => {
                    received.lock().unwrap().push(request);
                    true
                }
                None => false,
            }
        })
        .respond_with(wiremock::ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let evt = firehose_event(&[
        vec![
            metric_line("111111111111", "Invocations", 1000, 4.0, "Count"),
            metric_line("111111111111", "Invocations", 2000, 6.0, "Count"),
        ],
        vec![
            metric_line("111111111111", "Errors", 1000, 1.0, "Count"),
            metric_line("111111111111", "Duration", 1000, 12.5, "Milliseconds"),
        ],
        vec![metric_line("111111111111", "Duration", 2000, 9.0, "Milliseconds")],
    ]);

    let endpoint = format!("{}{}", server.uri(), REMOTE_WRITE_PATH);
    let response = temp_env::async_with_vars(
        [
            ("REGION", Some("us-east-1")),
            ("REMOTE_WRITE_ENDPOINT", Some(endpoint.as_str())),
            ("SIGNED_REQUESTS", Some("true")),
            ("API_KEY", Some("1234456789X")),
            ("BATCH_SIZE", Some("2")),
        ],
        run_transform(evt),
    )
    .await;

    let results: Vec<(Option<&str>, Option<&str>)> = response
        .records
        .iter()
        .map(|r| (r.record_id.as_deref(), r.result.as_deref()))
        .collect();
    assert_eq!(
        results,
        vec![
            (Some("record-0"), Some("Ok")),
            (Some("record-1"), Some("Ok")),
            (Some("record-2"), Some("Dropped")),
        ]
    );

    let requests = requests.lock().unwrap();
    // two Invocations samples reach the threshold, the Errors sample goes in the final flush
    assert_eq!(requests.len(), 2);

    let first = &requests[0];
    assert_eq!(first.timeseries.len(), 1);
    let labels: Vec<(&str, &str)> = first.timeseries[0]
        .labels
        .iter()
        .map(|l| (l.name.as_str(), l.value.as_str()))
        .collect();
    assert_eq!(
        labels,
        vec![
            ("Env_Name", "prod"),
            ("FunctionName", "checkout"),
            ("__name__", "Invocations"),
            ("account", "111111111111"),
        ]
    );
    let samples: Vec<(f64, i64)> = first.timeseries[0]
        .samples
        .iter()
        .map(|s| (s.value, s.timestamp))
        .collect();
    assert_eq!(samples, vec![(4.0, 1000), (6.0, 2000)]);
    assert_eq!(first.metadata.len(), 1);
    assert_eq!(first.metadata[0].metric_family_name, "AWS_Lambda");
    assert_eq!(first.metadata[0].unit, "Count");

    let second = &requests[1];
    assert_eq!(second.timeseries.len(), 1);
    assert_eq!(second.timeseries[0].samples[0].value, 1.0);
}

#[tokio::test]
async fn test_rejected_write_fails_records() {
    let server = wiremock::MockServer::start().await;
    wiremock::Mock::given(wiremock::matchers::method("POST"))
        .and(wiremock::matchers::path(REMOTE_WRITE_PATH))
        .respond_with(wiremock::ResponseTemplate::new(400).set_body_string("out of order sample"))
        .expect(1)
        .mount(&server)
        .await;

    let evt = firehose_event(&[
        vec![metric_line("111111111111", "Invocations", 1000, 4.0, "Count")],
        vec![metric_line("222222222222", "Invocations", 1000, 2.0, "Count")],
    ]);

    let endpoint = format!("{}{}", server.uri(), REMOTE_WRITE_PATH);
    let response = temp_env::async_with_vars(
        [
            ("REGION", Some("us-east-1")),
            ("REMOTE_WRITE_ENDPOINT", Some(endpoint.as_str())),
            ("SIGNED_REQUESTS", Some("true")),
            ("BATCH_SIZE", None),
        ],
        run_transform(evt),
    )
    .await;

    assert_eq!(response.records.len(), 2);
    for record in &response.records {
        assert_eq!(record.result.as_deref(), Some("ProcessingFailed"));
        let cause = String::from_utf8(record.data.0.clone()).unwrap();
        assert!(cause.contains("400"), "{cause}");
        assert!(cause.contains("out of order sample"), "{cause}");
    }
}

#[tokio::test]
async fn test_unsigned_requests_and_dropped_result() {
    let signed = Arc::new(Mutex::new(false));
    let seen = signed.clone();

    let server = wiremock::MockServer::start().await;
    wiremock::Mock::given(wiremock::matchers::method("POST"))
        .and(wiremock::matchers::path(REMOTE_WRITE_PATH))
        .and(wiremock::matchers::header("x-api-key", "local-key"))
        .and(move |r: &wiremock::Request| -> bool {
            *seen.lock().unwrap() |= r.headers.contains_key("authorization");
            decode_body(r).is_some()
        })
        .respond_with(wiremock::ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let evt = firehose_event(&[
        vec![metric_line("111111111111", "Invocations", 1000, 4.0, "Count")],
        vec!["{not json".to_string()],
    ]);

    let endpoint = format!("{}{}", server.uri(), REMOTE_WRITE_PATH);
    let response = temp_env::async_with_vars(
        [
            ("REGION", Some("us-east-1")),
            ("REMOTE_WRITE_ENDPOINT", Some(endpoint.as_str())),
            ("SIGNED_REQUESTS", Some("false")),
            ("API_KEY", Some("local-key")),
            ("DELIVERED_RECORD_RESULT", Some("Dropped")),
        ],
        run_transform(evt),
    )
    .await;

    assert!(!*signed.lock().unwrap());
    assert_eq!(response.records[0].result.as_deref(), Some("Dropped"));
    assert_eq!(response.records[1].result.as_deref(), Some("ProcessingFailed"));
}

#[tokio::test]
async fn test_timed_out_write_fails_records() {
    let server = wiremock::MockServer::start().await;
    wiremock::Mock::given(wiremock::matchers::method("POST"))
        .and(wiremock::matchers::path(REMOTE_WRITE_PATH))
        .respond_with(
            wiremock::ResponseTemplate::new(200).set_delay(std::time::Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let evt = firehose_event(&[
        vec![metric_line("111111111111", "Invocations", 1000, 4.0, "Count")],
        vec![metric_line("111111111111", "Errors", 1000, 1.0, "Count")],
        vec![metric_line("111111111111", "Duration", 1000, 3.0, "Milliseconds")],
    ]);

    let endpoint = format!("{}{}", server.uri(), REMOTE_WRITE_PATH);
    let response = temp_env::async_with_vars(
        [
            ("REGION", Some("us-east-1")),
            ("REMOTE_WRITE_ENDPOINT", Some(endpoint.as_str())),
            ("SIGNED_REQUESTS", Some("false")),
            ("HTTP_TIMEOUT_SECS", Some("1")),
        ],
        run_transform(evt),
    )
    .await;

    let results: Vec<Option<&str>> = response
        .records
        .iter()
        .map(|r| r.result.as_deref())
        .collect();
    assert_eq!(
        results,
        vec![Some("ProcessingFailed"), Some("ProcessingFailed"), Some("Dropped")]
    );
    for record in &response.records[..2] {
        let cause = String::from_utf8(record.data.0.clone()).unwrap();
        assert!(cause.contains("remote write request failed"), "{cause}");
    }
}
