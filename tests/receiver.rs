use std::{path::PathBuf, sync::Arc, thread::JoinHandle};

use opencv::{core::Mat, prelude::*};
use rmpv::Value;

use flb_vision_demo::{
    http::{self, ReceiverState},
    view::{self, FrameSink, Tick, FRAME_LEN},
    FrameSlot,
};

#[derive(Default)]
struct Recorder {
    shown: Vec<Vec<u8>>,
}

impl FrameSink for Recorder {
    fn show(&mut self, image: &Mat) -> anyhow::Result<()> {
        self.shown.push(image.data_bytes()?.to_vec());
        Ok(())
    }

    fn wait_key(&mut self, _delay_ms: i32) -> anyhow::Result<i32> {
        Ok(-1)
    }
}

struct Receiver {
    url: String,
    slot: Arc<FrameSlot>,
    server: JoinHandle<anyhow::Result<()>>,
    _labels: Option<tempfile::TempDir>,
}

fn serve(labels: PathBuf, dir: Option<tempfile::TempDir>) -> Receiver {
    let slot = Arc::new(FrameSlot::new());
    let listener = http::bind(0).unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = http::spawn_server(
        listener,
        ReceiverState {
            slot: slot.clone(),
            labels,
        },
    )
    .unwrap();

    Receiver {
        url: format!("http://127.0.0.1:{}/", port),
        slot,
        server,
        _labels: dir,
    }
}

fn start() -> Receiver {
    let dir = tempfile::tempdir().unwrap();
    let labels = dir.path().join("imagenet_class_index.json");
    std::fs::write(
        &labels,
        r#"{"0": ["n01440764", "tench"], "1": ["n01443537", "goldfish"]}"#,
    )
    .unwrap();
    serve(labels, Some(dir))
}

fn start_with_bundled_labels() -> Receiver {
    serve(
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("assets/imagenet_class_index.json"),
        None,
    )
}

fn body(frame: Value, output: Value) -> Vec<u8> {
    let mut buf = Vec::new();
    rmpv::encode::write_value(
        &mut buf,
        &Value::Array(vec![
            Value::from(0),
            Value::Map(vec![
                (Value::from("frame"), frame),
                (Value::from("output"), output),
            ]),
        ]),
    )
    .unwrap();
    buf
}

fn ranked(idx: i64) -> Value {
    top_k(&[idx])
}

fn top_k(indices: &[i64]) -> Value {
    Value::Map(
        indices
            .iter()
            .enumerate()
            .map(|(rank, idx)| {
                (
                    Value::from(rank.to_string()),
                    Value::Map(vec![
                        (Value::from("idx"), Value::from(*idx)),
                        (Value::from("value"), Value::from(0.9 - rank as f64 * 0.1)),
                    ]),
                )
            })
            .collect(),
    )
}

fn ramp() -> Vec<u8> {
    (0..FRAME_LEN).map(|i| (i % 256) as u8).collect()
}

#[test]
fn posted_frame_is_rendered_on_next_tick() {
    let receiver = start();
    let client = reqwest::blocking::Client::new();

    let response = client
        .post(&receiver.url)
        .body(body(Value::Binary(ramp()), ranked(1)))
        .send()
        .unwrap();
    assert!(response.status().is_success());
    let json: serde_json::Value = serde_json::from_str(&response.text().unwrap()).unwrap();
    assert_eq!(json, serde_json::json!({}));

    let mut sink = Recorder::default();
    assert_eq!(view::tick(&receiver.slot, &mut sink).unwrap(), Tick::Rendered);

    let expected = view::prepare_frame(&ramp()).unwrap();
    assert_eq!(sink.shown.len(), 1);
    assert_eq!(sink.shown[0], expected.data_bytes().unwrap());
}

#[test]
fn integer_list_frame_is_accepted() {
    let receiver = start();
    let frame = Value::Array(ramp().into_iter().map(Value::from).collect());

    let response = reqwest::blocking::Client::new()
        .post(&receiver.url)
        .body(body(frame, ranked(0)))
        .send()
        .unwrap();
    assert!(response.status().is_success());
    assert_eq!(receiver.slot.latest().unwrap().as_slice(), ramp().as_slice());
}

#[test]
fn index_identifies_the_service() {
    let receiver = start();
    let text = reqwest::blocking::get(&receiver.url).unwrap().text().unwrap();
    let json: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(
        json,
        serde_json::json!({"name": "FluentBit", "email": "FluentBit@fluentbit"})
    );
}

#[test]
fn bad_requests_fail_alone() {
    let receiver = start();
    let client = reqwest::blocking::Client::new();

    let garbage = client.post(&receiver.url).body(vec![0xc1, 0x00]).send().unwrap();
    assert_eq!(garbage.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);

    let unknown = client
        .post(&receiver.url)
        .body(body(Value::Binary(ramp()), ranked(5000)))
        .send()
        .unwrap();
    assert_eq!(unknown.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);
    assert!(!receiver.slot.is_dirty());

    let ok = client
        .post(&receiver.url)
        .body(body(Value::Binary(ramp()), ranked(2)))
        .send()
        .unwrap();
    assert!(ok.status().is_success());
    assert!(receiver.slot.is_dirty());
}

#[test]
fn top_five_against_bundled_table_is_displayed() {
    let receiver = start_with_bundled_labels();

    let response = reqwest::blocking::Client::new()
        .post(&receiver.url)
        .body(body(Value::Binary(ramp()), top_k(&[282, 283, 286, 288, 479])))
        .send()
        .unwrap();
    assert!(response.status().is_success());
    assert!(receiver.slot.is_dirty());

    let mut sink = Recorder::default();
    assert_eq!(view::tick(&receiver.slot, &mut sink).unwrap(), Tick::Rendered);
}

#[test]
fn overflowing_index_fails_only_that_request() {
    let receiver = start_with_bundled_labels();
    let client = reqwest::blocking::Client::new();

    let response = client
        .post(&receiver.url)
        .body(body(Value::Binary(ramp()), ranked(i64::MIN)))
        .send()
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);

    let response = client
        .post(&receiver.url)
        .body(body(Value::Binary(ramp()), ranked(1000)))
        .send()
        .unwrap();
    assert!(response.status().is_success());
}

#[test]
fn server_thread_outlives_requests() {
    let receiver = start();
    let client = reqwest::blocking::Client::new();

    for _ in 0..3 {
        client.post(&receiver.url).body(vec![0xc1]).send().unwrap();
    }
    assert!(client.get(&receiver.url).send().unwrap().status().is_success());
    assert!(!receiver.server.is_finished());
}
