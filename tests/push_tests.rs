mod common;

use std::cell::{Cell, RefCell};

use common::sample_source;
use shadowmsg_core::error::CoreError;
use shadowmsg_core::push::{
    push, push_status, reset, BatchReport, EndpointConfig, PushObserver, PushOptions, PushPayload,
    Transport, TransportResponse,
};
use shadowmsg_core::sync::{sync, SyncOptions};
use shadowmsg_core::{open_store_in_memory, ShadowDb};

struct MockTransport {
    sent: RefCell<Vec<PushPayload>>,
    calls: Cell<usize>,
    fail_on_call: Cell<Option<usize>>,
    body: String,
}

impl MockTransport {
    fn new() -> Self {
        Self::with_body("")
    }

    fn with_body(body: &str) -> Self {
        Self {
            sent: RefCell::new(Vec::new()),
            calls: Cell::new(0),
            fail_on_call: Cell::new(None),
            body: body.to_string(),
        }
    }

    fn failing_on(call: usize) -> Self {
        let transport = Self::new();
        transport.fail_on_call.set(Some(call));
        transport
    }
}

impl Transport for MockTransport {
    fn submit(&self, endpoint: &EndpointConfig, payload: &PushPayload) -> Result<TransportResponse, CoreError> {
        assert_eq!(endpoint.token, "secret");
        let call = self.calls.get();
        self.calls.set(call + 1);
        if self.fail_on_call.get() == Some(call) {
            return Ok(TransportResponse {
                status: 500,
                body: "upstream unavailable".to_string(),
            });
        }
        self.sent.borrow_mut().push(payload.clone());
        Ok(TransportResponse {
            status: 200,
            body: self.body.clone(),
        })
    }
}

fn endpoint(name: &str) -> EndpointConfig {
    EndpointConfig {
        name: name.to_string(),
        url: "https://archive.example.invalid/import".to_string(),
        token: "secret".to_string(),
        timeout_secs: 5,
    }
}

fn batches_of(size: usize) -> PushOptions {
    PushOptions {
        batch_size: size,
        dry_run: false,
    }
}

fn synced_store() -> ShadowDb {
    let mut store = open_store_in_memory().expect("store");
    sync(&mut store.conn, &sample_source(), &SyncOptions::default()).expect("sync");
    store
}

#[test]
fn push_sends_ascending_batches_and_persists_watermark() {
    let store = synced_store();
    let transport = MockTransport::new();

    let report = push(&store.conn, &endpoint("archive"), &transport, batches_of(2), None).expect("push");
    assert_eq!(
        report.batches.iter().map(|b| b.size).collect::<Vec<_>>(),
        vec![2, 2, 1]
    );
    assert_eq!(report.total, 5);
    assert_eq!(report.imported, 5);
    assert_eq!(report.skipped, 0);
    assert_eq!(report.last_id, 5);
    assert!(!report.dry_run);

    let status = push_status(&store.conn, "archive").expect("status");
    assert_eq!(status.last_cursor, 5);
    assert_eq!(status.total_pushed, 5);
    assert!(status.last_push_at.is_some());

    let sent = transport.sent.borrow();
    assert_eq!(sent.len(), 3);
    let first = &sent[0].messages[0];
    assert_eq!(first.external_id, "guid-1");
    assert_eq!(first.sender.as_deref(), Some("+821012345678"));
    assert_eq!(first.body.as_deref(), Some("Amazon payment received"));
    assert_eq!(first.sent_at.as_deref(), Some("2024-01-10T12:00:00.000Z"));
    assert_eq!(first.service, "iMessage");
    assert!(!first.is_from_me);
    assert_eq!(sent[2].messages[0].external_id, "guid-5");
}

#[test]
fn payload_serializes_expected_fields() {
    let store = synced_store();
    let transport = MockTransport::new();
    push(&store.conn, &endpoint("archive"), &transport, batches_of(1), None).expect("push");

    let sent = transport.sent.borrow();
    let json = serde_json::to_value(&sent[0]).expect("json");
    let message = &json["messages"][0];
    for field in ["external_id", "sender", "sender_name", "body", "sent_at", "service", "is_from_me"] {
        assert!(message.get(field).is_some(), "missing {}", field);
    }
}

#[test]
fn failed_batch_keeps_earlier_progress_and_stops() {
    let store = synced_store();
    let transport = MockTransport::failing_on(1);

    let err = push(&store.conn, &endpoint("archive"), &transport, batches_of(2), None).unwrap_err();
    match err {
        CoreError::Transport { status, body } => {
            assert_eq!(status, 500);
            assert_eq!(body, "upstream unavailable");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(transport.calls.get(), 2);

    let status = push_status(&store.conn, "archive").expect("status");
    assert_eq!(status.last_cursor, 2);
    assert_eq!(status.total_pushed, 2);

    let retry = MockTransport::new();
    let report = push(&store.conn, &endpoint("archive"), &retry, batches_of(2), None).expect("retry");
    assert_eq!(
        report.batches.iter().map(|b| (b.first_id, b.last_id)).collect::<Vec<_>>(),
        vec![(3, 4), (5, 5)]
    );
    assert_eq!(push_status(&store.conn, "archive").expect("status").total_pushed, 5);
}

#[test]
fn dry_run_never_persists() {
    let store = synced_store();
    let transport = MockTransport::new();
    let options = PushOptions {
        batch_size: 2,
        dry_run: true,
    };

    for _ in 0..3 {
        let report = push(&store.conn, &endpoint("archive"), &transport, options, None).expect("dry run");
        assert!(report.dry_run);
        assert_eq!(report.batches.len(), 3);
        assert_eq!(report.total, 5);
        assert_eq!(report.imported, 5);
        assert_eq!(report.last_id, 5);
    }
    assert_eq!(transport.calls.get(), 0);

    let status = push_status(&store.conn, "archive").expect("status");
    assert_eq!(status.last_cursor, 0);
    assert_eq!(status.total_pushed, 0);
    assert!(shadowmsg_core::query::list_push_watermarks(&store.conn)
        .expect("watermarks")
        .is_empty());
}

#[test]
fn reset_resends_everything_for_that_endpoint_only() {
    let store = synced_store();
    let transport = MockTransport::new();
    push(&store.conn, &endpoint("archive"), &transport, batches_of(10), None).expect("push a");
    push(&store.conn, &endpoint("backup"), &transport, batches_of(10), None).expect("push b");

    let report = push(&store.conn, &endpoint("archive"), &transport, batches_of(10), None).expect("noop");
    assert!(report.batches.is_empty());
    assert_eq!(report.last_id, 5);

    reset(&store.conn, "archive").expect("reset");
    let status = push_status(&store.conn, "archive").expect("status");
    assert_eq!((status.last_cursor, status.total_pushed), (0, 0));
    let other = push_status(&store.conn, "backup").expect("status");
    assert_eq!((other.last_cursor, other.total_pushed), (5, 5));

    let report = push(&store.conn, &endpoint("archive"), &transport, batches_of(10), None).expect("resend");
    assert_eq!(report.total, 5);
    let status = push_status(&store.conn, "archive").expect("status");
    assert_eq!((status.last_cursor, status.total_pushed), (5, 5));
}

#[test]
fn remote_counts_are_reported() {
    let store = synced_store();
    let transport = MockTransport::with_body(r#"{"imported": 1, "skipped": 1}"#);
    let report = push(&store.conn, &endpoint("archive"), &transport, batches_of(2), None).expect("push");
    assert_eq!(report.imported, 3);
    assert_eq!(report.skipped, 3);
    assert_eq!(report.total, 5);
    assert_eq!(push_status(&store.conn, "archive").expect("status").total_pushed, 5);

    let store = synced_store();
    let transport = MockTransport::with_body(r#"{"skipped": 1}"#);
    let report = push(&store.conn, &endpoint("archive"), &transport, batches_of(5), None).expect("push");
    assert_eq!((report.imported, report.skipped), (4, 1));
}

#[test]
fn observer_sees_every_batch_in_order() {
    let store = synced_store();
    let transport = MockTransport::new();
    let mut seen: Vec<BatchReport> = Vec::new();
    let mut record = |batch: &BatchReport| seen.push(batch.clone());
    let observer: &mut dyn PushObserver = &mut record;

    let report = push(&store.conn, &endpoint("archive"), &transport, batches_of(2), Some(observer)).expect("push");
    assert_eq!(seen, report.batches);
    assert_eq!(seen.iter().map(|b| b.index).collect::<Vec<_>>(), vec![0, 1, 2]);
}

#[test]
fn soft_deleted_rows_are_not_pushed() {
    let mut store = synced_store();
    let mut source = sample_source();
    source.messages.retain(|m| m.id != 3);
    let options = SyncOptions {
        cleanup: true,
        ..SyncOptions::default()
    };
    sync(&mut store.conn, &source, &options).expect("cleanup");

    let transport = MockTransport::new();
    let report = push(&store.conn, &endpoint("archive"), &transport, batches_of(10), None).expect("push");
    assert_eq!(report.total, 4);
    let ids: Vec<String> = transport.sent.borrow()[0]
        .messages
        .iter()
        .map(|m| m.external_id.clone())
        .collect();
    assert!(!ids.contains(&"guid-3".to_string()));
}

#[test]
fn zero_batch_size_is_rejected() {
    let store = synced_store();
    let transport = MockTransport::new();
    let err = push(&store.conn, &endpoint("archive"), &transport, batches_of(0), None).unwrap_err();
    assert!(matches!(err, CoreError::InvalidArgument(_)));
    assert_eq!(transport.calls.get(), 0);
}
