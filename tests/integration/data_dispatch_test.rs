// tests/integration/data_dispatch_test.rs

//! Integration tests for record delivery
//! Tests: RecordPublish and RecordCommunicate routing, correlation and the
//! protocol violations on both paths.

use super::test_helpers::*;
use nexus::NexusError;
use nexus::core::protocol::{
    DeferRequest, Record, RecordResult, RecordType, Request, RequestType, Response,
    ServerRequest, ServerResponse,
};
use serde_json::json;
use std::time::Duration;

// ===== Ordering and preconditions =====

#[tokio::test]
async fn test_records_before_init_are_rejected() {
    let mut tc = TestConnection::new();

    let err = tc
        .send(ServerRequest::publish(history(1, Some(0))))
        .await
        .unwrap_err();
    assert_eq!(err, NexusError::StreamNotInitialized);
    assert!(err.is_fatal());

    let err = tc
        .send(ServerRequest::communicate(ping(2)))
        .await
        .unwrap_err();
    assert_eq!(err, NexusError::StreamNotInitialized);
}

// ===== RecordPublish =====

#[tokio::test]
async fn test_publish_routes_every_record_variant() {
    let mut tc = TestConnection::new();
    tc.init("run-1").await;

    let records = vec![
        header(1),
        run(2, "abc"),
        summary(3, "acc", json!(0.9)),
        history(4, Some(7)),
        telemetry(5),
        output(6, "hello"),
        exit(7, 0),
    ];
    for record in records {
        tc.send(ServerRequest::publish(record)).await.unwrap();
    }
    tc.sync(8).await;

    assert_eq!(
        tc.recorder.events(),
        vec![
            "header",
            "run:abc",
            "summary:1",
            "history:7",
            "telemetry",
            "output:hello",
            "exit:0",
            "request:ping",
        ]
    );
}

#[tokio::test]
async fn test_publish_without_reply_sends_nothing() {
    let mut tc = TestConnection::new();
    tc.init("run-1").await;

    tc.send(ServerRequest::publish(history(1, None))).await.unwrap();
    tc.send(ServerRequest::publish(request(2, RequestType::Keepalive)))
        .await
        .unwrap();

    // The first response on the wire belongs to the ping.
    tc.sync(3).await;
    assert!(tc.responses.try_recv().is_err());
}

#[tokio::test]
async fn test_publish_request_with_reply_is_answered() {
    let mut tc = TestConnection::new();
    tc.init("run-1").await;

    tc.send(ServerRequest::publish(ping(1))).await.unwrap();
    assert_eq!(tc.next_response().await, pong(1));
}

// ===== RecordCommunicate =====

#[tokio::test]
async fn test_communicate_result_echoes_correlation_fields() {
    let mut tc = TestConnection::new();
    tc.init("run-1").await;

    let mut record = ping(0);
    record.num = 42;
    record.uuid = "corr-7".into();
    tc.send(ServerRequest::communicate(record)).await.unwrap();

    assert_eq!(
        tc.next_response().await,
        ServerResponse::ResultCommunicate(RecordResult {
            num: 42,
            uuid: "corr-7".into(),
            response: Some(Response::Pong),
        })
    );
}

#[tokio::test]
async fn test_communicate_always_answers() {
    let mut tc = TestConnection::new();
    tc.init("run-1").await;

    tc.send(ServerRequest::communicate(request(1, RequestType::Keepalive)))
        .await
        .unwrap();
    tc.send(ServerRequest::communicate(request(
        2,
        RequestType::Defer(DeferRequest { state: 3 }),
    )))
    .await
    .unwrap();

    match tc.next_response().await {
        ServerResponse::ResultCommunicate(result) => {
            assert_eq!(result.num, 1);
            assert_eq!(result.response, None);
        }
        other => panic!("expected a result, got {other:?}"),
    }
    match tc.next_response().await {
        ServerResponse::ResultCommunicate(result) => {
            assert_eq!(result.num, 2);
            assert_eq!(result.response, Some(Response::Defer));
        }
        other => panic!("expected a result, got {other:?}"),
    }
}

#[tokio::test]
async fn test_communicate_non_request_is_protocol_violation() {
    let mut tc = TestConnection::new();
    tc.init("run-1").await;

    for record in [history(1, Some(0)), run(2, "abc"), exit(3, 0)] {
        let err = tc
            .send(ServerRequest::communicate(record))
            .await
            .unwrap_err();
        assert!(matches!(err, NexusError::ProtocolViolation(_)), "{err:?}");
        assert!(err.is_fatal());
    }

    tc.sync(4).await;
    assert_eq!(tc.recorder.events(), vec!["request:ping"]);
}

#[tokio::test]
async fn test_request_handler_failure_becomes_error_frame() {
    let mut tc = TestConnection::new();
    tc.init("run-1").await;

    tc.send(ServerRequest::communicate(request(1, RequestType::GetSummary)))
        .await
        .unwrap();

    match tc.next_response().await {
        ServerResponse::Error { message } => assert!(message.contains("get_summary")),
        other => panic!("expected an error frame, got {other:?}"),
    }
    // The stream keeps serving after a failed request.
    tc.sync(2).await;
}

// ===== Malformed records =====

#[tokio::test]
async fn test_record_without_type_is_protocol_violation() {
    let mut tc = TestConnection::new();
    tc.init("run-1").await;

    let record = Record {
        num: 1,
        ..Record::default()
    };
    let err = tc
        .send(ServerRequest::publish(record))
        .await
        .unwrap_err();
    assert!(matches!(err, NexusError::ProtocolViolation(_)));
}

#[tokio::test]
async fn test_request_without_type_is_protocol_violation() {
    let mut tc = TestConnection::new();
    tc.init("run-1").await;

    let record = Record::new(1, "", RecordType::Request(Request::default()));
    for request in [
        ServerRequest::publish(record.clone()),
        ServerRequest::communicate(record),
    ] {
        let err = tc.send(request).await.unwrap_err();
        assert!(matches!(err, NexusError::ProtocolViolation(_)));
    }
    assert!(tc.recorder.events().is_empty());
}

// ===== Lost transport =====

#[tokio::test]
async fn test_records_after_lost_transport_fail_the_connection() {
    let mut tc = TestConnection::new();
    tc.init("run-1").await;
    let transport_lost = tc.conn.transport_lost().expect("stream exists after init");
    tc.responses.close();

    tc.send(ServerRequest::communicate(ping(1))).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), transport_lost.cancelled())
        .await
        .expect("responder should report the failed write");

    let err = tc
        .send(ServerRequest::publish(history(2, Some(2))))
        .await
        .unwrap_err();
    assert_eq!(err, NexusError::TransportClosed);
    assert!(err.is_fatal());
    // Losing the transport is not a teardown.
    assert!(!tc.conn.signals().is_torn_down());
    assert_eq!(tc.server.close_listener_count(), 0);
}
