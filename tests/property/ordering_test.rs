// tests/property/ordering_test.rs

//! Property-based tests for per-connection ordering
//! Records are processed, and their responses delivered, in the order the
//! client sent them.

use crate::test_helpers::*;
use nexus::core::protocol::{Record, RequestType, ServerRequest, ServerResponse};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    PublishHistory,
    PublishOutput,
    PublishPing,
    CommunicatePing,
    CommunicateKeepalive,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::PublishHistory),
        Just(Op::PublishOutput),
        Just(Op::PublishPing),
        Just(Op::CommunicatePing),
        Just(Op::CommunicateKeepalive),
    ]
}

/// Builds the request for `op` and the collaborator event plus whether the
/// client should see a response for it.
fn build(num: i64, op: &Op) -> (ServerRequest, String, bool) {
    match op {
        Op::PublishHistory => (
            ServerRequest::publish(history(num, Some(num))),
            format!("history:{num}"),
            false,
        ),
        Op::PublishOutput => {
            let line = format!("line-{num}");
            (
                ServerRequest::publish(output(num, &line)),
                format!("output:{line}"),
                false,
            )
        }
        Op::PublishPing => (
            ServerRequest::publish(ping(num)),
            "request:ping".to_string(),
            true,
        ),
        Op::CommunicatePing => (
            ServerRequest::communicate(ping(num)),
            "request:ping".to_string(),
            true,
        ),
        Op::CommunicateKeepalive => {
            let record: Record = request(num, RequestType::Keepalive);
            (
                ServerRequest::communicate(record),
                "request:keepalive".to_string(),
                true,
            )
        }
    }
}

fn response_num(response: &ServerResponse) -> i64 {
    match response {
        ServerResponse::ResultCommunicate(result) => result.num,
        other => panic!("unexpected response {other:?}"),
    }
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        ..ProptestConfig::default()
    })]

    #[test]
    fn test_processing_and_responses_follow_send_order(
        ops in prop::collection::vec(op_strategy(), 1..=60),
        capacity in 1usize..=8,
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let config = nexus::config::StreamConfig {
                inbound_capacity: capacity,
                ..Default::default()
            };
            let mut tc = TestConnection::with_config(config);
            tc.init("prop").await;

            let mut expected_events = Vec::new();
            let mut expected_responses = Vec::new();
            for (i, op) in ops.iter().enumerate() {
                let num = i as i64;
                let (request, event, answered) = build(num, op);
                tc.send(request).await.unwrap();
                expected_events.push(event);
                if answered {
                    expected_responses.push(num);
                }
            }

            let mut responses = Vec::new();
            for _ in 0..expected_responses.len() {
                responses.push(response_num(&tc.next_response().await));
            }
            tc.conn.close().await;

            assert_eq!(responses, expected_responses);
            assert_eq!(tc.recorder.events(), expected_events);
            assert!(tc.responses.recv().await.is_none());
        });
    }
}
