// tests/integration/shutdown_test.rs

//! Integration tests for teardown coordination
//! Tests: ConnectionSignals idempotence under concurrency, the listener close
//! guard and the server registry.

use super::test_helpers::*;
use nexus::config::Config;
use nexus::connection::{ConnectionSignals, TeardownOrigin};
use nexus::core::collaborators::Handlers;
use nexus::core::state::ServerState;
use nexus::server::{ServerControl, ServerShutdown};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_concurrent_teardown_runs_sequence_once() {
    let server = Arc::new(CountingServer::default());
    let signals = Arc::new(ConnectionSignals::new(
        7,
        CancellationToken::new(),
        server.clone(),
    ));

    let mut tasks = Vec::new();
    for i in 0..32 {
        let signals = signals.clone();
        let origin = if i % 2 == 0 {
            TeardownOrigin::Client
        } else {
            TeardownOrigin::Server
        };
        tasks.push(tokio::spawn(async move { signals.teardown(origin) }));
    }

    let mut winners = 0;
    for task in tasks {
        if task.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
    assert_eq!(server.mark_shutdown_count(), 1);
    assert_eq!(server.close_listener_count(), 1);
    assert!(signals.is_done());
    assert!(signals.cancellation().is_cancelled());
}

#[tokio::test]
async fn test_wait_done_resolves_after_teardown() {
    let server = Arc::new(CountingServer::default());
    let signals = Arc::new(ConnectionSignals::new(
        1,
        CancellationToken::new(),
        server,
    ));

    let waiter = {
        let signals = signals.clone();
        tokio::spawn(async move { signals.wait_done().await })
    };
    assert!(!signals.is_done());
    signals.teardown(TeardownOrigin::Client);

    tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .expect("wait_done should resolve")
        .unwrap();
}

#[tokio::test]
async fn test_listener_closes_once_across_connections() {
    let shutdown = Arc::new(ServerShutdown::new());
    assert!(!shutdown.is_shutting_down());
    assert!(!shutdown.is_listener_closed());

    let connections: Vec<_> = (0..16)
        .map(|session_id| {
            Arc::new(ConnectionSignals::new(
                session_id,
                CancellationToken::new(),
                shutdown.clone(),
            ))
        })
        .collect();

    let tasks: Vec<_> = connections
        .iter()
        .cloned()
        .map(|signals| tokio::spawn(async move { signals.teardown(TeardownOrigin::Client) }))
        .collect();
    for task in tasks {
        // Every connection runs its own sequence once.
        assert!(task.await.unwrap());
    }

    assert!(shutdown.is_shutting_down());
    assert!(shutdown.is_listener_closed());
    tokio::time::timeout(Duration::from_secs(1), shutdown.listener_closed())
        .await
        .expect("listener_closed should resolve");

    // Further calls are harmless.
    shutdown.close_listener();
    shutdown.mark_shutdown();
    assert!(shutdown.is_listener_closed());
}

#[tokio::test]
async fn test_connection_token_is_child_of_server_token() {
    let state = ServerState::new(Config::default(), Handlers::default());
    let signals = state.register_connection(3);
    assert_eq!(state.connection_count(), 1);

    state.shutdown_token.cancel();
    assert!(signals.cancellation().is_cancelled());
    // Cancellation alone is not a teardown.
    assert!(!signals.is_torn_down());
    assert!(!state.shutdown.is_listener_closed());
}

#[tokio::test]
async fn test_teardown_of_one_connection_leaves_siblings_running() {
    let state = ServerState::new(Config::default(), Handlers::default());
    let first = state.register_connection(1);
    let second = state.register_connection(2);

    assert!(first.teardown(TeardownOrigin::Client));

    assert!(first.cancellation().is_cancelled());
    assert!(!second.cancellation().is_cancelled());
    assert!(!second.is_torn_down());
    // The listener still closes: a client teardown ends the daemon.
    assert!(state.shutdown.is_listener_closed());

    assert_eq!(state.teardown_all(), 1);
    assert!(second.is_torn_down());
}

#[test]
fn test_listener_closed_wakes_waiter() {
    let shutdown = ServerShutdown::new();
    let mut closed = tokio_test::task::spawn(shutdown.listener_closed());
    tokio_test::assert_pending!(closed.poll());

    shutdown.close_listener();
    assert!(closed.is_woken());
    tokio_test::assert_ready!(closed.poll());
}
