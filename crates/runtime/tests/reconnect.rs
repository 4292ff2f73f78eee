//! Reconnect-policy tests against real TCP peers.

use std::sync::Arc;
use std::time::Duration;
use switchboard_protocol::testing::MockFactory;
use switchboard_protocol::Session;
use switchboard_runtime::{ClientEvent, ConnectOptions, ConnectState, Switchboard};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};

async fn recv(rx: &mut mpsc::UnboundedReceiver<ClientEvent>) -> ClientEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for client event")
        .expect("client event channel closed")
}

fn board() -> (Arc<MockFactory>, Switchboard) {
    let factory = MockFactory::new();
    (factory.clone(), Switchboard::new(factory))
}

#[tokio::test]
async fn clean_stream_end_triggers_reconnect_with_a_fresh_session() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (hold_tx, hold_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        // First accept ends immediately; the client should come back and
        // get a connection that stays up.
        let (first, _) = listener.accept().await.unwrap();
        drop(first);
        let (_second, _) = listener.accept().await.unwrap();
        let _ = hold_rx.await;
    });

    let (factory, board) = board();
    let handle = board.connect(
        ConnectOptions::tcp("127.0.0.1", addr.port()).reconnect(Duration::from_millis(20)),
    );
    let mut events = handle.take_events().unwrap();

    assert_eq!(recv(&mut events).await, ClientEvent::Connected);
    assert_eq!(recv(&mut events).await, ClientEvent::Dropped);
    assert_eq!(recv(&mut events).await, ClientEvent::Reconnecting);
    assert_eq!(recv(&mut events).await, ClientEvent::Connected);

    // Each attempt got its own session.
    assert_eq!(factory.wait_for_sessions(2).await.len(), 2);

    handle.terminate();
    loop {
        if recv(&mut events).await == ClientEvent::Ended {
            break;
        }
    }
    drop(hold_tx);
}

#[tokio::test]
async fn terminate_while_waiting_cancels_the_pending_reconnect() {
    // A port that was just bound and released refuses connections.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let (_factory, board) = board();
    let handle = board.connect(
        ConnectOptions::tcp("127.0.0.1", port).reconnect(Duration::from_secs(30)),
    );
    let mut events = handle.take_events().unwrap();

    // The long interval parks the machine in the waiting state.
    assert_eq!(recv(&mut events).await, ClientEvent::Refused);
    let mut state = handle.state_stream();
    assert_eq!(*state.borrow_and_update(), ConnectState::Refused);

    handle.terminate();
    assert_eq!(recv(&mut events).await, ClientEvent::Ended);
    assert!(events.recv().await.is_none());
    assert_eq!(handle.state(), ConnectState::Terminated);
}

#[tokio::test]
async fn facade_reports_connect_with_the_session_id() {
    use switchboard_runtime::SwitchboardEvent;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (hold_tx, hold_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        let (_stream, _) = listener.accept().await.unwrap();
        let _ = hold_rx.await;
    });

    let (factory, board) = board();
    let mut events = board.take_events().unwrap();
    let handle = board.connect(ConnectOptions::tcp("127.0.0.1", addr.port()));

    let sessions = factory.wait_for_sessions(1).await;
    let connected = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap()
        .unwrap();
    match connected {
        SwitchboardEvent::Connect(id) => assert_eq!(id, sessions[0].id()),
        other => panic!("expected connect, got {other:?}"),
    }

    handle.terminate();
    drop(hold_tx);
}
