//! End-to-end lifecycle tests over real TCP sockets and WebSocket mounts.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use switchboard_protocol::testing::{MockFactory, TestHandler};
use switchboard_runtime::{
    BoxedStream, ConnectOptions, ListenOptions, StreamAcceptor, Switchboard, SwitchboardEvent,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

async fn recv<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

fn board() -> (Arc<MockFactory>, Switchboard) {
    let factory = MockFactory::new();
    (factory.clone(), Switchboard::new(factory))
}

/// Acceptor wrapping a pre-bound TCP listener, so tests can learn the port
/// before handing the socket to the facade.
struct TcpAcceptor(TcpListener);

impl StreamAcceptor for TcpAcceptor {
    fn accept(
        &mut self,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = std::io::Result<BoxedStream>> + Send + '_>,
    > {
        Box::pin(async move {
            let (stream, _) = self.0.accept().await?;
            Ok(Box::new(stream) as BoxedStream)
        })
    }
}

#[tokio::test]
async fn tcp_listener_reports_ready_and_parses_lines_in_order() {
    let (factory, board) = board();
    let mut events = board.take_events().unwrap();

    let id = board
        .listen(ListenOptions::tcp("127.0.0.1", 0))
        .await
        .unwrap();
    let addr = match recv(&mut events).await {
        SwitchboardEvent::Ready { id: got, addr } => {
            assert_eq!(got, id);
            addr
        }
        other => panic!("expected ready, got {other:?}"),
    };

    let mut peer = TcpStream::connect(addr).await.unwrap();
    peer.write_all(b"alpha\nbravo\n").await.unwrap();
    peer.write_all(b"charlie\n").await.unwrap();

    let sessions = factory.wait_for_sessions(1).await;
    assert_eq!(
        sessions[0].wait_for_parsed(3).await,
        vec!["alpha", "bravo", "charlie"]
    );
    assert!(sessions[0].started());
}

#[tokio::test]
async fn caller_supplied_acceptor_feeds_server_connections() {
    let (factory, board) = board();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    board
        .listen(ListenOptions::acceptor(TcpAcceptor(listener)))
        .await
        .unwrap();

    let mut peer = TcpStream::connect(addr).await.unwrap();
    peer.write_all(b"ping\n").await.unwrap();

    let sessions = factory.wait_for_sessions(1).await;
    assert_eq!(sessions[0].wait_for_parsed(1).await, vec!["ping"]);
}

#[tokio::test]
async fn end_closes_every_server_connection_and_signals_end() {
    let (factory, board) = board();
    let mut events = board.take_events().unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    board
        .listen(ListenOptions::acceptor(TcpAcceptor(listener)))
        .await
        .unwrap();

    let mut first = TcpStream::connect(addr).await.unwrap();
    let mut second = TcpStream::connect(addr).await.unwrap();
    first.write_all(b"one\n").await.unwrap();
    second.write_all(b"two\n").await.unwrap();
    let sessions = factory.wait_for_sessions(2).await;
    for session in &sessions {
        session.wait_for_parsed(1).await;
    }

    board.end();
    assert!(matches!(recv(&mut events).await, SwitchboardEvent::End));

    // Both peers observe EOF once their connections shut down.
    let mut buf = Vec::new();
    first.read_to_end(&mut buf).await.unwrap();
    second.read_to_end(&mut buf).await.unwrap();
    assert!(buf.is_empty());
}

#[tokio::test]
async fn middleware_runs_once_per_session_for_both_roles() {
    let (factory, board) = board();
    board.use_middleware(|local, _remote, _session| {
        if let Some(handler) = local.downcast_ref::<TestHandler>() {
            handler.tag("mw");
        }
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    board
        .listen(ListenOptions::acceptor(TcpAcceptor(listener)))
        .await
        .unwrap();

    let handle = board.connect(ConnectOptions::tcp("127.0.0.1", addr.port()));

    // One client-role and one server-role session, each wired exactly once.
    let sessions = factory.wait_for_sessions(2).await;
    for session in &sessions {
        assert_eq!(session.local_handler().tags(), vec!["mw"]);
    }
    handle.terminate();
}

#[tokio::test]
async fn close_fires_once_after_both_listeners_finish() {
    let (_factory, board) = board();
    let mut events = board.take_events().unwrap();

    board
        .listen(ListenOptions::tcp("127.0.0.1", 0))
        .await
        .unwrap();
    board
        .listen(ListenOptions::tcp("127.0.0.1", 0))
        .await
        .unwrap();
    assert!(matches!(
        recv(&mut events).await,
        SwitchboardEvent::Ready { .. }
    ));
    assert!(matches!(
        recv(&mut events).await,
        SwitchboardEvent::Ready { .. }
    ));

    board.close();
    board.close();
    assert!(matches!(recv(&mut events).await, SwitchboardEvent::Close));
    let silence = tokio::time::timeout(Duration::from_millis(100), events.recv()).await;
    assert!(silence.is_err());
}

#[tokio::test]
async fn websocket_mount_accepts_matching_path_and_rejects_others() {
    use futures_util::SinkExt;
    use tokio_tungstenite::connect_async;
    use tokio_tungstenite::tungstenite::Message;

    let (factory, board) = board();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    board
        .listen(ListenOptions::web_server(listener))
        .await
        .unwrap();

    // Wrong path: the upgrade is refused and no session is created.
    let refused = connect_async(format!("ws://{addr}/elsewhere")).await;
    assert!(refused.is_err());
    assert!(factory.sessions().is_empty());

    // Default mount path: text frames join the line discipline.
    let (mut ws, _) = connect_async(format!("ws://{addr}/dnode.js")).await.unwrap();
    ws.send(Message::Text("{\"method\":\"hi\"}\n".to_string()))
        .await
        .unwrap();

    let sessions = factory.wait_for_sessions(1).await;
    assert_eq!(
        sessions[0].wait_for_parsed(1).await,
        vec!["{\"method\":\"hi\"}"]
    );
}
