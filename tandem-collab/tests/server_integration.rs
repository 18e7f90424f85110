//! End-to-end tests over real WebSocket connections.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tandem_collab::protocol::{decode_batch, encode_batch, ClientMessage, ServerMessage};
use tandem_collab::registry::Registry;
use tandem_collab::storage::MemoryStore;
use tandem_collab::user::{Permissions, UserId};
use tandem_collab::{CollabServer, ServerConfig};
use tandem_core::Op;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{timeout, Duration};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Start a server on a free port. Returns its address and registry.
async fn start_test_server(config: ServerConfig) -> (SocketAddr, Arc<Registry>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = CollabServer::new(config, Arc::new(MemoryStore::new()))
        .await
        .unwrap();
    let registry = server.registry().clone();
    tokio::spawn(async move {
        server.serve(listener).await.unwrap();
    });
    (addr, registry)
}

async fn connect(addr: SocketAddr) -> Socket {
    let (socket, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
        .await
        .unwrap();
    socket
}

async fn send(socket: &mut Socket, batch: &[ClientMessage]) {
    let bytes = encode_batch(batch).unwrap();
    socket.send(Message::Binary(bytes.into())).await.unwrap();
}

/// Read frames until `pick` accepts a message.
async fn expect<T>(socket: &mut Socket, mut pick: impl FnMut(&ServerMessage) -> Option<T>) -> T {
    let read = async {
        while let Some(frame) = socket.next().await {
            if let Message::Binary(data) = frame.unwrap() {
                for message in decode_batch::<ServerMessage>(&data).unwrap() {
                    if let Some(found) = pick(&message) {
                        return found;
                    }
                }
            }
        }
        panic!("connection closed before the expected message");
    };
    timeout(Duration::from_secs(2), read)
        .await
        .expect("timed out waiting for a message")
}

async fn join_as_guest(socket: &mut Socket, pad: &str) -> UserId {
    send(
        socket,
        &[
            ClientMessage::GuestLogin,
            ClientMessage::EnterPad { name: pad.into() },
        ],
    )
    .await;
    let id = expect(socket, |message| match message {
        ServerMessage::Auth { user_id, .. } => Some(*user_id),
        _ => None,
    })
    .await;
    expect(socket, |message| {
        matches!(message, ServerMessage::Document { .. }).then_some(())
    })
    .await;
    id
}

#[tokio::test]
async fn test_guest_edit_reaches_other_client() {
    let (addr, registry) = start_test_server(ServerConfig::for_testing()).await;
    let mut ann = connect(addr).await;
    let mut bob = connect(addr).await;
    let ann_id = join_as_guest(&mut ann, "notes").await;
    join_as_guest(&mut bob, "notes").await;

    send(
        &mut ann,
        &[ClientMessage::Delta {
            base_revision: 0,
            ops: vec![Op::insert("hello")],
        }],
    )
    .await;

    let (id, user_id, text) = expect(&mut bob, |message| match message {
        ServerMessage::Delta { id, user_id, ops } => Some((*id, *user_id, ops.text())),
        _ => None,
    })
    .await;
    assert_eq!((id, user_id, text.as_str()), (1, ann_id, "hello"));

    let pad = registry.existing_pad("notes").await.unwrap();
    assert_eq!(pad.document().await.document.text(), "hello");
}

#[tokio::test]
async fn test_disconnect_is_announced() {
    let (addr, registry) = start_test_server(ServerConfig::for_testing()).await;
    let mut ann = connect(addr).await;
    let mut bob = connect(addr).await;
    join_as_guest(&mut ann, "notes").await;
    let bob_id = join_as_guest(&mut bob, "notes").await;

    bob.close(None).await.unwrap();
    let left = expect(&mut ann, |message| match message {
        ServerMessage::UserLeave { id } => Some(*id),
        _ => None,
    })
    .await;
    assert_eq!(left, bob_id);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(registry.client_count().await, 1);
}

#[tokio::test]
async fn test_undecodable_frame_closes_connection() {
    let (addr, registry) = start_test_server(ServerConfig::for_testing()).await;
    let mut socket = connect(addr).await;
    socket
        .send(Message::Binary(vec![0xff, 0xff, 0xff].into()))
        .await
        .unwrap();

    let closed = timeout(Duration::from_secs(2), async {
        loop {
            match socket.next().await {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(closed.is_ok());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(registry.client_count().await, 0);
}

#[tokio::test]
async fn test_oversized_frame_closes_connection() {
    let config = ServerConfig {
        max_message_size: 1024,
        ..ServerConfig::for_testing()
    };
    let (addr, registry) = start_test_server(config).await;
    let mut socket = connect(addr).await;
    join_as_guest(&mut socket, "notes").await;

    // Any send error just means the server hung up first.
    let _ = socket.send(Message::Binary(vec![0u8; 4096].into())).await;
    let closed = timeout(Duration::from_secs(2), async {
        loop {
            match socket.next().await {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(closed.is_ok());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(registry.client_count().await, 0);
}

#[tokio::test]
async fn test_idle_connection_gets_pings() {
    let config = ServerConfig {
        heartbeat_interval: Duration::from_millis(100),
        ..ServerConfig::for_testing()
    };
    let (addr, _registry) = start_test_server(config).await;
    let mut socket = connect(addr).await;

    let ping = timeout(Duration::from_secs(2), async {
        loop {
            if let Some(Ok(Message::Ping(_))) = socket.next().await {
                break;
            }
        }
    })
    .await;
    assert!(ping.is_ok());
}

#[tokio::test]
async fn test_moderators_see_forwarded_address() {
    let config = ServerConfig {
        trust_forwarded_for: true,
        ..ServerConfig::for_testing()
    };
    let (addr, registry) = start_test_server(config).await;

    let mut moderator = connect(addr).await;
    send(
        &mut moderator,
        &[ClientMessage::Register {
            email: "mod@x.io".into(),
            password: "pw".into(),
            nickname: "mod".into(),
        }],
    )
    .await;
    let moderator_id = expect(&mut moderator, |message| match message {
        ServerMessage::Auth { user_id, .. } => Some(*user_id),
        _ => None,
    })
    .await;
    registry.user(moderator_id).await.unwrap().write().perms |= Permissions::MOD;
    send(&mut moderator, &[ClientMessage::EnterPad { name: "notes".into() }]).await;
    expect(&mut moderator, |message| {
        matches!(message, ServerMessage::Document { .. }).then_some(())
    })
    .await;

    let mut request = format!("ws://{addr}").into_client_request().unwrap();
    let headers = request.headers_mut();
    headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7, 10.0.0.1"));
    headers.insert("user-agent", HeaderValue::from_static("viewer/1.0"));
    let (mut visitor, _) = tokio_tungstenite::connect_async(request).await.unwrap();
    let visitor_id = join_as_guest(&mut visitor, "notes").await;

    let info = expect(&mut moderator, |message| match message {
        ServerMessage::UserInfo(info) if info.id == visitor_id => Some(info.clone()),
        _ => None,
    })
    .await;
    assert_eq!(info.ip.as_deref(), Some("203.0.113.7"));
    assert_eq!(info.user_agent.as_deref(), Some("viewer/1.0"));
}
