//! End-to-end tests: two sessions talking over a loopback TCP underlay.
//!
//! Each test connects a client and a server `TcpStream`, wraps both in a
//! `TcpUnderlay`, attaches a session to each end and spawns the underlay
//! read loop plus both session loops under one cancellation token.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use reliable_session::{
    Error, Role, Session, SessionConfig, SessionState, SessionTasks, TcpUnderlay, MAX_PDU,
};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const SESSION_ID: u32 = 7;
const TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct Endpoint {
    session: Arc<Session>,
    tasks: SessionTasks,
    reader: JoinHandle<anyhow::Result<()>>,
}

impl Endpoint {
    async fn open(stream: TcpStream, role: Role, config: SessionConfig, cancel: &CancellationToken) -> Self {
        let underlay = Arc::new(TcpUnderlay::new(stream).expect("wrap stream"));
        let session = Arc::new(Session::with_config(SESSION_ID, role, config).expect("session"));
        session.attach(underlay.clone()).expect("attach");
        session.set_state(SessionState::Established).expect("establish");

        let reader = {
            let underlay = Arc::clone(&underlay);
            let inbound = session.inbound();
            let cancel = cancel.clone();
            tokio::spawn(async move { underlay.run_read_loop(inbound, cancel).await })
        };
        let tasks = session.start(cancel.clone());
        Self {
            session,
            tasks,
            reader,
        }
    }

    async fn shutdown(self) {
        self.tasks.join().await.expect("session loops");
        self.reader.await.unwrap().expect("underlay reader");
    }
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Connect a client and a server session over loopback.
async fn connected_pair(config: SessionConfig) -> (Endpoint, Endpoint, CancellationToken) {
    init_logging();
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().unwrap();
    let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());

    let cancel = CancellationToken::new();
    let client = Endpoint::open(client.expect("connect"), Role::Client, config.clone(), &cancel).await;
    let server = Endpoint::open(accepted.expect("accept").0, Role::Server, config, &cancel).await;
    (client, server, cancel)
}

async fn read_message(session: &Session) -> Vec<u8> {
    let mut buf = vec![0u8; MAX_PDU];
    let n = tokio::time::timeout(TIMEOUT, session.read(&mut buf))
        .await
        .expect("read timed out")
        .expect("read failed");
    buf.truncate(n);
    buf
}

fn random_payload(len: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..len).map(|_| rng.gen()).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ping_pong_between_client_and_server() {
    let (client, server, cancel) = connected_pair(SessionConfig::default()).await;

    client.session.write(b"Ping!").await.expect("client write");
    assert_eq!(read_message(&server.session).await, b"Ping!");

    server.session.write(b"Pong!").await.expect("server write");
    assert_eq!(read_message(&client.session).await, b"Pong!");

    assert_eq!(
        client.session.local_addr().unwrap(),
        server.session.remote_addr().unwrap()
    );

    cancel.cancel();
    client.shutdown().await;
    server.shutdown().await;
}

#[tokio::test]
async fn write_boundaries_survive_fragmentation() {
    let (client, server, cancel) = connected_pair(SessionConfig::default()).await;

    let mut rng = rand::thread_rng();
    let mut sizes: Vec<usize> = (0..20).map(|_| rng.gen_range(1..=MAX_PDU)).collect();
    sizes.extend([1, 1286, 1287, MAX_PDU]);
    let messages: Vec<Vec<u8>> = sizes.iter().map(|&n| random_payload(n)).collect();

    for msg in &messages {
        client.session.write(msg).await.expect("write");
    }
    for (i, expected) in messages.iter().enumerate() {
        let got = read_message(&server.session).await;
        assert_eq!(got.len(), expected.len(), "message {i} has the wrong length");
        assert_eq!(&got, expected, "message {i} corrupted");
    }

    cancel.cancel();
    client.shutdown().await;
    server.shutdown().await;
}

#[tokio::test]
async fn short_buffer_then_full_read_returns_the_same_message() {
    let (client, server, cancel) = connected_pair(SessionConfig::default()).await;

    let msg = random_payload(5000);
    client.session.write(&msg).await.unwrap();

    let mut small = [0u8; 100];
    let err = tokio::time::timeout(TIMEOUT, server.session.read(&mut small))
        .await
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, Error::ShortBuffer));

    assert_eq!(read_message(&server.session).await, msg);

    cancel.cancel();
    client.shutdown().await;
    server.shutdown().await;
}

#[tokio::test]
async fn concurrent_writer_and_reader_under_backpressure() {
    const COUNT: usize = 200;
    let config = SessionConfig::default().with_tree_capacity(8).with_chan_capacity(4);
    let (client, server, cancel) = connected_pair(config).await;

    let messages: Arc<Vec<Vec<u8>>> = Arc::new(
        (0..COUNT)
            .map(|i| random_payload(1 + (i * 97) % 6000))
            .collect(),
    );

    let writer = {
        let session = Arc::clone(&client.session);
        let messages = Arc::clone(&messages);
        tokio::spawn(async move {
            for msg in messages.iter() {
                session.write(msg).await.expect("write");
            }
        })
    };

    for (i, expected) in messages.iter().enumerate() {
        let got = read_message(&server.session).await;
        assert_eq!(&got, expected, "message {i} corrupted");
    }
    tokio::time::timeout(TIMEOUT, writer).await.unwrap().unwrap();

    cancel.cancel();
    client.shutdown().await;
    server.shutdown().await;
}

#[tokio::test]
async fn data_from_the_wrong_direction_stops_the_input_loop() {
    init_logging();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (a, b) = tokio::join!(TcpStream::connect(addr), listener.accept());

    // Both ends claim to be clients: each one's data is client-to-server.
    let cancel = CancellationToken::new();
    let sender = Endpoint::open(a.unwrap(), Role::Client, SessionConfig::default(), &cancel).await;
    let victim = Endpoint::open(b.unwrap().0, Role::Client, SessionConfig::default(), &cancel).await;

    sender.session.write(b"wrong way").await.unwrap();

    let err = tokio::time::timeout(TIMEOUT, victim.tasks.input)
        .await
        .expect("input loop should stop")
        .unwrap()
        .unwrap_err();
    let rejected = err
        .chain()
        .any(|cause| matches!(cause.downcast_ref::<Error>(), Some(Error::InvalidArgument(_))));
    assert!(rejected, "unexpected error: {err:#}");

    cancel.cancel();
    victim.tasks.output.await.unwrap().unwrap();
    sender.shutdown().await;
}

#[tokio::test]
async fn close_stops_the_session_but_not_the_peer() {
    let (client, server, cancel) = connected_pair(SessionConfig::default()).await;

    client.session.write(b"last words").await.unwrap();
    assert_eq!(read_message(&server.session).await, b"last words");

    client.session.close().await.unwrap();
    client.session.close().await.unwrap();
    assert_eq!(client.session.state(), SessionState::Closed);
    assert!(matches!(client.session.write(b"x").await, Err(Error::Closed)));

    tokio::time::timeout(TIMEOUT, client.tasks.join())
        .await
        .expect("client loops should stop after close")
        .unwrap();

    // The server session is untouched by the client's close.
    assert_eq!(server.session.state(), SessionState::Established);
    server.session.write(b"still here").await.unwrap();

    cancel.cancel();
    client.reader.await.unwrap().unwrap();
    server.shutdown().await;
}
