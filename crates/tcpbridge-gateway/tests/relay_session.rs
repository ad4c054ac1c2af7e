//! Relay session behaviour against an in-memory remote.
//!
//! `MockConnector` hands out `tokio::io::duplex` pairs; the far end goes to the
//! test as the "server". Its STARTTLS upgrade runs a tiny handshake over the
//! same stream, so a read pump left running on the old generation would steal
//! the handshake reply and the upgrade would fail.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;
use tokio::time::timeout;

use tcpbridge_core::error::{BridgeError, Result};
use tcpbridge_core::protocol::{Command, RelayEvent};
use tcpbridge_gateway::config::{RelaySection, StartTlsPolicy};
use tcpbridge_gateway::obs::GatewayMetrics;
use tcpbridge_gateway::relay::{EventSink, LinkState, RelayHandle, RelaySession};
use tcpbridge_gateway::remote::{Connector, RemoteStream, Target, TlsMode};

const WAIT: Duration = Duration::from_secs(2);
const HELLO: &[u8] = b"<client-hello>";
const FINISHED: &[u8] = b"<server-finished>";

#[derive(Default)]
struct MockConnector {
    peers: Mutex<Option<mpsc::UnboundedSender<DuplexStream>>>,
    connects: AtomicUsize,
    upgrades: AtomicUsize,
    modes: Mutex<Vec<TlsMode>>,
    reject_upgrade: bool,
    /// Duplex buffer size; 0 means 64 KiB.
    pipe_bytes: usize,
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, target: &Target, mode: TlsMode) -> Result<RemoteStream> {
        if target.host.ends_with(".blackhole") {
            std::future::pending::<()>().await;
        }
        if target.host.ends_with(".invalid") {
            return Err(BridgeError::transport(&format!("TCP connect to {target} failed"), "no route"));
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.modes.lock().unwrap().push(mode);

        let size = if self.pipe_bytes == 0 { 64 * 1024 } else { self.pipe_bytes };
        let (local, remote) = tokio::io::duplex(size);
        if let Some(tx) = self.peers.lock().unwrap().as_ref() {
            let _ = tx.send(remote);
        }
        Ok(Box::new(local))
    }

    async fn upgrade(&self, mut stream: RemoteStream, target: &Target) -> Result<RemoteStream> {
        self.upgrades.fetch_add(1, Ordering::SeqCst);
        if self.reject_upgrade {
            return Err(BridgeError::Tls(format!("handshake with {} failed: alert", target.host)));
        }
        stream
            .write_all(HELLO)
            .await
            .map_err(|e| BridgeError::Tls(e.to_string()))?;
        let mut reply = vec![0u8; FINISHED.len()];
        stream
            .read_exact(&mut reply)
            .await
            .map_err(|e| BridgeError::Tls(e.to_string()))?;
        if reply != FINISHED {
            return Err(BridgeError::Tls("unexpected handshake reply".into()));
        }
        Ok(stream)
    }
}

struct Harness {
    session: RelaySession,
    events: mpsc::Receiver<RelayEvent>,
    peers: mpsc::UnboundedReceiver<DuplexStream>,
    connector: Arc<MockConnector>,
    metrics: Arc<GatewayMetrics>,
}

fn harness_with(settings: RelaySection, reject_upgrade: bool) -> Harness {
    let (peer_tx, peers) = mpsc::unbounded_channel();
    let connector = Arc::new(MockConnector {
        peers: Mutex::new(Some(peer_tx)),
        reject_upgrade,
        ..MockConnector::default()
    });
    let (tx, events) = mpsc::channel(256);
    let metrics = Arc::new(GatewayMetrics::default());
    let session = RelaySession::new(
        "test",
        connector.clone(),
        settings,
        EventSink::new(tx),
        metrics.clone(),
    );
    Harness { session, events, peers, connector, metrics }
}

fn harness() -> Harness {
    harness_with(RelaySection::default(), false)
}

fn connect(host: &str, port: u16) -> Command {
    Command::Connect { host: host.into(), port }
}

fn write(b: &[u8]) -> Command {
    Command::Write(Bytes::copy_from_slice(b))
}

impl Harness {
    async fn next_event(&mut self) -> RelayEvent {
        timeout(WAIT, self.events.recv())
            .await
            .expect("timed out waiting for relay event")
            .expect("event channel closed")
    }

    async fn next_peer(&mut self) -> DuplexStream {
        timeout(WAIT, self.peers.recv()).await.expect("no peer").expect("peer channel closed")
    }

    /// Give pumps a moment, then assert nothing else was emitted.
    async fn assert_quiet(&mut self) {
        tokio::time::sleep(Duration::from_millis(50)).await;
        if let Ok(ev) = self.events.try_recv() {
            panic!("unexpected event: {ev:?}");
        }
    }

    async fn connected(&mut self, port: u16) -> DuplexStream {
        self.session.dispatch(connect("mx.example.com", port)).await;
        assert_eq!(self.next_event().await, RelayEvent::ConnectSuccess);
        self.next_peer().await
    }
}

async fn read_n(peer: &mut DuplexStream, n: usize) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    timeout(WAIT, peer.read_exact(&mut buf)).await.unwrap().unwrap();
    buf
}

/// Answer the mock handshake and then keep talking TLS-side.
fn serve_handshake(mut peer: DuplexStream, after: &'static [u8]) -> tokio::task::JoinHandle<DuplexStream> {
    tokio::spawn(async move {
        let hello = read_n(&mut peer, HELLO.len()).await;
        assert_eq!(hello, HELLO);
        peer.write_all(FINISHED).await.unwrap();
        if !after.is_empty() {
            peer.write_all(after).await.unwrap();
        }
        peer
    })
}

#[tokio::test]
async fn write_while_idle_is_rejected() {
    let mut h = harness();
    h.session.dispatch(write(b"EHLO x\r\n")).await;

    assert_eq!(h.next_event().await, RelayEvent::error("Not connected"));
    assert_eq!(h.connector.connects.load(Ordering::SeqCst), 0);
    assert_eq!(h.session.state(), LinkState::Idle);
    h.assert_quiet().await;
}

#[tokio::test]
async fn starttls_while_idle_is_rejected() {
    let mut h = harness();
    let before = h.session.snapshot();
    h.session.dispatch(Command::StartTls).await;

    assert_eq!(h.next_event().await, RelayEvent::error("Not connected for STARTTLS"));
    assert_eq!(h.session.snapshot(), before);
    assert_eq!(h.connector.upgrades.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unknown_command_keeps_state() {
    let mut h = harness();
    let _peer = h.connected(25).await;
    let before = h.session.snapshot();

    h.session.dispatch(Command::Unknown("udp_send".into())).await;
    assert_eq!(h.next_event().await, RelayEvent::error("Unknown command: udp_send"));
    assert_eq!(h.session.snapshot(), before);
}

#[tokio::test]
async fn second_connect_is_rejected_without_side_effects() {
    let mut h = harness();
    let _peer = h.connected(25).await;
    let before = h.session.snapshot();

    h.session.dispatch(connect("other.example.com", 25)).await;
    assert_eq!(h.next_event().await, RelayEvent::error("Already connected"));
    assert_eq!(h.session.snapshot(), before);
    assert_eq!(h.connector.connects.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn close_then_connect_again() {
    let mut h = harness();
    let mut peer = h.connected(25).await;
    assert_eq!(h.session.snapshot().generation, Some(1));

    h.session.dispatch(Command::Close).await;
    assert_eq!(h.session.state(), LinkState::Idle);
    // Remote side sees an orderly close.
    let mut rest = Vec::new();
    timeout(WAIT, peer.read_to_end(&mut rest)).await.unwrap().unwrap();
    assert!(rest.is_empty());

    let _peer = h.connected(25).await;
    assert_eq!(h.session.state(), LinkState::Plaintext);
    assert_eq!(h.session.snapshot().generation, Some(2));
    h.assert_quiet().await;
}

#[tokio::test]
async fn byte_order_is_preserved_both_ways() {
    let mut h = harness();
    let mut peer = h.connected(25).await;

    let writes: [&[u8]; 4] = [b"MAIL FROM:<a@x>\r\n", b"RCPT TO:<b@y>\r\n", b"\x00\xff\x10", b"DATA\r\n"];
    for w in writes {
        h.session.dispatch(write(w)).await;
    }
    let expected: Vec<u8> = writes.concat();
    assert_eq!(read_n(&mut peer, expected.len()).await, expected);

    let replies: [&[u8]; 3] = [b"250 ok\r\n", b"250 accepted\r\n", b"354 go ahead\r\n"];
    for r in replies {
        peer.write_all(r).await.unwrap();
        assert_eq!(h.next_event().await, RelayEvent::Data(Bytes::copy_from_slice(r)));
    }
    h.assert_quiet().await;
}

#[tokio::test]
async fn submission_starttls_scenario() {
    let mut h = harness();
    let mut peer = h.connected(587).await;
    assert_eq!(h.connector.modes.lock().unwrap().as_slice(), &[TlsMode::DeferredUpgrade]);
    let gauge = h.session.pump_gauge();

    h.session.dispatch(write(b"EHLO x\r\n")).await;
    assert_eq!(read_n(&mut peer, 8).await, b"EHLO x\r\n");
    peer.write_all(b"250-mx.example.com\r\n250 STARTTLS\r\n").await.unwrap();
    assert_eq!(
        h.next_event().await,
        RelayEvent::Data(Bytes::from_static(b"250-mx.example.com\r\n250 STARTTLS\r\n"))
    );

    h.session.dispatch(write(b"STARTTLS\r\n")).await;
    assert_eq!(read_n(&mut peer, 10).await, b"STARTTLS\r\n");
    peer.write_all(b"220 ready\r\n").await.unwrap();
    assert_eq!(h.next_event().await, RelayEvent::Data(Bytes::from_static(b"220 ready\r\n")));

    let server = serve_handshake(peer, b"250 secure hello\r\n");
    h.session.dispatch(Command::StartTls).await;
    let mut peer = server.await.unwrap();

    assert_eq!(h.next_event().await, RelayEvent::StartTlsSuccess);
    assert_eq!(h.next_event().await, RelayEvent::Data(Bytes::from_static(b"250 secure hello\r\n")));

    let snap = h.session.snapshot();
    assert_eq!(snap.state, LinkState::Tls);
    assert_eq!(snap.generation, Some(2));
    assert!(snap.has_writer && snap.has_reader);
    assert_eq!(h.connector.upgrades.load(Ordering::SeqCst), 1);
    assert_eq!(gauge.live(), 1);
    assert_eq!(gauge.peak(), 1);
    assert_eq!(gauge.started(), 2);
    assert_eq!(h.metrics.starttls.get(&[("result", "ok")]), 1);

    // The new writer is bound to the upgraded stream.
    h.session.dispatch(write(b"QUIT\r\n")).await;
    assert_eq!(read_n(&mut peer, 6).await, b"QUIT\r\n");
    h.assert_quiet().await;
}

#[tokio::test]
async fn repeated_upgrade_cycles_never_overlap_pumps() {
    let mut h = harness();
    let gauge = h.session.pump_gauge();

    for round in 0..5u64 {
        let peer = h.connected(587).await;
        let server = serve_handshake(peer, b"");
        h.session.dispatch(Command::StartTls).await;
        assert_eq!(h.next_event().await, RelayEvent::StartTlsSuccess);
        let _peer = server.await.unwrap();
        assert_eq!(h.session.snapshot().generation, Some(round * 2 + 2));

        h.session.dispatch(Command::Close).await;
        assert_eq!(gauge.live(), 0);
    }
    assert_eq!(gauge.peak(), 1);
    assert_eq!(gauge.started(), 10);
    h.assert_quiet().await;
}

#[tokio::test]
async fn implicit_tls_is_not_upgraded_twice() {
    let mut h = harness();
    let mut peer = h.connected(465).await;
    assert_eq!(h.connector.modes.lock().unwrap().as_slice(), &[TlsMode::Implicit]);
    assert_eq!(h.session.state(), LinkState::Tls);

    h.session.dispatch(Command::StartTls).await;
    assert_eq!(h.next_event().await, RelayEvent::error("TLS already active"));
    assert_eq!(h.connector.upgrades.load(Ordering::SeqCst), 0);
    assert_eq!(h.session.state(), LinkState::Tls);

    // Still relaying.
    peer.write_all(b"220 smtps\r\n").await.unwrap();
    assert_eq!(h.next_event().await, RelayEvent::Data(Bytes::from_static(b"220 smtps\r\n")));
}

#[tokio::test]
async fn declared_policy_rejects_undeclared_upgrade() {
    let settings = RelaySection {
        starttls_policy: StartTlsPolicy::Declared,
        ..RelaySection::default()
    };
    let mut h = harness_with(settings, false);
    let _peer = h.connected(25).await;

    h.session.dispatch(Command::StartTls).await;
    assert_eq!(h.next_event().await, RelayEvent::error("STARTTLS not expected on port 25"));
    assert_eq!(h.session.state(), LinkState::Plaintext);
    assert_eq!(h.connector.upgrades.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn any_policy_upgrades_undeclared_port() {
    let mut h = harness();
    let peer = h.connected(2525).await;
    let server = serve_handshake(peer, b"");
    h.session.dispatch(Command::StartTls).await;
    assert_eq!(h.next_event().await, RelayEvent::StartTlsSuccess);
    let _peer = server.await.unwrap();
    assert_eq!(h.session.state(), LinkState::Tls);
}

#[tokio::test]
async fn rejected_handshake_reports_and_cleans_up() {
    let mut h = harness_with(RelaySection::default(), true);
    let mut peer = h.connected(587).await;

    h.session.dispatch(Command::StartTls).await;
    match h.next_event().await {
        RelayEvent::Error(msg) => assert!(msg.starts_with("TLS error:"), "{msg}"),
        other => panic!("expected error, got {other:?}"),
    }
    assert_eq!(h.session.state(), LinkState::Idle);
    assert_eq!(h.session.pump_gauge().live(), 0);
    assert_eq!(h.metrics.starttls.get(&[("result", "failed")]), 1);

    let mut rest = Vec::new();
    timeout(WAIT, peer.read_to_end(&mut rest)).await.unwrap().unwrap();
    h.assert_quiet().await;

    // Idle again, so a fresh connect works.
    let _peer = h.connected(587).await;
}

#[tokio::test]
async fn connect_failure_reports_and_stays_idle() {
    let mut h = harness();
    h.session.dispatch(connect("nowhere.invalid", 25)).await;
    match h.next_event().await {
        RelayEvent::Error(msg) => assert!(msg.contains("nowhere.invalid:25"), "{msg}"),
        other => panic!("expected error, got {other:?}"),
    }
    assert_eq!(h.session.state(), LinkState::Idle);
    assert_eq!(h.metrics.relay_errors.get(&[("code", "TRANSPORT")]), 1);
}

#[tokio::test]
async fn remote_eof_reports_closed_but_keeps_link() {
    let mut h = harness();
    let peer = h.connected(25).await;
    drop(peer);

    assert_eq!(h.next_event().await, RelayEvent::Closed);
    // The pump does not tear down the transport; the client decides.
    assert_eq!(h.session.state(), LinkState::Plaintext);

    h.session.dispatch(Command::Close).await;
    assert_eq!(h.session.state(), LinkState::Idle);
    h.assert_quiet().await;
}

#[tokio::test]
async fn cleanup_twice_is_a_no_op() {
    let mut h = harness();
    let _peer = h.connected(587).await;

    for _ in 0..2 {
        h.session.cleanup().await;
        let snap = h.session.snapshot();
        assert_eq!(snap.state, LinkState::Idle);
        assert_eq!(snap.generation, None);
        assert!(!snap.has_writer);
        assert!(!snap.has_reader);
        assert_eq!(h.session.pump_gauge().live(), 0);
    }
    h.assert_quiet().await;
}

#[tokio::test]
async fn mailbox_serializes_and_cleans_up_on_shutdown() {
    let (peer_tx, mut peers) = mpsc::unbounded_channel();
    let connector = Arc::new(MockConnector {
        peers: Mutex::new(Some(peer_tx)),
        ..MockConnector::default()
    });
    let (tx, mut events) = mpsc::channel(64);
    let session = RelaySession::new(
        "mailbox",
        connector.clone(),
        RelaySection::default(),
        EventSink::new(tx),
        Arc::new(GatewayMetrics::default()),
    );
    let handle = RelayHandle::spawn(session, 16);

    handle.send(connect("mx.example.com", 25)).await.unwrap();
    handle.send(write(b"one ")).await.unwrap();
    handle.send(write(b"two ")).await.unwrap();
    handle.send(write(b"three")).await.unwrap();

    assert_eq!(timeout(WAIT, events.recv()).await.unwrap(), Some(RelayEvent::ConnectSuccess));
    let mut peer = timeout(WAIT, peers.recv()).await.unwrap().unwrap();
    assert_eq!(read_n(&mut peer, 13).await, b"one two three");

    handle.shutdown().await;
    let mut rest = Vec::new();
    timeout(WAIT, peer.read_to_end(&mut rest)).await.unwrap().unwrap();
    assert!(rest.is_empty());
    // Session dropped: event queue closes.
    assert_eq!(timeout(WAIT, events.recv()).await.unwrap(), None);
}

fn spawn_mailbox(
    pipe_bytes: usize,
    capacity: usize,
) -> (RelayHandle, mpsc::Receiver<RelayEvent>, mpsc::UnboundedReceiver<DuplexStream>) {
    let (peer_tx, peers) = mpsc::unbounded_channel();
    let connector = Arc::new(MockConnector {
        peers: Mutex::new(Some(peer_tx)),
        pipe_bytes,
        ..MockConnector::default()
    });
    let (tx, events) = mpsc::channel(64);
    let session = RelaySession::new(
        "mailbox",
        connector,
        RelaySection::default(),
        EventSink::new(tx),
        Arc::new(GatewayMetrics::default()),
    );
    (RelayHandle::spawn(session, capacity), events, peers)
}

#[tokio::test]
async fn full_mailbox_waits_instead_of_dropping_writes() {
    let (handle, mut events, mut peers) = spawn_mailbox(16, 4);
    handle.send(connect("mx.example.com", 25)).await.unwrap();
    assert_eq!(timeout(WAIT, events.recv()).await.unwrap(), Some(RelayEvent::ConnectSuccess));
    let mut peer = timeout(WAIT, peers.recv()).await.unwrap().unwrap();

    let chunks: Vec<Vec<u8>> = (b'a'..=b't').map(|c| vec![c; 8]).collect();
    let mut expected: Vec<u8> = chunks.concat();
    expected.extend_from_slice(b"ZZZZ");

    let sender = tokio::spawn(async move {
        for c in chunks {
            handle.send(write(&c)).await.unwrap();
        }
        handle.send(write(b"ZZZZ")).await.unwrap();
        handle
    });

    // The remote is not reading yet: the sender must be held back, not failed.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!sender.is_finished());

    assert_eq!(read_n(&mut peer, expected.len()).await, expected);
    let handle = timeout(WAIT, sender).await.unwrap().unwrap();
    assert!(events.try_recv().is_err());
    handle.shutdown().await;
}

#[tokio::test]
async fn shutdown_interrupts_blocked_write() {
    let (handle, mut events, mut peers) = spawn_mailbox(16, 4);
    handle.send(connect("mx.example.com", 25)).await.unwrap();
    assert_eq!(timeout(WAIT, events.recv()).await.unwrap(), Some(RelayEvent::ConnectSuccess));
    let mut peer = timeout(WAIT, peers.recv()).await.unwrap().unwrap();

    // Far more than the pipe holds; the peer never reads while it is queued.
    handle.send(write(&[b'x'; 1024])).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    timeout(WAIT, handle.shutdown()).await.expect("shutdown hung on a blocked write");

    let mut rest = Vec::new();
    timeout(WAIT, peer.read_to_end(&mut rest)).await.unwrap().unwrap();
    assert!(rest.len() < 1024);
    assert_eq!(timeout(WAIT, events.recv()).await.unwrap(), None);
}

#[tokio::test]
async fn stop_token_interrupts_hung_connect() {
    let (handle, mut events, _peers) = spawn_mailbox(0, 4);
    handle.send(connect("mx.blackhole", 25)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!handle.is_stopped());

    // What the registry does when another client takes over the session id.
    handle.stopper().cancel();
    assert_eq!(timeout(WAIT, events.recv()).await.unwrap(), None);
    timeout(WAIT, async {
        while !handle.is_stopped() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}
