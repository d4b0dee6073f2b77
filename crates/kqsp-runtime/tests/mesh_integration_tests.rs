//! Integration Tests for the Mesh Runtime
//!
//! Real runtimes talk to each other over loopback TCP or in-memory pipes.
//! Peers that need to misbehave (sever one direction, send truncated frames,
//! speak the unframed hello) are driven by hand through `FakePeer`.

use std::time::Duration;

use kqsp_core::{
    CipherEngine, Envelope, FrameCodec, GroupKeyDeriver, LocalIdentity, MeshConfig, MeshEvent,
    MeshResult, PeerId,
};
use kqsp_runtime::{BroadcastOutcome, EventStream, MeshRuntime, MeshStream};
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::time::timeout;

// ----------------------------------------------------------------------------
// Test Utilities
// ----------------------------------------------------------------------------

fn create_test_identity(last: u8) -> LocalIdentity {
    LocalIdentity::new([10, 0, 0, last])
}

fn create_test_runtime(last: u8) -> (MeshRuntime, EventStream) {
    let mut runtime = MeshRuntime::with_tcp(create_test_identity(last), MeshConfig::testing())
        .expect("testing config is valid");
    let events = runtime.take_event_stream().expect("event stream not yet taken");
    (runtime, events)
}

async fn next_event(events: &mut EventStream) -> MeshEvent {
    timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("event should arrive within timeout")
        .expect("event stream should stay open")
}

/// Skip events until one matches
async fn wait_for<F>(events: &mut EventStream, mut matches: F) -> MeshEvent
where
    F: FnMut(&MeshEvent) -> bool,
{
    loop {
        let event = next_event(events).await;
        if matches(&event) {
            return event;
        }
    }
}

/// Hand-driven remote end of a mesh connection, one pipe per direction
struct FakePeer {
    to_mesh: DuplexStream,
    from_mesh: DuplexStream,
}

impl FakePeer {
    fn new() -> (MeshStream, FakePeer) {
        let (mesh_writer, from_mesh) = tokio::io::duplex(64 * 1024);
        let (to_mesh, mesh_reader) = tokio::io::duplex(64 * 1024);
        let stream = MeshStream::from_halves(
            Box::new(mesh_reader),
            Box::new(mesh_writer),
            Some("fake".to_string()),
        );
        (stream, FakePeer { to_mesh, from_mesh })
    }

    async fn send_payload(&mut self, payload: &[u8]) {
        let frame = FrameCodec::default().encode(payload).unwrap();
        self.to_mesh.write_all(&frame).await.unwrap();
    }

    async fn send(&mut self, envelope: &Envelope) {
        self.send_payload(&envelope.encode().unwrap()).await;
    }

    async fn recv(&mut self) -> Option<Envelope> {
        let payload = FrameCodec::default()
            .decode_stream(&mut self.from_mesh)
            .await
            .ok()?;
        Some(Envelope::decode(&payload).unwrap())
    }

    /// Send our hello, let the runtime accept us, and read its reply
    async fn join(runtime: &MeshRuntime, id: &str) -> MeshResult<FakePeer> {
        let (stream, mut peer) = FakePeer::new();
        peer.send(&Envelope::hello(PeerId::new(id))).await;
        runtime.accept_stream(stream).await?;
        match peer.recv().await {
            Some(Envelope::Hello { peer_id }) => assert_eq!(&peer_id, runtime.peer_id()),
            other => panic!("expected hello reply, got {:?}", other),
        }
        Ok(peer)
    }
}

async fn link(acceptor: &MeshRuntime, connector: &MeshRuntime) -> MeshResult<()> {
    let (a_end, b_end) = tokio::io::duplex(64 * 1024);
    let (accepted, connected) = tokio::join!(
        acceptor.accept_stream(MeshStream::from_stream(a_end, None)),
        connector.connect_stream(MeshStream::from_stream(b_end, None)),
    );
    assert_eq!(&accepted?, connector.peer_id());
    assert_eq!(&connected?, acceptor.peer_id());
    Ok(())
}

// ----------------------------------------------------------------------------
// Scenarios
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_two_peers_exchange_text_over_tcp() -> MeshResult<()> {
    let (mut a, mut a_events) = create_test_runtime(1);
    let (mut b, _b_events) = create_test_runtime(2);
    let addr = a.start().await?;

    let remote = b.connect(&addr.to_string()).await?;
    assert_eq!(&remote, a.peer_id());

    wait_for(&mut a_events, |e| matches!(e, MeshEvent::PeerConnected { .. })).await;
    let expected = GroupKeyDeriver::derive(a.peer_id(), [b.peer_id()]);
    assert_eq!(a.group_key().await, Some(expected));
    assert_eq!(b.group_key().await, Some(expected));

    let outcome = b.broadcast("hi").await?;
    assert_eq!(outcome, BroadcastOutcome::Delivered { recipients: 1 });

    let event = next_event(&mut a_events).await;
    assert_eq!(event.to_string(), "K(10.0.0.2): hi");
    assert!(a_events.try_recv().is_none());

    b.stop().await?;
    a.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_severed_peer_is_partial_failure_and_rekeys() -> MeshResult<()> {
    let (a, mut a_events) = create_test_runtime(1);
    let (c, mut c_events) = create_test_runtime(3);

    let b = FakePeer::join(&a, "10-0-0-2").await?;
    link(&a, &c).await?;
    assert_eq!(a.registry().len().await, 2);

    // B stops reading: writes from A now fail while B's read side stays open
    let FakePeer { to_mesh: _keep_open, from_mesh } = b;
    drop(from_mesh);

    let outcome = a.broadcast("still there?").await?;
    let failed = [PeerId::new("10-0-0-2")].into_iter().collect();
    assert_eq!(
        outcome,
        BroadcastOutcome::PartialFailure {
            delivered: 1,
            failed
        }
    );

    let at_c = wait_for(&mut c_events, |e| matches!(e, MeshEvent::Message { .. })).await;
    assert_eq!(at_c.to_string(), "K(10.0.0.1): still there?");

    assert_eq!(
        a.registry().snapshot().await,
        [c.peer_id().clone()].into_iter().collect()
    );
    assert_eq!(
        a.group_key().await,
        Some(GroupKeyDeriver::derive(a.peer_id(), [c.peer_id()]))
    );
    wait_for(&mut a_events, |e| {
        matches!(e, MeshEvent::PeerDisconnected { peer_id } if peer_id.as_str() == "10-0-0-2")
    })
    .await;
    Ok(())
}

#[tokio::test]
async fn test_truncated_frame_closes_only_that_connection() -> MeshResult<()> {
    let (a, mut a_events) = create_test_runtime(1);
    let solo_key = a.group_key().await;

    let mut d = FakePeer::join(&a, "10-0-0-4").await?;
    assert_ne!(a.group_key().await, solo_key);

    d.to_mesh.write_all(&[0, 0, 0, 10, b'a', b'b', b'c']).await.unwrap();
    drop(d.to_mesh);

    wait_for(&mut a_events, |e| matches!(e, MeshEvent::PeerDisconnected { .. })).await;
    assert!(a.registry().is_empty().await);
    assert_eq!(a.group_key().await, solo_key);

    // The runtime keeps accepting
    FakePeer::join(&a, "10-0-0-5").await?;
    assert_eq!(a.registry().len().await, 1);
    Ok(())
}

#[tokio::test]
async fn test_unread_events_do_not_stall_connect_or_broadcast() -> MeshResult<()> {
    let mut config = MeshConfig::testing();
    config.channels.event_buffer_size = 1;
    let mut a = MeshRuntime::with_tcp(create_test_identity(1), config)?;
    let mut a_events = a.take_event_stream().expect("event stream not yet taken");

    // The first PeerConnected fills the buffer and nobody reads it
    let first = FakePeer::join(&a, "10-0-0-2").await?;
    let second = timeout(Duration::from_secs(2), FakePeer::join(&a, "10-0-0-3"))
        .await
        .expect("accept must not wait on the event reader")?;
    assert_eq!(a.registry().len().await, 2);

    drop(first);
    let outcome = timeout(Duration::from_secs(2), a.broadcast("still there?"))
        .await
        .expect("broadcast must not wait on the event reader")?;
    assert!(matches!(
        outcome,
        BroadcastOutcome::PartialFailure { delivered: 1, .. }
            | BroadcastOutcome::Delivered { recipients: 1 }
    ));

    let event = next_event(&mut a_events).await;
    assert_eq!(
        event,
        MeshEvent::PeerConnected {
            peer_id: PeerId::new("10-0-0-2"),
            remote_addr: Some("fake".to_string()),
        }
    );
    drop(second);
    a.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_broadcast_without_peers_is_no_peers() -> MeshResult<()> {
    let (a, mut a_events) = create_test_runtime(1);
    assert_eq!(a.broadcast("anyone?").await?, BroadcastOutcome::NoPeers);
    assert_eq!(
        a.broadcast_file("f.txt", b"data", None).await?,
        BroadcastOutcome::NoPeers
    );
    assert!(a_events.try_recv().is_none());
    Ok(())
}

#[tokio::test]
async fn test_duplicate_peer_id_replaces_connection() -> MeshResult<()> {
    let (a, _a_events) = create_test_runtime(1);

    let mut first = FakePeer::join(&a, "10-0-0-2").await?;
    let mut second = FakePeer::join(&a, "10-0-0-2").await?;
    assert_eq!(a.registry().len().await, 1);

    // The replaced connection was closed by the runtime
    assert!(first.recv().await.is_none());

    a.broadcast("to the survivor").await?;
    assert!(matches!(second.recv().await, Some(Envelope::Text { .. })));
    Ok(())
}

#[tokio::test]
async fn test_unknown_kind_is_diagnostic_not_disconnect() -> MeshResult<()> {
    let (a, mut a_events) = create_test_runtime(1);
    let mut b = FakePeer::join(&a, "10-0-0-2").await?;
    wait_for(&mut a_events, |e| matches!(e, MeshEvent::PeerConnected { .. })).await;

    let audio = serde_json::json!({"type": "audio", "from": "K(10.0.0.2)", "data": "..."});
    b.send_payload(&serde_json::to_vec(&audio).unwrap()).await;

    let event = next_event(&mut a_events).await;
    assert_eq!(
        event.to_string(),
        "[System] Received unknown message type from 10-0-0-2: audio"
    );

    // Connection survives and still carries text
    let key = a.group_key().await.expect("key is established");
    let ciphertext = CipherEngine::encrypt("après".as_bytes(), &key);
    b.send(&Envelope::text("K(10.0.0.2)", ciphertext)).await;
    let event = next_event(&mut a_events).await;
    assert_eq!(event.to_string(), "K(10.0.0.2): après");
    Ok(())
}

#[tokio::test]
async fn test_unframed_hello_is_accepted() -> MeshResult<()> {
    let (a, mut a_events) = create_test_runtime(1);
    let (stream, mut legacy) = FakePeer::new();

    legacy
        .to_mesh
        .write_all(br#"{"type": "hello", "peer_id": "10-0-0-9"}"#)
        .await
        .unwrap();
    let remote = a.accept_stream(stream).await?;
    assert_eq!(remote.as_str(), "10-0-0-9");
    assert!(matches!(legacy.recv().await, Some(Envelope::Hello { .. })));

    let event = next_event(&mut a_events).await;
    assert_eq!(
        event,
        MeshEvent::PeerConnected {
            peer_id: PeerId::new("10-0-0-9"),
            remote_addr: Some("fake".to_string()),
        }
    );
    Ok(())
}

#[tokio::test]
async fn test_legacy_connector_interoperates() -> MeshResult<()> {
    let (mut a, mut a_events) = create_test_runtime(1);
    let mut config = MeshConfig::testing();
    config.protocol.legacy_raw_handshake = true;
    let mut b = MeshRuntime::with_tcp(create_test_identity(2), config)?;
    let addr = a.start().await?;

    b.connect(&addr.to_string()).await?;
    wait_for(&mut a_events, |e| matches!(e, MeshEvent::PeerConnected { .. })).await;
    b.broadcast("from the old days").await?;
    let event = wait_for(&mut a_events, |e| matches!(e, MeshEvent::Message { .. })).await;
    assert_eq!(event.to_string(), "K(10.0.0.2): from the old days");

    b.stop().await?;
    a.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_rejected_handshake_keeps_service_running() -> MeshResult<()> {
    let (a, _a_events) = create_test_runtime(1);

    let (stream, mut intruder) = FakePeer::new();
    intruder.send_payload(b"definitely not json").await;
    assert!(a.accept_stream(stream).await.is_err());
    assert!(a.registry().is_empty().await);

    let (stream, mut impostor) = FakePeer::new();
    impostor.send(&Envelope::hello(a.peer_id().clone())).await;
    assert!(a.accept_stream(stream).await.is_err());

    FakePeer::join(&a, "10-0-0-2").await?;
    assert_eq!(a.registry().len().await, 1);
    Ok(())
}

#[tokio::test]
async fn test_file_transfer_between_runtimes() -> MeshResult<()> {
    let (a, _a_events) = create_test_runtime(1);
    let (b, mut b_events) = create_test_runtime(2);
    link(&a, &b).await?;

    a.broadcast_file("readme.txt", b"plain contents", None).await?;
    a.broadcast_file("vault.bin", b"locked contents", Some("sesame"))
        .await?;

    let plain = wait_for(&mut b_events, |e| matches!(e, MeshEvent::FileReceived { .. })).await;
    assert_eq!(
        plain,
        MeshEvent::FileReceived {
            peer_id: a.peer_id().clone(),
            from: "K(10.0.0.1)".to_string(),
            filename: "readme.txt".to_string(),
            contents: b"plain contents".to_vec(),
        }
    );

    match next_event(&mut b_events).await {
        MeshEvent::ProtectedFileReceived { filename, data, .. } => {
            assert_eq!(filename, "vault.bin");
            assert_eq!(
                kqsp_core::protocol::file::unlock(&data, "sesame").as_deref(),
                Some(&b"locked contents"[..])
            );
            assert!(kqsp_core::protocol::file::unlock(&data, "guess").is_none());
        }
        other => panic!("expected protected file, got {:?}", other),
    }
    Ok(())
}

// ----------------------------------------------------------------------------
// Lifecycle
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_stop_closes_every_connection() -> MeshResult<()> {
    let (mut a, _a_events) = create_test_runtime(1);
    let (b, mut b_events) = create_test_runtime(2);
    a.start().await?;
    link(&a, &b).await?;
    let mut fake = FakePeer::join(&a, "10-0-0-3").await?;

    a.stop().await?;
    assert!(!a.is_running());
    assert!(a.registry().is_empty().await);
    assert!(fake.recv().await.is_none());

    wait_for(&mut b_events, |e| matches!(e, MeshEvent::PeerDisconnected { .. })).await;
    assert!(b.registry().is_empty().await);

    assert!(matches!(
        a.connect("127.0.0.1:1").await,
        Err(kqsp_core::MeshError::NotRunning)
    ));
    // Stopping twice is harmless
    a.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_bind_failure_is_fatal() -> MeshResult<()> {
    let occupied = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let mut config = MeshConfig::testing();
    config.listen.port = occupied.local_addr().unwrap().port();

    let mut a = MeshRuntime::with_tcp(create_test_identity(1), config)?;
    let err = a.start().await.unwrap_err();
    assert!(err.is_fatal());
    assert!(!a.is_running());
    Ok(())
}

#[tokio::test]
async fn test_start_twice_is_rejected() -> MeshResult<()> {
    let (mut a, _a_events) = create_test_runtime(1);
    a.start().await?;
    assert!(matches!(
        a.start().await,
        Err(kqsp_core::MeshError::AlreadyRunning)
    ));
    a.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_connect_refused_is_structured_error() -> MeshResult<()> {
    let (a, _a_events) = create_test_runtime(1);
    let closed = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = closed.local_addr().unwrap().to_string();
    drop(closed);

    let err = a.connect(&addr).await.unwrap_err();
    assert!(!err.is_fatal());
    assert!(matches!(err, kqsp_core::MeshError::Transport(_)));
    Ok(())
}
