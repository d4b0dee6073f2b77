//! Per-peer receive loop
//!
//! One `ConnectionHandler` runs per registered peer. It reads frames in
//! stream order, decodes and decrypts them, and forwards the results to the
//! event sink. Problems with a single message never end the loop; only the
//! stream ending, a stream error, a local close or the global stop signal do.

use std::sync::Arc;

use kqsp_core::{
    protocol::file, CipherEngine, Envelope, EventSink, FrameCodec, MeshEvent, PeerId,
};
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use crate::managers::{BoxedReader, PeerConnection, PeerRegistry};

/// Why a handler stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerExit {
    /// Remote closed the stream on a frame boundary
    RemoteClosed,
    /// Truncated frame, oversized frame or I/O failure
    StreamError(String),
    /// The connection was closed locally (replaced, failed write, shutdown)
    LocalClose,
    /// The global stop signal was raised
    Shutdown,
}

pub struct ConnectionHandler {
    context: PeerContext,
    reader: BoxedReader,
    codec: FrameCodec,
    shutdown: watch::Receiver<bool>,
}

/// Everything the loop needs besides the read half
///
/// Kept apart from the reader so that it can be shared by reference across
/// awaits while the reader is only ever borrowed by the frame decoder.
struct PeerContext {
    peer_id: PeerId,
    connection: PeerConnection,
    registry: Arc<PeerRegistry>,
    events: EventSink,
}

impl ConnectionHandler {
    pub fn new(
        peer_id: PeerId,
        connection: PeerConnection,
        reader: BoxedReader,
        registry: Arc<PeerRegistry>,
        events: EventSink,
        codec: FrameCodec,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            context: PeerContext {
                peer_id,
                connection,
                registry,
                events,
            },
            reader,
            codec,
            shutdown,
        }
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.context.peer_id
    }

    /// Run until the connection ends, then unregister and close it
    pub async fn run(self) -> HandlerExit {
        let ConnectionHandler {
            context,
            mut reader,
            codec,
            mut shutdown,
        } = self;
        debug!(peer_id = %context.peer_id, conn = %context.connection.id(), "Handler started");

        let exit = loop {
            tokio::select! {
                _ = stop_requested(&mut shutdown) => break HandlerExit::Shutdown,
                _ = context.connection.closed() => break HandlerExit::LocalClose,
                frame = codec.decode_stream(&mut reader) => match frame {
                    // Emitting may wait on the reader; shutdown must not
                    Ok(payload) => tokio::select! {
                        _ = context.dispatch(&payload) => {}
                        _ = stop_requested(&mut shutdown) => break HandlerExit::Shutdown,
                    },
                    Err(e) if e.is_graceful_close() => break HandlerExit::RemoteClosed,
                    Err(e) => {
                        warn!(peer_id = %context.peer_id, "Closing connection: {}", e);
                        break HandlerExit::StreamError(e.to_string());
                    }
                },
            }
        };

        context.finish(&exit).await;
        exit
    }
}

impl PeerContext {
    async fn finish(&self, exit: &HandlerExit) {
        let removed = self
            .registry
            .unregister_connection(&self.peer_id, self.connection.id())
            .await;
        self.connection.close().await;

        info!(peer_id = %self.peer_id, reason = ?exit, "Connection closed");
        if removed.is_some() {
            self.events.try_emit(MeshEvent::PeerDisconnected {
                peer_id: self.peer_id.clone(),
            });
        }
    }

    async fn dispatch(&self, payload: &[u8]) {
        if payload.is_empty() {
            trace!(peer_id = %self.peer_id, "Keepalive frame");
            return;
        }

        let envelope = match Envelope::decode(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.diagnose(format!("Error processing message from {}: {}", self.peer_id, e))
                    .await;
                return;
            }
        };

        match envelope {
            Envelope::Text { from, text } => self.on_text(from, text).await,
            Envelope::File {
                from,
                filename,
                protected,
                data,
            } => self.on_file(from, filename, protected, data).await,
            Envelope::Hello { .. } => {
                debug!(peer_id = %self.peer_id, "Ignoring hello after registration");
            }
            Envelope::Unknown { raw } => {
                let kind = raw
                    .get("type")
                    .and_then(|t| t.as_str())
                    .unwrap_or_default()
                    .to_string();
                self.diagnose(format!(
                    "Received unknown message type from {}: {}",
                    self.peer_id, kind
                ))
                .await;
            }
        }
    }

    async fn on_text(&self, from: String, ciphertext: Vec<u8>) {
        let Some(key) = self.registry.group_key().await else {
            self.diagnose(format!("Dropped message from {}: no group key", self.peer_id))
                .await;
            return;
        };

        match String::from_utf8(CipherEngine::decrypt(&ciphertext, &key)) {
            Ok(body) => {
                self.events
                    .emit(MeshEvent::Message {
                        peer_id: self.peer_id.clone(),
                        from: self.display_name(from),
                        body,
                    })
                    .await;
            }
            Err(e) => {
                debug!(peer_id = %self.peer_id, key = %key.fingerprint(), "Undecryptable message");
                self.diagnose(format!("Could not decrypt message from {}: {}", self.peer_id, e))
                    .await;
            }
        }
    }

    async fn on_file(&self, from: String, filename: String, protected: bool, data: Vec<u8>) {
        let from = self.display_name(from);
        if protected {
            self.events
                .emit(MeshEvent::ProtectedFileReceived {
                    peer_id: self.peer_id.clone(),
                    from,
                    filename,
                    data,
                })
                .await;
            return;
        }

        match self.registry.group_key().await {
            Some(key) => {
                self.events
                    .emit(MeshEvent::FileReceived {
                        peer_id: self.peer_id.clone(),
                        from,
                        filename,
                        contents: file::open(&data, &key),
                    })
                    .await;
            }
            None => {
                self.diagnose(format!("Dropped file from {}: no group key", self.peer_id))
                    .await;
            }
        }
    }

    /// Display name from the envelope, or the wire id if the sender left it out
    fn display_name(&self, from: String) -> String {
        if from.is_empty() {
            self.peer_id.to_string()
        } else {
            from
        }
    }

    async fn diagnose(&self, message: String) {
        debug!(peer_id = %self.peer_id, "{}", message);
        self.events
            .emit(MeshEvent::diagnostic(Some(self.peer_id.clone()), message))
            .await;
    }
}

/// Resolves once the stop flag is raised or its sender is gone
pub(crate) async fn stop_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use kqsp_core::{create_event_channel, ChannelConfig, EventStream, GroupKeyDeriver};
    use tokio::io::{AsyncWriteExt, DuplexStream};

    fn create_test_peer_id(id: &str) -> PeerId {
        PeerId::new(id)
    }

    struct Fixture {
        registry: Arc<PeerRegistry>,
        connection: PeerConnection,
        events: EventStream,
        remote: DuplexStream,
        stop: watch::Sender<bool>,
        handler: ConnectionHandler,
    }

    async fn create_fixture() -> Fixture {
        create_fixture_with(&ChannelConfig::default()).await
    }

    async fn create_fixture_with(channels: &ChannelConfig) -> Fixture {
        let registry = Arc::new(PeerRegistry::new(create_test_peer_id("a")));
        let (local, remote) = tokio::io::duplex(4096);
        let (reader, writer) = tokio::io::split(local);
        let connection = PeerConnection::new(Box::new(writer), None);
        registry
            .register(create_test_peer_id("b"), connection.clone())
            .await;

        let (sink, events) = create_event_channel(channels);
        let (stop, shutdown) = watch::channel(false);
        let handler = ConnectionHandler::new(
            create_test_peer_id("b"),
            connection.clone(),
            Box::new(reader),
            registry.clone(),
            sink,
            FrameCodec::default(),
            shutdown,
        );
        Fixture {
            registry,
            connection,
            events,
            remote,
            stop,
            handler,
        }
    }

    async fn send(remote: &mut DuplexStream, envelope: &Envelope) {
        let frame = FrameCodec::default()
            .encode(&envelope.encode().unwrap())
            .unwrap();
        remote.write_all(&frame).await.unwrap();
    }

    fn pair_key() -> kqsp_core::GroupKey {
        GroupKeyDeriver::derive(&create_test_peer_id("a"), [&create_test_peer_id("b")])
    }

    #[tokio::test]
    async fn test_text_is_decrypted_and_emitted() {
        let mut fx = create_fixture().await;
        let ciphertext = CipherEngine::encrypt(b"hi", &pair_key());
        send(&mut fx.remote, &Envelope::text("K(0.0.0.2)", ciphertext)).await;
        drop(fx.remote);

        let exit = fx.handler.run().await;
        assert_eq!(exit, HandlerExit::RemoteClosed);

        let event = fx.events.recv().await.unwrap();
        assert_eq!(event.to_string(), "K(0.0.0.2): hi");
        assert_eq!(
            fx.events.recv().await,
            Some(MeshEvent::PeerDisconnected {
                peer_id: create_test_peer_id("b")
            })
        );
        assert!(fx.registry.is_empty().await);
        assert!(fx.connection.is_closing());
    }

    #[tokio::test]
    async fn test_bad_messages_keep_connection_open() {
        let mut fx = create_fixture().await;

        // Keepalive, garbage JSON, an unknown kind, then a valid message
        fx.remote.write_all(&[0, 0, 0, 0]).await.unwrap();
        fx.remote
            .write_all(&FrameCodec::default().encode(b"{not json").unwrap())
            .await
            .unwrap();
        let unknown = Envelope::decode(br#"{"type":"audio","data":"x"}"#).unwrap();
        send(&mut fx.remote, &unknown).await;
        let ciphertext = CipherEngine::encrypt(b"still here", &pair_key());
        send(&mut fx.remote, &Envelope::text("K(0.0.0.2)", ciphertext)).await;
        drop(fx.remote);

        fx.handler.run().await;

        let first = fx.events.recv().await.unwrap();
        assert!(matches!(first, MeshEvent::Diagnostic { .. }));
        let second = fx.events.recv().await.unwrap();
        assert_eq!(
            second.to_string(),
            "[System] Received unknown message type from b: audio"
        );
        let third = fx.events.recv().await.unwrap();
        assert_eq!(third.to_string(), "K(0.0.0.2): still here");
    }

    #[tokio::test]
    async fn test_undecodable_text_is_reported_not_fatal() {
        let mut fx = create_fixture().await;
        // Decrypts to bytes that are not UTF-8
        let ciphertext = CipherEngine::encrypt(&[0xff, 0xfe, 0xfd], &pair_key());
        send(&mut fx.remote, &Envelope::text("K(0.0.0.2)", ciphertext)).await;
        drop(fx.remote);

        assert_eq!(fx.handler.run().await, HandlerExit::RemoteClosed);
        assert!(matches!(
            fx.events.recv().await,
            Some(MeshEvent::Diagnostic { .. })
        ));
    }

    #[tokio::test]
    async fn test_truncated_frame_closes_connection() {
        let mut fx = create_fixture().await;
        fx.remote.write_all(&[0, 0, 0, 10, b'a', b'b', b'c']).await.unwrap();
        drop(fx.remote);

        let exit = fx.handler.run().await;
        assert!(matches!(exit, HandlerExit::StreamError(_)));
        assert!(fx.registry.is_empty().await);
        assert!(matches!(
            fx.events.recv().await,
            Some(MeshEvent::PeerDisconnected { .. })
        ));
    }

    #[tokio::test]
    async fn test_files_are_forwarded() {
        let mut fx = create_fixture().await;
        let (data, protected) = file::seal(b"plain file", &pair_key(), None);
        send(
            &mut fx.remote,
            &Envelope::File {
                from: String::new(),
                filename: "notes.txt".into(),
                protected,
                data,
            },
        )
        .await;
        let (data, protected) = file::seal(b"locked", &pair_key(), Some("pw"));
        send(
            &mut fx.remote,
            &Envelope::File {
                from: "K(0.0.0.2)".into(),
                filename: "secret.txt".into(),
                protected,
                data: data.clone(),
            },
        )
        .await;
        drop(fx.remote);
        fx.handler.run().await;

        assert_eq!(
            fx.events.recv().await,
            Some(MeshEvent::FileReceived {
                peer_id: create_test_peer_id("b"),
                from: "b".into(),
                filename: "notes.txt".into(),
                contents: b"plain file".to_vec(),
            })
        );
        match fx.events.recv().await {
            Some(MeshEvent::ProtectedFileReceived { data: locked, .. }) => {
                assert_eq!(locked, data);
                assert_eq!(file::unlock(&locked, "pw").unwrap(), b"locked");
            }
            other => panic!("expected protected file, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stop_signal_ends_loop() {
        let fx = create_fixture().await;
        let task = tokio::spawn(fx.handler.run());

        fx.stop.send_replace(true);
        assert_eq!(task.await.unwrap(), HandlerExit::Shutdown);
        assert!(fx.registry.is_empty().await);
        drop(fx.remote);
    }

    #[tokio::test]
    async fn test_stop_signal_ends_loop_blocked_on_full_buffer() {
        let mut fx = create_fixture_with(&ChannelConfig {
            event_buffer_size: 1,
        })
        .await;
        for text in [&b"one"[..], b"two"] {
            let ciphertext = CipherEngine::encrypt(text, &pair_key());
            send(&mut fx.remote, &Envelope::text("K(0.0.0.2)", ciphertext)).await;
        }
        let task = tokio::spawn(fx.handler.run());

        // The second message waits for room nobody makes
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        fx.stop.send_replace(true);
        let exit = tokio::time::timeout(std::time::Duration::from_secs(2), task)
            .await
            .expect("handler must honour stop while emitting")
            .unwrap();
        assert_eq!(exit, HandlerExit::Shutdown);
        assert!(fx.registry.is_empty().await);

        let first = fx.events.recv().await.unwrap();
        assert_eq!(first.to_string(), "K(0.0.0.2): one");
        drop(fx.remote);
    }

    #[tokio::test]
    async fn test_replaced_connection_leaves_replacement_registered() {
        let mut fx = create_fixture().await;
        let task = tokio::spawn(fx.handler.run());

        let (replacement, _other) = tokio::io::duplex(64);
        fx.registry
            .register(
                create_test_peer_id("b"),
                PeerConnection::new(Box::new(replacement), None),
            )
            .await;

        assert_eq!(task.await.unwrap(), HandlerExit::LocalClose);
        assert!(fx.registry.contains(&create_test_peer_id("b")).await);
        assert!(fx.events.try_recv().is_none());
        drop(fx.remote);
    }
}
