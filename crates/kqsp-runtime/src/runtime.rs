//! KQSP Runtime Orchestration
//!
//! `MeshRuntime` wires the registry, listener, connection handlers and
//! broadcaster together and owns the global stop signal. Every established
//! connection, inbound or outbound, goes through the same path: handshake,
//! register (which rekeys), announce, spawn a handler.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};

use kqsp_core::{
    create_event_channel, EventSink, EventStream, FrameCodec, GroupKey, LocalIdentity, MeshConfig,
    MeshError, MeshEvent, MeshResult, PeerId,
};
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::listener::ListenerService;
use crate::logic::{handshake, BroadcastOutcome, Broadcaster, ConnectionHandler};
use crate::managers::{PeerConnection, PeerInfo, PeerRegistry};
use crate::transport::{with_default_port, MeshStream, StreamConnector, TcpConnector};

// ----------------------------------------------------------------------------
// Shared Context
// ----------------------------------------------------------------------------

/// Which side of the handshake we play
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Role {
    Inbound,
    Outbound,
}

/// State shared by the runtime, the listener task and connection setup
pub(crate) struct MeshContext {
    self_id: PeerId,
    config: MeshConfig,
    registry: Arc<PeerRegistry>,
    events: EventSink,
    codec: FrameCodec,
    shutdown: watch::Receiver<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl MeshContext {
    pub(crate) fn config(&self) -> &MeshConfig {
        &self.config
    }

    fn is_stopping(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Spawn a task that `stop` will wait for
    pub(crate) fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(task);
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.retain(|t| !t.is_finished());
        tasks.push(handle);
    }

    fn take_tasks(&self) -> Vec<JoinHandle<()>> {
        std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Handshake, register and start a handler for one stream
    pub(crate) async fn establish(&self, stream: MeshStream, role: Role) -> MeshResult<PeerId> {
        if self.is_stopping() {
            return Err(MeshError::NotRunning);
        }

        let MeshStream {
            mut reader,
            mut writer,
            remote_addr,
        } = stream;
        let remote = remote_addr.as_deref().unwrap_or("unknown");

        let protocol = &self.config.protocol;
        let result = match role {
            Role::Inbound => {
                handshake::accept(&mut reader, &mut writer, &self.self_id, protocol).await
            }
            Role::Outbound => {
                handshake::initiate(&mut reader, &mut writer, &self.self_id, protocol).await
            }
        };
        let peer_id = match result {
            Ok(peer_id) => peer_id,
            Err(e) => {
                warn!(remote, ?role, "Handshake rejected: {}", e);
                let _ = writer.shutdown().await;
                return Err(e.into());
            }
        };

        let connection = PeerConnection::new(writer, remote_addr.clone());
        connection.mark_connected();
        let key = self
            .registry
            .register(peer_id.clone(), connection.clone())
            .await;

        if self.is_stopping() {
            self.registry
                .unregister_connection(&peer_id, connection.id())
                .await;
            connection.close().await;
            return Err(MeshError::NotRunning);
        }

        info!(peer_id = %peer_id, remote, ?role, key = %key.fingerprint(), "Peer connected");
        self.events.try_emit(MeshEvent::PeerConnected {
            peer_id: peer_id.clone(),
            remote_addr,
        });

        let handler = ConnectionHandler::new(
            peer_id.clone(),
            connection,
            reader,
            self.registry.clone(),
            self.events.clone(),
            self.codec,
            self.shutdown.clone(),
        );
        self.spawn(async move {
            handler.run().await;
        });
        Ok(peer_id)
    }
}

// ----------------------------------------------------------------------------
// Mesh Runtime
// ----------------------------------------------------------------------------

struct ListenerHandle {
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

/// A running mesh node
pub struct MeshRuntime {
    identity: LocalIdentity,
    context: Arc<MeshContext>,
    connector: Arc<dyn StreamConnector>,
    broadcaster: Broadcaster,
    shutdown_tx: watch::Sender<bool>,
    listener: Option<ListenerHandle>,
    event_stream: Option<EventStream>,
}

impl MeshRuntime {
    /// Create a runtime; nothing is bound or spawned until `start`
    pub fn new(
        identity: LocalIdentity,
        config: MeshConfig,
        connector: Arc<dyn StreamConnector>,
    ) -> MeshResult<Self> {
        config.validate().map_err(MeshError::config_error)?;

        let self_id = identity.peer_id();
        let registry = Arc::new(PeerRegistry::new(self_id.clone()));
        let (events, event_stream) = create_event_channel(&config.channels);
        let codec = FrameCodec::new(config.protocol.max_frame_len);
        let (shutdown_tx, shutdown) = watch::channel(false);

        let broadcaster = Broadcaster::new(
            registry.clone(),
            events.clone(),
            codec,
            identity.display_name(),
        );
        let context = Arc::new(MeshContext {
            self_id,
            config,
            registry,
            events,
            codec,
            shutdown,
            tasks: Mutex::new(Vec::new()),
        });

        Ok(Self {
            identity,
            context,
            connector,
            broadcaster,
            shutdown_tx,
            listener: None,
            event_stream: Some(event_stream),
        })
    }

    /// Create a runtime that dials peers over TCP
    pub fn with_tcp(identity: LocalIdentity, config: MeshConfig) -> MeshResult<Self> {
        let connector = TcpConnector::new(config.network.connect_timeout());
        Self::new(identity, config, Arc::new(connector))
    }

    pub fn identity(&self) -> &LocalIdentity {
        &self.identity
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.context.self_id
    }

    pub fn config(&self) -> &MeshConfig {
        &self.context.config
    }

    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.context.registry
    }

    /// Bind the listener and start accepting peers
    ///
    /// A bind failure is returned as a fatal error and leaves nothing running.
    pub async fn start(&mut self) -> MeshResult<SocketAddr> {
        if self.context.is_stopping() {
            return Err(MeshError::NotRunning);
        }
        if self.listener.is_some() {
            return Err(MeshError::AlreadyRunning);
        }

        let listener = ListenerService::bind(&self.context.config.listen).await?;
        let local_addr = listener.local_addr();
        let task = tokio::spawn(listener.run(self.context.clone(), self.shutdown_tx.subscribe()));
        self.listener = Some(ListenerHandle { local_addr, task });

        info!(peer_id = %self.peer_id(), name = %self.identity, %local_addr, "Mesh runtime started");
        Ok(local_addr)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().map(|l| l.local_addr)
    }

    pub fn is_running(&self) -> bool {
        self.listener.is_some() && !self.context.is_stopping()
    }

    /// Dial `addr` (default port if omitted) and complete the handshake
    pub async fn connect(&self, addr: &str) -> MeshResult<PeerId> {
        if self.context.is_stopping() {
            return Err(MeshError::NotRunning);
        }
        let addr = with_default_port(addr);
        debug!(%addr, "Connecting");
        let stream = self.connector.connect(&addr).await?;
        self.context.establish(stream, Role::Outbound).await
    }

    /// Run the connecting side of the handshake over an existing stream
    pub async fn connect_stream(&self, stream: MeshStream) -> MeshResult<PeerId> {
        self.context.establish(stream, Role::Outbound).await
    }

    /// Run the accepting side of the handshake over an existing stream
    pub async fn accept_stream(&self, stream: MeshStream) -> MeshResult<PeerId> {
        self.context.establish(stream, Role::Inbound).await
    }

    pub async fn broadcast(&self, text: &str) -> MeshResult<BroadcastOutcome> {
        self.broadcaster.send(text).await
    }

    pub async fn broadcast_file(
        &self,
        filename: &str,
        contents: &[u8],
        password: Option<&str>,
    ) -> MeshResult<BroadcastOutcome> {
        self.broadcaster.send_file(filename, contents, password).await
    }

    pub async fn peers(&self) -> Vec<PeerInfo> {
        self.context.registry.peers().await
    }

    pub async fn group_key(&self) -> Option<GroupKey> {
        self.context.registry.group_key().await
    }

    /// The single consumer end of the event channel
    pub fn take_event_stream(&mut self) -> Option<EventStream> {
        self.event_stream.take()
    }

    /// Stop accepting, close every connection and wait for all tasks
    pub async fn stop(&mut self) -> MeshResult<()> {
        if self.context.is_stopping() {
            return Ok(());
        }
        info!("Stopping mesh runtime");
        self.shutdown_tx.send_replace(true);

        if let Some(listener) = self.listener.take() {
            if let Err(e) = listener.task.await {
                warn!("Listener task ended abnormally: {}", e);
            }
        }

        let closed = self.context.registry.close_all().await;
        debug!(closed, "Closed peer connections");

        loop {
            let tasks = self.context.take_tasks();
            if tasks.is_empty() {
                break;
            }
            for task in tasks {
                if let Err(e) = task.await {
                    warn!("Connection task ended abnormally: {}", e);
                }
            }
        }

        info!("Mesh runtime stopped");
        Ok(())
    }
}

impl Drop for MeshRuntime {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
    }
}
