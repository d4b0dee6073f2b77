//! Inbound connection service
//!
//! Each accepted socket moves through `Accepted → AwaitingHandshake →
//! Registered | Rejected` in its own task, so a slow or hostile peer never
//! stalls the accept loop. Failing to bind is fatal; failing to accept is
//! logged and retried.

use std::net::SocketAddr;
use std::sync::Arc;

use kqsp_core::{ListenConfig, MeshError, MeshResult};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::logic::handler::stop_requested;
use crate::runtime::{MeshContext, Role};
use crate::transport::MeshStream;

pub struct ListenerService {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl ListenerService {
    /// Bind the configured address
    pub async fn bind(config: &ListenConfig) -> MeshResult<Self> {
        let addr = config.bind_address();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| MeshError::bind_failed(addr.clone(), e.to_string()))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| MeshError::bind_failed(addr, e.to_string()))?;
        info!(%local_addr, "Listening for peers");
        Ok(Self {
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept until the stop signal is raised
    pub(crate) async fn run(self, context: Arc<MeshContext>, mut shutdown: watch::Receiver<bool>) {
        let retry_delay = context.config().network.accept_retry_delay();

        loop {
            tokio::select! {
                _ = stop_requested(&mut shutdown) => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, remote)) => {
                        info!(%remote, "Incoming connection");
                        let ctx = context.clone();
                        context.spawn(async move {
                            // Rejections are logged inside establish
                            let _ = ctx.establish(MeshStream::from_tcp(stream), Role::Inbound).await;
                        });
                    }
                    Err(e) => {
                        warn!("Accept failed: {}", e);
                        tokio::time::sleep(retry_delay).await;
                    }
                },
            }
        }

        info!(local_addr = %self.local_addr, "Listener stopped");
    }
}
