//! Interactive chat application
//!
//! `ChatApp` owns the mesh runtime and multiplexes three inputs: lines typed
//! on stdin, events coming out of the mesh, and Ctrl+C.

use std::io::Write;
use std::path::{Path, PathBuf};

use kqsp_core::protocol::file;
use kqsp_runtime::{BroadcastOutcome, EventStream, MeshEvent, MeshRuntime};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

use crate::commands::{ReplCommand, HELP_TEXT};
use crate::config::AppConfig;
use crate::error::{CliError, Result};

/// A password-protected file waiting for `/unlock`
#[derive(Debug, Clone)]
pub struct LockedFile {
    pub from: String,
    pub filename: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

/// The interactive client
pub struct ChatApp {
    runtime: MeshRuntime,
    events: EventStream,
    config: AppConfig,
    locked: Vec<LockedFile>,
}

impl ChatApp {
    pub fn new(config: AppConfig) -> Result<Self> {
        let identity = config.local_identity()?;
        let mut runtime = MeshRuntime::with_tcp(identity, config.mesh.clone())?;
        let events = runtime
            .take_event_stream()
            .ok_or(CliError::EventStreamUnavailable)?;

        Ok(Self {
            runtime,
            events,
            config,
            locked: Vec::new(),
        })
    }

    pub fn runtime(&self) -> &MeshRuntime {
        &self.runtime
    }

    /// Start listening, dial the initial peers and run until `/quit` or Ctrl+C
    pub async fn run(&mut self, initial_peers: &[String]) -> Result<()> {
        let local_addr = self.runtime.start().await?;
        let identity = *self.runtime.identity();
        println!(
            "[System] Listening on {} as {} ({})",
            local_addr,
            identity,
            identity.peer_id()
        );
        println!("[System] Type /help for commands.");

        for addr in initial_peers {
            self.connect(addr).await;
        }

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        self.prompt();

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    match line? {
                        Some(line) => {
                            if self.handle_line(&line).await == Flow::Quit {
                                break;
                            }
                            self.prompt();
                        }
                        None => {
                            debug!("stdin closed");
                            break;
                        }
                    }
                }
                event = self.events.recv() => {
                    match event {
                        Some(event) => self.handle_event(event).await,
                        None => {
                            warn!("Mesh event stream closed");
                            break;
                        }
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Received shutdown signal");
                    break;
                }
            }
        }

        println!("[System] Shutting down...");
        self.runtime.stop().await?;
        Ok(())
    }

    fn prompt(&self) {
        print!("{}", self.config.cli.prompt);
        let _ = std::io::stdout().flush();
    }

    async fn handle_line(&mut self, line: &str) -> Flow {
        let Some(command) = ReplCommand::parse(line) else {
            return Flow::Continue;
        };

        match command {
            ReplCommand::Say(text) => match self.runtime.broadcast(&text).await {
                Ok(outcome) => {
                    for line in render_outcome(&outcome, &format!("You: {}", text), "message") {
                        println!("{}", line);
                    }
                }
                Err(e) => println!("[System] Failed to send message: {}", e),
            },
            ReplCommand::Connect(addr) => self.connect(&addr).await,
            ReplCommand::Peers => self.list_peers().await,
            ReplCommand::MyId => {
                let identity = self.runtime.identity();
                println!("[System] You are {} ({})", identity, identity.peer_id());
            }
            ReplCommand::Key => {
                let members = self.runtime.registry().len().await + 1;
                match self.runtime.group_key().await {
                    Some(key) => println!(
                        "[System] Group key {} shared by {} member(s)",
                        key.fingerprint(),
                        members
                    ),
                    None => println!("[System] Group key not yet established."),
                }
            }
            ReplCommand::SendFile { path, password } => {
                self.send_file(&path, password.as_deref()).await
            }
            ReplCommand::Unlock { index, password } => self.unlock(index, &password).await,
            ReplCommand::Help => println!("{}", HELP_TEXT),
            ReplCommand::Quit => return Flow::Quit,
            ReplCommand::Usage(usage) => println!("[System] Usage: {}", usage),
            ReplCommand::Unknown(name) => {
                println!("[System] Unknown command: /{}. Type /help for commands.", name)
            }
        }
        Flow::Continue
    }

    async fn connect(&self, addr: &str) {
        println!("[System] Connecting to {}...", addr);
        // Success is announced by the PeerConnected event
        if let Err(e) = self.runtime.connect(addr).await {
            println!("[System] Failed to connect to {}: {}", addr, e);
        }
    }

    async fn list_peers(&self) {
        let peers = self.runtime.peers().await;
        if peers.is_empty() {
            println!("[System] No connected peers.");
            return;
        }
        println!("[System] Connected peers ({}):", peers.len());
        for peer in peers {
            println!(
                "  {} [{}] {}",
                peer.id,
                peer.state,
                peer.remote_addr.as_deref().unwrap_or("-")
            );
        }
    }

    async fn send_file(&self, path: &str, password: Option<&str>) {
        let contents = match tokio::fs::read(path).await {
            Ok(contents) => contents,
            Err(e) => {
                println!("[System] Cannot read {}: {}", path, e);
                return;
            }
        };
        let filename = Path::new(path)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string());

        match self
            .runtime
            .broadcast_file(&filename, &contents, password)
            .await
        {
            Ok(outcome) => {
                let sent = format!("[System] Sent file '{}' ({} bytes)", filename, contents.len());
                for line in render_outcome(&outcome, &sent, "file") {
                    println!("{}", line);
                }
            }
            Err(e) => println!("[System] Failed to send file: {}", e),
        }
    }

    async fn unlock(&mut self, index: usize, password: &str) {
        let slot = index.checked_sub(1).filter(|slot| *slot < self.locked.len());
        let Some(slot) = slot else {
            println!("[System] No locked file #{}.", index);
            return;
        };
        let Some(contents) = file::unlock(&self.locked[slot].data, password) else {
            println!("[System] Wrong password for '{}'.", self.locked[slot].filename);
            return;
        };

        let locked = self.locked.remove(slot);
        println!("[System] Unlocked '{}' from {}", locked.filename, locked.from);
        self.save(&locked.filename, &contents).await;
    }

    async fn handle_event(&mut self, event: MeshEvent) {
        println!("\r{}", event);
        match event {
            MeshEvent::FileReceived {
                filename, contents, ..
            } => self.save(&filename, &contents).await,
            MeshEvent::ProtectedFileReceived {
                from,
                filename,
                data,
                ..
            } => {
                self.locked.push(LockedFile {
                    from,
                    filename,
                    data,
                });
                println!(
                    "[System] Use /unlock {} <password> to open it.",
                    self.locked.len()
                );
            }
            _ => {}
        }
        self.prompt();
    }

    async fn save(&self, filename: &str, contents: &[u8]) {
        match save_download(&self.config.downloads_dir(), filename, contents).await {
            Ok(path) => println!("[System] Saved to {}", path.display()),
            Err(e) => println!("[System] Could not save '{}': {}", filename, e),
        }
    }
}

/// Lines to show for a broadcast outcome; `sent` is shown when anyone got it
pub fn render_outcome(outcome: &BroadcastOutcome, sent: &str, what: &str) -> Vec<String> {
    match outcome {
        BroadcastOutcome::NoPeers => {
            vec![format!("[System] No active connections to send {}.", what)]
        }
        BroadcastOutcome::KeyNotReady => vec![format!(
            "[System] Group key not yet established. Cannot send {}.",
            what
        )],
        BroadcastOutcome::TotalFailure { .. } => {
            vec![format!("[System] {} could not be sent to any peer.", capitalize(what))]
        }
        BroadcastOutcome::Delivered { .. } => vec![sent.to_string()],
        BroadcastOutcome::PartialFailure { failed, .. } => {
            let names: Vec<&str> = failed.iter().map(|id| id.as_str()).collect();
            vec![
                sent.to_string(),
                format!("[System] Could not deliver to: {}", names.join(", ")),
            ]
        }
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Write a received file into `dir`, keeping only the final path component
pub async fn save_download(dir: &Path, filename: &str, contents: &[u8]) -> std::io::Result<PathBuf> {
    let name = Path::new(filename)
        .file_name()
        .filter(|name| !name.is_empty())
        .ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("unusable file name '{}'", filename),
            )
        })?;

    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(name);
    tokio::fs::write(&path, contents).await?;
    Ok(path)
}
