//! WhatsApp bridge adapter.
//!
//! The live protocol session is owned by a Node sidecar (Baileys) launched
//! as a child process. This crate supervises that process and speaks the
//! NDJSON protocol in `protocol.rs` over its stdio: inbound event batches
//! stream out of the child, outbound operations go in as id-correlated
//! commands. The child is restarted with backoff whenever the connection
//! closes, unless the platform reports the credentials as logged out.

pub mod protocol;

use std::{
    collections::HashMap,
    path::PathBuf,
    process::Stdio,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::Command,
    sync::{mpsc, oneshot, Mutex},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use wab_core::{
    domain::{ChatJid, EventKey},
    errors::Error,
    transport::{TransportCapabilities, TransportPort},
    wire::{EventBatch, MediaRef},
    Result,
};

use protocol::{BridgeCommand, BridgeFrame, ConnectionState};

const STDERR_TAIL_LINES: usize = 50;

#[derive(Clone, Debug)]
pub struct BridgeConfig {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub session_name: String,
    pub restart_backoff: Duration,
    pub request_timeout: Duration,
}

#[derive(Clone, Debug)]
struct ResponsePayload {
    ok: bool,
    error: Option<String>,
    data: Option<serde_json::Value>,
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<ResponsePayload>>>>;

/// Handle for talking to the bridge. Cloning is cheap; all clones share the
/// same child process.
pub struct BridgeTransport {
    cmd_tx: mpsc::UnboundedSender<String>,
    pending: PendingMap,
    next_id: AtomicU64,
    cancel: CancellationToken,
    request_timeout: Duration,
}

impl BridgeTransport {
    /// Start the supervisor and return the transport plus the stream of
    /// inbound event batches.
    pub fn spawn(cfg: BridgeConfig) -> (Arc<Self>, mpsc::UnboundedReceiver<EventBatch>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (batch_tx, batch_rx) = mpsc::unbounded_channel();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let cancel = CancellationToken::new();

        let transport = Arc::new(Self {
            cmd_tx,
            pending: pending.clone(),
            next_id: AtomicU64::new(1),
            cancel: cancel.clone(),
            request_timeout: cfg.request_timeout,
        });

        tokio::spawn(supervise(cfg, cmd_rx, pending, batch_tx, cancel));

        (transport, batch_rx)
    }

    /// Stop the supervisor and the child process.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    async fn request(&self, command: BridgeCommand) -> Result<ResponsePayload> {
        let id = command.id();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let line = serde_json::to_string(&command)?;
        if self.cmd_tx.send(line).is_err() {
            self.pending.lock().await.remove(&id);
            return Err(Error::External("bridge supervisor stopped".to_string()));
        }

        let resp = match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(_)) => {
                return Err(Error::External(
                    "bridge restarted before responding".to_string(),
                ))
            }
            Err(_) => {
                self.pending.lock().await.remove(&id);
                return Err(Error::External("bridge request timed out".to_string()));
            }
        };

        if !resp.ok {
            return Err(Error::External(format!(
                "bridge rejected command: {}",
                resp.error.unwrap_or_else(|| "unknown error".to_string())
            )));
        }
        Ok(resp)
    }

    fn fresh_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

#[async_trait]
impl TransportPort for BridgeTransport {
    fn capabilities(&self) -> TransportCapabilities {
        TransportCapabilities {
            supports_reactions: true,
            supports_quoting: true,
            supports_media_download: true,
        }
    }

    async fn send_text(&self, chat: &ChatJid, text: &str, quote: Option<&EventKey>) -> Result<()> {
        self.request(BridgeCommand::Send {
            id: self.fresh_id(),
            chat: chat.clone(),
            text: text.to_string(),
            quote: quote.cloned(),
        })
        .await?;
        Ok(())
    }

    async fn react(&self, key: &EventKey, emoji: &str) -> Result<()> {
        self.request(BridgeCommand::React {
            id: self.fresh_id(),
            key: key.clone(),
            emoji: emoji.to_string(),
        })
        .await?;
        Ok(())
    }

    async fn mark_read(&self, keys: &[EventKey]) -> Result<()> {
        self.request(BridgeCommand::Read {
            id: self.fresh_id(),
            keys: keys.to_vec(),
        })
        .await?;
        Ok(())
    }

    async fn download_media(&self, media: &MediaRef) -> Result<Vec<u8>> {
        let resp = self
            .request(BridgeCommand::Download {
                id: self.fresh_id(),
                media: media.clone(),
            })
            .await?;

        let encoded = resp
            .data
            .as_ref()
            .and_then(|d| d.get("bytes"))
            .and_then(|b| b.as_str())
            .ok_or_else(|| Error::External("bridge download response had no bytes".to_string()))?;
        BASE64
            .decode(encoded)
            .map_err(|e| Error::External(format!("bridge download decode failed: {e}")))
    }
}

enum ExitReason {
    LoggedOut,
    Disconnected,
    ChildExited,
}

async fn supervise(
    cfg: BridgeConfig,
    mut cmd_rx: mpsc::UnboundedReceiver<String>,
    pending: PendingMap,
    batch_tx: mpsc::UnboundedSender<EventBatch>,
    cancel: CancellationToken,
) {
    loop {
        if cancel.is_cancelled() {
            break;
        }

        let outcome = run_child(&cfg, &mut cmd_rx, &pending, &batch_tx, &cancel).await;
        if cancel.is_cancelled() {
            break;
        }
        match outcome {
            Ok(ExitReason::LoggedOut) => {
                error!("bridge session logged out; not reconnecting");
                break;
            }
            Ok(ExitReason::Disconnected) => {
                warn!("bridge connection closed, restarting");
            }
            Ok(ExitReason::ChildExited) => {
                warn!("bridge process exited, restarting");
            }
            Err(e) => {
                error!(error = %e, "bridge supervision error, restarting");
            }
        }

        fail_pending(&pending).await;
        tokio::time::sleep(cfg.restart_backoff).await;
    }

    fail_pending(&pending).await;
    info!("bridge supervisor stopped");
}

/// Drop all in-flight request channels; waiters observe "bridge restarted".
async fn fail_pending(pending: &PendingMap) {
    pending.lock().await.clear();
}

async fn run_child(
    cfg: &BridgeConfig,
    cmd_rx: &mut mpsc::UnboundedReceiver<String>,
    pending: &PendingMap,
    batch_tx: &mpsc::UnboundedSender<EventBatch>,
    cancel: &CancellationToken,
) -> Result<ExitReason> {
    info!(program = %cfg.program.display(), "starting bridge process");

    let mut child = Command::new(&cfg.program)
        .args(&cfg.args)
        .env("SESSION_NAME", &cfg.session_name)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| Error::External("bridge stdin was not captured".to_string()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::External("bridge stdout was not captured".to_string()))?;

    // Keep a bounded stderr tail for post-mortem logging.
    let stderr_tail = Arc::new(Mutex::new(Vec::<String>::new()));
    if let Some(stderr) = child.stderr.take() {
        let tail = stderr_tail.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let mut tail = tail.lock().await;
                if tail.len() >= STDERR_TAIL_LINES {
                    tail.remove(0);
                }
                tail.push(line);
            }
        });
    }

    let mut reader = BufReader::new(stdout).lines();
    let reason = loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                let _ = child.wait().await;
                break ExitReason::ChildExited;
            }
            line = cmd_rx.recv() => {
                let Some(line) = line else {
                    // All transport handles dropped; shut the child down.
                    let _ = child.kill().await;
                    let _ = child.wait().await;
                    break ExitReason::ChildExited;
                };
                if let Err(e) = write_line(&mut stdin, &line).await {
                    warn!(error = %e, "bridge stdin write failed");
                    let _ = child.kill().await;
                    let _ = child.wait().await;
                    break ExitReason::ChildExited;
                }
            }
            line = reader.next_line() => {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        warn!(error = %e, "bridge stdout read failed");
                        let _ = child.kill().await;
                        let _ = child.wait().await;
                        break ExitReason::ChildExited;
                    }
                };
                let Some(line) = line else {
                    // stdout closed: reap and report.
                    let status = child.wait().await?;
                    if !status.success() {
                        let tail = stderr_tail.lock().await.join("\n");
                        warn!(%status, stderr = %tail, "bridge exited abnormally");
                    }
                    break ExitReason::ChildExited;
                };
                match handle_frame(&line, pending, batch_tx).await {
                    FrameOutcome::Continue => {}
                    FrameOutcome::Close { logged_out } => {
                        let _ = child.kill().await;
                        let _ = child.wait().await;
                        break if logged_out {
                            ExitReason::LoggedOut
                        } else {
                            ExitReason::Disconnected
                        };
                    }
                }
            }
        }
    };

    Ok(reason)
}

async fn write_line(stdin: &mut tokio::process::ChildStdin, line: &str) -> std::io::Result<()> {
    stdin.write_all(line.as_bytes()).await?;
    stdin.write_all(b"\n").await?;
    stdin.flush().await
}

enum FrameOutcome {
    Continue,
    Close { logged_out: bool },
}

async fn handle_frame(
    line: &str,
    pending: &PendingMap,
    batch_tx: &mpsc::UnboundedSender<EventBatch>,
) -> FrameOutcome {
    let frame: BridgeFrame = match serde_json::from_str(line) {
        Ok(frame) => frame,
        Err(e) => {
            // The sidecar occasionally prints non-protocol noise; skip it.
            debug!(error = %e, line, "ignoring non-frame bridge output");
            return FrameOutcome::Continue;
        }
    };

    match frame {
        BridgeFrame::Batch { batch } => {
            if batch_tx.send(batch).is_err() {
                warn!("batch receiver dropped, discarding events");
            }
            FrameOutcome::Continue
        }
        BridgeFrame::Response {
            id,
            ok,
            error,
            data,
        } => {
            let waiter = pending.lock().await.remove(&id);
            match waiter {
                Some(tx) => {
                    let _ = tx.send(ResponsePayload { ok, error, data });
                }
                None => warn!(id, "bridge response for unknown request"),
            }
            FrameOutcome::Continue
        }
        BridgeFrame::Status {
            connection,
            logged_out,
        } => {
            info!(?connection, logged_out, "bridge connection status");
            match connection {
                ConnectionState::Close => FrameOutcome::Close { logged_out },
                ConnectionState::Connecting | ConnectionState::Open => FrameOutcome::Continue,
            }
        }
    }
}
