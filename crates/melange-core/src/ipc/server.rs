//! Unix socket listener for the bridge.
//!
//! Binds one socket path, accepts producer connections and runs each one in
//! its own task. A connection task reads one frame, waits for the responder,
//! writes the payload (if any) and only then reads the next frame, so
//! requests on a connection are answered in order.
//!
//! # Thread Safety
//!
//! The `EvaluationResponder` is shared via `Arc`. Its cache is the only state
//! connections share; requests for the same module on different connections
//! may race, and the evaluation that finishes last fills the cache.

use super::protocol::{read_frame, write_frame};
use super::responder::EvaluationResponder;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info};

/// Handle to a running bridge server. Dropping shuts down the server.
pub struct BridgeServerHandle {
    path: PathBuf,
    active_connections: Arc<AtomicUsize>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    conn_shutdown_tx: watch::Sender<bool>,
    task_handle: Option<tokio::task::JoinHandle<()>>,
}

impl BridgeServerHandle {
    /// Socket path the server is bound to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of connections currently open.
    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Shut down the server.
    ///
    /// Stops accepting connections, signals connection tasks to close once
    /// their current request is answered, and removes the socket file.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
            if let Err(e) = std::fs::remove_file(&self.path) {
                debug!("Could not remove socket {}: {}", self.path.display(), e);
            }
        }
        let _ = self.conn_shutdown_tx.send(true);
    }
}

impl Drop for BridgeServerHandle {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
    }
}

/// Bridge server accepting producer connections.
pub struct BridgeServer;

impl BridgeServer {
    /// Bind the configured socket and start serving in background tasks.
    ///
    /// Fails with `BridgeError::Bind` when the endpoint is in use.
    pub async fn start(
        config: &BridgeConfig,
        responder: Arc<EvaluationResponder>,
    ) -> Result<BridgeServerHandle> {
        let path = config.socket_path.clone();
        let listener = bind_endpoint(&path)?;

        info!(
            "Bridge listening on {} ({} loader, {} evaluation, {} errors)",
            path.display(),
            responder.loader_name(),
            responder.mode(),
            responder.error_policy()
        );

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let (conn_shutdown_tx, conn_shutdown_rx) = watch::channel(false);
        let active_connections = Arc::new(AtomicUsize::new(0));

        let task_handle = tokio::spawn(Self::accept_loop(
            listener,
            responder,
            config.max_frame_size,
            shutdown_rx,
            conn_shutdown_rx,
            active_connections.clone(),
        ));

        Ok(BridgeServerHandle {
            path,
            active_connections,
            shutdown_tx: Some(shutdown_tx),
            conn_shutdown_tx,
            task_handle: Some(task_handle),
        })
    }

    async fn accept_loop(
        listener: UnixListener,
        responder: Arc<EvaluationResponder>,
        max_frame_size: usize,
        mut shutdown_rx: oneshot::Receiver<()>,
        conn_shutdown_rx: watch::Receiver<bool>,
        active_connections: Arc<AtomicUsize>,
    ) {
        let next_id = AtomicU64::new(1);

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    info!("Bridge server shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, _)) => {
                            let conn_id = next_id.fetch_add(1, Ordering::Relaxed);
                            let guard = ConnectionGuard::open(&active_connections);
                            let responder = responder.clone();
                            let mut conn_shutdown = conn_shutdown_rx.clone();

                            tokio::spawn(async move {
                                let _guard = guard;
                                debug!("Connection {} opened", conn_id);
                                let result = Self::handle_connection(
                                    stream,
                                    &responder,
                                    max_frame_size,
                                    &mut conn_shutdown,
                                )
                                .await;
                                match result {
                                    Ok(()) => debug!("Connection {} closed", conn_id),
                                    Err(e) => debug!("Connection {} ended: {}", conn_id, e),
                                }
                            });
                        }
                        Err(e) => {
                            error!("Bridge accept error: {}", e);
                        }
                    }
                }
            }
        }
    }

    async fn handle_connection(
        mut stream: UnixStream,
        responder: &EvaluationResponder,
        max_frame_size: usize,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        let (mut reader, mut writer) = stream.split();

        loop {
            let frame = tokio::select! {
                result = read_frame(&mut reader, max_frame_size) => {
                    match result? {
                        Some(f) => f,
                        None => return Ok(()), // Clean disconnect
                    }
                }
                _ = shutdown_rx.changed() => {
                    return Ok(());
                }
            };

            if let Some(payload) = responder.respond(&frame).await {
                write_frame(&mut writer, &payload).await?;
            }
        }
    }
}

/// Counts a connection as open until the guard is dropped, including when
/// its task unwinds.
struct ConnectionGuard(Arc<AtomicUsize>);

impl ConnectionGuard {
    fn open(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(Arc::clone(counter))
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Bind the socket path, clearing a stale socket file left by a dead process.
fn bind_endpoint(path: &Path) -> Result<UnixListener> {
    if let Ok(metadata) = std::fs::symlink_metadata(path) {
        if !metadata.file_type().is_socket() {
            return Err(BridgeError::Bind {
                path: path.to_path_buf(),
                message: "path exists and is not a socket".to_string(),
                source: None,
            });
        }

        if std::os::unix::net::UnixStream::connect(path).is_ok() {
            return Err(BridgeError::Bind {
                path: path.to_path_buf(),
                message: "endpoint is already in use".to_string(),
                source: None,
            });
        }

        info!("Removing stale socket {}", path.display());
        std::fs::remove_file(path).map_err(|e| BridgeError::bind(path, e))?;
    }

    UnixListener::bind(path).map_err(|e| BridgeError::bind(path, e))
}
