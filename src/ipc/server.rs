//! Owner-only Unix socket exposing the approval queue to local requesters.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info, warn};

use crate::errors::ApprovalError;
use crate::ipc::protocol::{Action, IpcRequest, IpcResponse};
use crate::queue::ApprovalQueue;
use crate::store::bootstrap::create_private_dir;

const SOCKET_MODE: u32 = 0o600;

/// Longest request line accepted, newline included. A longer line is
/// answered with `invalid request` and the connection is closed.
pub const MAX_REQUEST_BYTES: u64 = 64 * 1024;

pub struct IpcServer {
    listener: UnixListener,
    path: PathBuf,
    queue: Arc<ApprovalQueue>,
}

impl IpcServer {
    /// Bind the socket, replacing a stale one from a previous run.
    pub fn bind(path: &Path, queue: Arc<ApprovalQueue>) -> anyhow::Result<Self> {
        if let Some(dir) = path.parent() {
            create_private_dir(dir)
                .with_context(|| format!("failed to create socket dir {}", dir.display()))?;
        }
        remove_stale_socket(path)?;

        let listener = UnixListener::bind(path)
            .with_context(|| format!("failed to create socket {}", path.display()))?;

        if let Err(e) = set_socket_permissions(path) {
            drop(listener);
            let _ = std::fs::remove_file(path);
            return Err(e)
                .with_context(|| format!("failed to set socket permissions on {}", path.display()));
        }

        info!(path = %path.display(), "socket server listening");
        Ok(Self {
            listener,
            path: path.to_path_buf(),
            queue,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accept connections until `shutdown` completes. Each connection is
    /// served on its own task.
    pub async fn run_until<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("socket server shutting down");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let queue = self.queue.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, queue).await {
                                debug!(error = %e, "IPC connection ended with error");
                            }
                        });
                    }
                    Err(e) => warn!(error = %e, "socket accept error"),
                },
            }
        }
    }

    pub async fn run(self) {
        self.run_until(std::future::pending()).await
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn remove_stale_socket(path: &Path) -> anyhow::Result<()> {
    let metadata = match std::fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e).with_context(|| format!("failed to stat {}", path.display())),
    };

    #[cfg(unix)]
    {
        use std::os::unix::fs::FileTypeExt;
        if !metadata.file_type().is_socket() {
            anyhow::bail!("path {} exists but is not a socket", path.display());
        }
    }
    #[cfg(not(unix))]
    let _ = metadata;

    std::fs::remove_file(path)
        .with_context(|| format!("failed to remove stale socket {}", path.display()))?;
    debug!(path = %path.display(), "removed stale socket file");
    Ok(())
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(SOCKET_MODE))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> io::Result<()> {
    Ok(())
}

/// Serve one connection: one response line per request line. Malformed
/// input gets an error reply and the connection stays open; an unknown
/// action or an oversized line closes it.
pub async fn handle_connection(stream: UnixStream, queue: Arc<ApprovalQueue>) -> io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let read = (&mut reader)
            .take(MAX_REQUEST_BYTES + 1)
            .read_until(b'\n', &mut buf)
            .await?;
        if read == 0 {
            break;
        }
        if buf.len() as u64 > MAX_REQUEST_BYTES {
            warn!(limit = MAX_REQUEST_BYTES, "IPC request line too long");
            let response = IpcResponse::from_error(&ApprovalError::MalformedRequest);
            write_response(&mut writer, &response).await?;
            break;
        }
        if buf.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        let (response, keep_open) = dispatch(&buf, &queue).await;
        write_response(&mut writer, &response).await?;
        if !keep_open {
            break;
        }
    }
    Ok(())
}

async fn dispatch(line: &[u8], queue: &ApprovalQueue) -> (IpcResponse, bool) {
    let request = match serde_json::from_slice::<IpcRequest>(line) {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, "invalid IPC request");
            return (IpcResponse::from_error(&ApprovalError::MalformedRequest), true);
        }
    };

    match Action::try_from(request) {
        Ok(Action::Status) => (IpcResponse::running(), true),
        Ok(Action::QueueEmail(payload)) => {
            let outcome = queue.enqueue(payload).await;
            (IpcResponse::from_outcome(&outcome), true)
        }
        Err(err) => {
            warn!(error = %err, "rejecting IPC request");
            (IpcResponse::from_error(&err), false)
        }
    }
}

async fn write_response(writer: &mut OwnedWriteHalf, response: &IpcResponse) -> io::Result<()> {
    let mut out = serde_json::to_vec(response)?;
    out.push(b'\n');
    writer.write_all(&out).await?;
    writer.flush().await
}
