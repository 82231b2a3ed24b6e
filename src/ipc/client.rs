use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use crate::errors::ApprovalError;
use crate::ipc::protocol::{IpcRequest, IpcResponse};
use crate::models::approval::{ApprovalPayload, APPROVAL_TIMEOUT};

/// Must outlast the daemon's own approval timeout, otherwise the client
/// could give up on an approval the human is about to grant.
pub const CLIENT_IO_TIMEOUT: Duration = Duration::from_secs(APPROVAL_TIMEOUT.as_secs() + 60);

#[derive(Debug, Clone)]
pub struct DaemonClient {
    socket_path: PathBuf,
    io_timeout: Duration,
}

impl DaemonClient {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            io_timeout: CLIENT_IO_TIMEOUT,
        }
    }

    pub fn with_io_timeout(mut self, io_timeout: Duration) -> Self {
        self.io_timeout = io_timeout;
        self
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    async fn connect(&self) -> Result<UnixStream, ApprovalError> {
        match UnixStream::connect(&self.socket_path).await {
            Ok(stream) => Ok(stream),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused
                ) =>
            {
                Err(ApprovalError::DaemonUnreachable(self.socket_path.clone()))
            }
            Err(e) => Err(ApprovalError::Internal(
                anyhow::Error::new(e).context("failed to connect to approval daemon"),
            )),
        }
    }

    async fn round_trip(&self, request: &IpcRequest) -> Result<IpcResponse, ApprovalError> {
        let stream = self.connect().await?;
        let exchange = async move {
            let (reader, mut writer) = stream.into_split();

            let mut line = serde_json::to_vec(request)
                .map_err(|e| ApprovalError::Protocol(format!("failed to encode request: {}", e)))?;
            line.push(b'\n');
            writer.write_all(&line).await.map_err(|e| {
                ApprovalError::Protocol(format!("failed to send request to daemon: {}", e))
            })?;

            let mut reply = String::new();
            let n = BufReader::new(reader)
                .read_line(&mut reply)
                .await
                .map_err(|e| {
                    ApprovalError::Protocol(format!("failed to read daemon response: {}", e))
                })?;
            if n == 0 {
                return Err(ApprovalError::Protocol(
                    "daemon closed the connection without replying".to_string(),
                ));
            }
            serde_json::from_str::<IpcResponse>(&reply)
                .map_err(|e| ApprovalError::Protocol(format!("undecodable daemon response: {}", e)))
        };

        tokio::time::timeout(self.io_timeout, exchange)
            .await
            .map_err(|_| ApprovalError::Protocol("timed out waiting for approval daemon".to_string()))?
    }

    pub async fn status(&self) -> Result<String, ApprovalError> {
        let resp = self.round_trip(&IpcRequest::status()).await?;
        if resp.success {
            Ok(resp.status.unwrap_or_else(|| "unknown".to_string()))
        } else {
            Err(ApprovalError::Protocol(
                resp.error.unwrap_or_else(|| "status request failed".to_string()),
            ))
        }
    }

    /// Ask the human. Blocks until they answer or the daemon times out;
    /// `Ok(())` means explicitly approved and nothing else does.
    pub async fn queue_email(&self, payload: &ApprovalPayload) -> Result<(), ApprovalError> {
        self.round_trip(&IpcRequest::queue_email(payload))
            .await?
            .into_approval()
    }
}
