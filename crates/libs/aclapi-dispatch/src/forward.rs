use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::UnixStream;

use crate::request::{AclCommand, AclResult};

pub const DEFAULT_SOCKET_PATH: &str = "/run/aclapi/acl-core.sock";
pub const DEFAULT_MAX_RESPONSE_BYTES: usize = 64 * 1024;

/// Message written to the root daemon.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct IpcRequest {
    pub action: String,
    pub entry: String,
    pub path: String,
}

impl From<&AclCommand> for IpcRequest {
    fn from(command: &AclCommand) -> Self {
        Self {
            action: command.action.as_str().to_string(),
            entry: command.entry.clone(),
            path: command.path.clone(),
        }
    }
}

/// Reply read back from the root daemon.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IpcResponse {
    pub success: bool,
    #[serde(default)]
    pub message: String,
}

/// Which step of the exchange failed. The display text is what clients see.
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("failed to encode request: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to connect to root daemon: {0}")]
    Connect(#[source] io::Error),

    #[error("failed to write to socket: {0}")]
    Write(#[source] io::Error),

    #[error("failed to read from socket: {0}")]
    Read(#[source] io::Error),

    #[error("failed to parse response: {0}")]
    Parse(#[source] serde_json::Error),

    #[error("response from root daemon exceeds {0} bytes")]
    TooLarge(usize),
}

/// Forwards ACL changes to a root daemon over a unix socket.
///
/// One connection per request, no pooling and no retry.
#[derive(Clone, Debug)]
pub struct ForwardDispatcher {
    socket_path: PathBuf,
    max_response_bytes: usize,
}

impl Default for ForwardDispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_SOCKET_PATH)
    }
}

impl ForwardDispatcher {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self { socket_path: socket_path.into(), max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES }
    }

    pub fn with_max_response_bytes(mut self, max_response_bytes: usize) -> Self {
        self.max_response_bytes = max_response_bytes.max(1);
        self
    }

    pub fn max_response_bytes(&self) -> usize {
        self.max_response_bytes
    }

    pub async fn apply(&self, command: &AclCommand) -> AclResult {
        match self.exchange(&IpcRequest::from(command)).await {
            Ok(response) => AclResult { success: response.success, message: response.message },
            Err(err) => {
                log::warn!(
                    "root daemon exchange failed socket={} err={}",
                    self.socket_path.display(),
                    err
                );
                AclResult::failure(err.to_string())
            }
        }
    }

    pub async fn exchange(&self, request: &IpcRequest) -> Result<IpcResponse, ForwardError> {
        let mut stream =
            UnixStream::connect(&self.socket_path).await.map_err(ForwardError::Connect)?;
        write_request(&mut stream, request).await?;
        read_response(&mut stream, self.max_response_bytes).await
    }
}

/// Writes `request` as one JSON document followed by a newline.
pub async fn write_request<W>(writer: &mut W, request: &IpcRequest) -> Result<(), ForwardError>
where
    W: AsyncWrite + Unpin,
{
    let mut payload = serde_json::to_vec(request).map_err(ForwardError::Encode)?;
    payload.push(b'\n');
    writer.write_all(&payload).await.map_err(ForwardError::Write)?;
    writer.flush().await.map_err(ForwardError::Write)
}

/// Reads one JSON reply, stopping as soon as a complete document has arrived
/// or the peer closes. Replies larger than `max_bytes` are rejected.
pub async fn read_response<R>(
    reader: &mut R,
    max_bytes: usize,
) -> Result<IpcResponse, ForwardError>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = Vec::new();
    let mut chunk = [0_u8; 4096];
    loop {
        let read = reader.read(&mut chunk).await.map_err(ForwardError::Read)?;
        if read == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..read]);
        if buffer.len() > max_bytes {
            return Err(ForwardError::TooLarge(max_bytes));
        }
        match serde_json::from_slice::<IpcResponse>(&buffer) {
            Ok(response) => return Ok(response),
            Err(err) if err.is_eof() => continue,
            Err(err) => return Err(ForwardError::Parse(err)),
        }
    }

    if buffer.is_empty() {
        return Err(ForwardError::Read(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed before a response was received",
        )));
    }
    serde_json::from_slice(&buffer).map_err(ForwardError::Parse)
}
