use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use rustls::pki_types::ServerName;
use serde_json::Value as JsonValue;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use crate::codec::{decode_frame, encode_frame, FrameError};
use crate::http::{self, HEALTH_PATH};
use crate::tls::{self, ClientTlsMaterial, TlsError};
use crate::types::{RpcError, RpcRequest, RpcResponse};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("failed to connect: {0}")]
    Connect(#[source] io::Error),
    #[error("tls handshake failed: {0}")]
    Handshake(#[source] io::Error),
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid rpc frame: {0}")]
    Frame(#[from] FrameError),
    #[error("http status {status}: {body}")]
    Http { status: u16, body: String },
    #[error("malformed response: {0}")]
    Protocol(String),
    #[error(transparent)]
    Tls(#[from] TlsError),
    #[error(transparent)]
    Rpc(#[from] RpcError),
}

/// One connection per call, mirroring how the server answers.
pub struct RpcClient {
    addr: SocketAddr,
    host: String,
    tls: Option<(TlsConnector, ServerName<'static>)>,
    next_id: AtomicU64,
}

impl RpcClient {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr, host: addr.ip().to_string(), tls: None, next_id: AtomicU64::new(1) }
    }

    /// Switches to TLS, verifying the server certificate against `host`.
    pub fn with_tls(
        mut self,
        host: &str,
        material: &ClientTlsMaterial,
    ) -> Result<Self, ClientError> {
        let config = tls::load_client_config(material)?;
        self.tls = Some((TlsConnector::from(config), tls::server_name(host)?));
        self.host = host.to_string();
        Ok(self)
    }

    pub async fn call(
        &self,
        method: &str,
        params: Option<JsonValue>,
    ) -> Result<RpcResponse, ClientError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = encode_frame(&RpcRequest::new(id, method, params))?;
        let response = self.round_trip(&http::build_rpc_request(&self.host, &frame)).await?;
        let body = expect_ok(&response)?;
        let rpc_response: RpcResponse = decode_frame(body)?;
        if rpc_response.id != id {
            return Err(ClientError::Protocol(format!(
                "response id {} does not match request id {id}",
                rpc_response.id
            )));
        }
        Ok(rpc_response)
    }

    /// Like [`RpcClient::call`] but folds an RPC error into `Err`.
    pub async fn call_ok(
        &self,
        method: &str,
        params: Option<JsonValue>,
    ) -> Result<JsonValue, ClientError> {
        let response = self.call(method, params).await?;
        if let Some(error) = response.error {
            return Err(error.into());
        }
        response.result.ok_or_else(|| ClientError::Protocol("response carries no result".into()))
    }

    pub async fn health(&self) -> Result<JsonValue, ClientError> {
        let request = format!(
            "GET {HEALTH_PATH} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
            self.host
        );
        let response = self.round_trip(request.as_bytes()).await?;
        let body = expect_ok(&response)?;
        serde_json::from_slice(body).map_err(|err| ClientError::Protocol(err.to_string()))
    }

    /// Sends raw bytes and returns the raw HTTP response.
    pub async fn round_trip(&self, request: &[u8]) -> Result<Vec<u8>, ClientError> {
        let stream = TcpStream::connect(self.addr).await.map_err(ClientError::Connect)?;
        match &self.tls {
            Some((connector, name)) => {
                let tls_stream = connector
                    .connect(name.clone(), stream)
                    .await
                    .map_err(ClientError::Handshake)?;
                Ok(exchange(tls_stream, request).await?)
            }
            None => Ok(exchange(stream, request).await?),
        }
    }
}

async fn exchange<S>(mut stream: S, request: &[u8]) -> io::Result<Vec<u8>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(request).await?;
    stream.flush().await?;
    let mut response = Vec::new();
    stream.read_to_end(&mut response).await?;
    Ok(response)
}

fn expect_ok(response: &[u8]) -> Result<&[u8], ClientError> {
    let status = http::parse_status_code(response)
        .ok_or_else(|| ClientError::Protocol("missing status line".into()))?;
    let body = http::response_body(response)
        .ok_or_else(|| ClientError::Protocol("truncated body".into()))?;
    if status != 200 {
        return Err(ClientError::Http { status, body: String::from_utf8_lossy(body).into_owned() });
    }
    Ok(body)
}
