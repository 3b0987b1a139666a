use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;

use crate::codec::{decode_frame, encode_frame};
use crate::http::{self, HttpError, HttpStatus, HEALTH_PATH, MAX_REQUEST_BYTES, RPC_PATH};
use crate::interceptor::LoggingInterceptor;
use crate::service::Router;
use crate::tls::peer_identity;
use crate::types::RpcRequest;

/// How long in-flight calls get to finish once shutdown starts.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Deadline for a TLS handshake and, separately, for reading one request.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(10);

const HEALTH_SERVICE: &str = "aclapi-rpc";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Created,
    Bound,
    Serving,
    Draining,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Every in-flight connection finished within the grace period.
    Graceful,
    /// The grace period ran out and the remaining connections were aborted.
    Forced { aborted: usize },
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to listen on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("failed to resolve local address: {0}")]
    LocalAddr(#[source] io::Error),
}

pub struct RpcServer {
    connection: ConnectionHandler,
    shutdown_grace: Duration,
    state: watch::Sender<ServerState>,
}

impl RpcServer {
    pub fn new(router: Router) -> Self {
        let (state, _) = watch::channel(ServerState::Created);
        Self {
            connection: ConnectionHandler {
                router: Arc::new(router),
                interceptor: LoggingInterceptor::default(),
                tls: None,
                io_timeout: DEFAULT_IO_TIMEOUT,
            },
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            state,
        }
    }

    pub fn with_tls(mut self, config: Arc<rustls::ServerConfig>) -> Self {
        self.connection.tls = Some(TlsAcceptor::from(config));
        self
    }

    pub fn with_interceptor(mut self, interceptor: LoggingInterceptor) -> Self {
        self.connection.interceptor = interceptor;
        self
    }

    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.connection.io_timeout = timeout;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn state(&self) -> watch::Receiver<ServerState> {
        self.state.subscribe()
    }

    pub async fn bind(self, addr: SocketAddr) -> Result<BoundServer, ServerError> {
        let listener =
            TcpListener::bind(addr).await.map_err(|source| ServerError::Bind { addr, source })?;
        let local_addr = listener.local_addr().map_err(ServerError::LocalAddr)?;
        self.state.send_replace(ServerState::Bound);
        Ok(BoundServer { server: self, listener, local_addr })
    }
}

/// A server holding its listening socket, ready to accept.
pub struct BoundServer {
    server: RpcServer,
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl BoundServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> watch::Receiver<ServerState> {
        self.server.state()
    }

    /// Accepts until `shutdown` fires, then stops accepting and drains.
    pub async fn serve(self, shutdown: CancellationToken) -> ShutdownOutcome {
        let BoundServer { server, listener, local_addr } = self;
        let scheme = if server.connection.tls.is_some() { "https" } else { "http" };
        log::info!("rpc server listening on {scheme}://{local_addr}");
        server.state.send_replace(ServerState::Serving);

        let mut tasks = JoinSet::new();
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => log_join(joined),
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let connection = server.connection.clone();
                        tasks.spawn(async move { connection.handle(stream, peer).await });
                    }
                    Err(err) => log::warn!("rpc accept failed: {err}"),
                },
            }
        }
        drop(listener);

        server.state.send_replace(ServerState::Draining);
        log::info!(
            "rpc server draining {} connection(s), grace {:?}",
            tasks.len(),
            server.shutdown_grace
        );
        let outcome = drain_tasks(&mut tasks, server.shutdown_grace).await;
        match outcome {
            ShutdownOutcome::Graceful => log::info!("rpc server stopped gracefully"),
            ShutdownOutcome::Forced { aborted } => {
                log::warn!("rpc server grace period elapsed; aborted {aborted} connection(s)")
            }
        }
        server.state.send_replace(ServerState::Stopped);
        outcome
    }
}

/// Waits up to `grace` for `tasks` to finish, then aborts whatever is left.
pub async fn drain_tasks(tasks: &mut JoinSet<()>, grace: Duration) -> ShutdownOutcome {
    let drained = tokio::time::timeout(grace, async {
        while let Some(joined) = tasks.join_next().await {
            log_join(joined);
        }
    })
    .await;
    match drained {
        Ok(()) => ShutdownOutcome::Graceful,
        Err(_) => {
            let aborted = tasks.len();
            tasks.shutdown().await;
            ShutdownOutcome::Forced { aborted }
        }
    }
}

fn log_join(joined: Result<(), JoinError>) {
    if let Err(err) = joined {
        if err.is_panic() {
            log::error!("rpc connection task panicked: {err}");
        }
    }
}

#[derive(Clone)]
struct ConnectionHandler {
    router: Arc<Router>,
    interceptor: LoggingInterceptor,
    tls: Option<TlsAcceptor>,
    io_timeout: Duration,
}

impl ConnectionHandler {
    async fn handle(&self, stream: TcpStream, peer: SocketAddr) {
        let Some(acceptor) = &self.tls else {
            self.respond(stream, peer).await;
            return;
        };
        let accepted = match tokio::time::timeout(self.io_timeout, acceptor.accept(stream)).await {
            Ok(accepted) => accepted,
            Err(_elapsed) => {
                log::debug!("rpc tls handshake timed out after {:?} peer={peer}", self.io_timeout);
                return;
            }
        };
        match accepted {
            Ok(tls_stream) => {
                let (_, session) = tls_stream.get_ref();
                if let Some(identity) = peer_identity(session.peer_certificates()) {
                    log::debug!(
                        "rpc client authenticated peer={peer} subject={:?} sans={:?}",
                        identity.subject,
                        identity.sans
                    );
                }
                self.respond(tls_stream, peer).await;
            }
            Err(err) => log::warn!("rpc tls handshake failed peer={peer} err={err}"),
        }
    }

    async fn respond<S>(&self, mut stream: S, peer: SocketAddr)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let read = tokio::time::timeout(
            self.io_timeout,
            http::read_request(&mut stream, MAX_REQUEST_BYTES),
        )
        .await;
        let response = match read {
            Err(_elapsed) => {
                log::debug!("rpc request not received within {:?} peer={peer}", self.io_timeout);
                return;
            }
            Ok(Ok(buffer)) if buffer.is_empty() => return,
            Ok(Ok(buffer)) => self.route(&buffer, peer).await,
            Ok(Err(HttpError::Io(err))) => {
                log::debug!("rpc read error peer={peer} err={err}");
                return;
            }
            Ok(Err(err)) => {
                log::warn!("rpc request rejected peer={peer} err={err}");
                http::build_error_response(err.status(), &err.to_string())
            }
        };
        let _ = stream.write_all(&response).await;
        let _ = stream.shutdown().await;
    }

    async fn route(&self, buffer: &[u8], peer: SocketAddr) -> Vec<u8> {
        let request = match http::parse_request(buffer) {
            Ok(request) => request,
            Err(err) => {
                return http::build_error_response(err.status(), &format!("bad request: {err}"))
            }
        };
        match (request.method.as_str(), request.path.as_str()) {
            ("GET", HEALTH_PATH) => {
                let body = json!({
                    "ok": true,
                    "service": HEALTH_SERVICE,
                    "status": "healthy",
                })
                .to_string();
                http::build_json_response(HttpStatus::Ok, body.as_bytes())
            }
            ("POST", RPC_PATH) => {
                let rpc_request: RpcRequest = match decode_frame(request.body) {
                    Ok(rpc_request) => rpc_request,
                    Err(err) => {
                        log::warn!("rpc frame rejected peer={peer} err={err}");
                        return http::build_error_response(
                            HttpStatus::BadRequest,
                            &format!("invalid rpc frame: {err}"),
                        );
                    }
                };
                let router = self.router.clone();
                let response = self
                    .interceptor
                    .intercept(Some(peer), rpc_request, |method, params| async move {
                        router.call(&method, params).await
                    })
                    .await;
                match encode_frame(&response) {
                    Ok(frame) => http::build_frame_response(&frame),
                    Err(err) => http::build_error_response(
                        HttpStatus::InternalServerError,
                        &format!("failed to encode response: {err}"),
                    ),
                }
            }
            _ => http::build_error_response(HttpStatus::NotFound, "not found"),
        }
    }
}
