//! Unary RPC server and client.
//!
//! Requests travel as `POST /rpc` with a length-prefixed MessagePack
//! [`RpcRequest`] body; `GET /healthz` answers with a small JSON document.
//! Connections can be plain TCP, TLS, or mutual TLS. Every call passes through
//! a [`LoggingInterceptor`] before reaching the [`Router`].

pub mod client;
pub mod codec;
pub mod http;
pub mod interceptor;
pub mod server;
pub mod service;
pub mod tls;
pub mod types;

pub use client::{ClientError, RpcClient};
pub use codec::FrameError;
pub use interceptor::{LogFacadeSink, LogSink, LoggingInterceptor};
pub use server::{
    drain_tasks, BoundServer, RpcServer, ServerError, ServerState, ShutdownOutcome,
    DEFAULT_IO_TIMEOUT, DEFAULT_SHUTDOWN_GRACE,
};
pub use service::{decode_params, encode_result, Router, RouterBuilder, RpcService};
pub use tls::{ClientTlsMaterial, PeerIdentity, TlsError, TlsMaterial};
pub use types::{RpcError, RpcRequest, RpcResponse, StatusCode};
