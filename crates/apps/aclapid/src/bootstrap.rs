use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use aclapi_dispatch::{DispatchStrategy, Dispatcher, ExecDispatcher, ForwardDispatcher};
use aclapi_rpc::tls::load_server_config;
use aclapi_rpc::{BoundServer, Router, RpcServer, ServerError, TlsError, TlsMaterial};

use crate::config::{DispatchMode, DispatchSettings, ListenSettings, NormalizedSettings};
use crate::handlers::{AclService, PingService};

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("failed to load TLS credentials: {0}")]
    Tls(#[from] TlsError),
    #[error("failed to resolve {address}: {source}")]
    Resolve {
        address: String,
        #[source]
        source: io::Error,
    },
    #[error("{0} did not resolve to any address")]
    NoAddress(String),
    #[error(transparent)]
    Server(#[from] ServerError),
}

pub fn build_dispatcher(settings: &DispatchSettings) -> Dispatcher {
    let strategy = match settings.mode {
        DispatchMode::Exec => DispatchStrategy::Exec(ExecDispatcher::new(&settings.setfacl_path)),
        DispatchMode::Forward => DispatchStrategy::Forward(
            ForwardDispatcher::new(&settings.socket_path)
                .with_max_response_bytes(settings.max_response_bytes),
        ),
    };
    Dispatcher::new(strategy).with_timeout(settings.timeout)
}

pub fn build_router(settings: &NormalizedSettings, dispatcher: Arc<Dispatcher>) -> Router {
    Router::builder()
        .service(Arc::new(AclService::new(dispatcher)))
        .service(Arc::new(PingService))
        .reflection(settings.debug_mode)
        .build()
}

/// Loads TLS material once. A failure here stops startup; there is no plaintext fallback.
pub fn build_server(
    settings: &NormalizedSettings,
    dispatcher: Arc<Dispatcher>,
) -> Result<RpcServer, BootstrapError> {
    let server = RpcServer::new(build_router(settings, dispatcher));
    let Some(tls) = &settings.server.tls else {
        return Ok(server);
    };
    let mut material = TlsMaterial::new(&tls.cert_file, &tls.key_file);
    if let Some(ca_cert_file) = &tls.ca_cert_file {
        material = material.with_client_ca(ca_cert_file);
    }
    let config = load_server_config(&material)?;
    log::info!("TLS enabled (mutual: {})", material.is_mutual());
    Ok(server.with_tls(config))
}

pub async fn resolve_listen_addr(listen: &ListenSettings) -> Result<SocketAddr, BootstrapError> {
    let address = listen.address();
    let mut addrs = tokio::net::lookup_host(address.clone())
        .await
        .map_err(|source| BootstrapError::Resolve { address: address.clone(), source })?;
    addrs.next().ok_or(BootstrapError::NoAddress(address))
}

/// Builds every component from settings and binds the listener.
pub async fn bootstrap(settings: Arc<NormalizedSettings>) -> Result<BoundServer, BootstrapError> {
    let dispatcher = Arc::new(build_dispatcher(&settings.dispatch));
    log::info!(
        "ACL dispatch strategy: {} (timeout {:?})",
        dispatcher.strategy().name(),
        dispatcher.timeout()
    );
    if settings.debug_mode {
        log::warn!("debug mode is on; RPC reflection is exposed");
    }
    let server = build_server(&settings, dispatcher)?;
    let addr = resolve_listen_addr(&settings.server).await?;
    Ok(server.bind(addr).await?)
}
