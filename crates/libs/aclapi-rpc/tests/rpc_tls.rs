use aclapi_rpc::tls::load_server_config;
use aclapi_rpc::{
    ClientError, ClientTlsMaterial, Router, RpcClient, RpcError, RpcServer, RpcService,
    ShutdownOutcome, TlsMaterial,
};
use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct Pinger;

#[async_trait]
impl RpcService for Pinger {
    fn name(&self) -> &'static str {
        "test.Pinger"
    }

    fn methods(&self) -> &'static [&'static str] {
        &["Ping"]
    }

    async fn call(&self, _method: &str, _params: Option<JsonValue>) -> Result<JsonValue, RpcError> {
        Ok(json!({ "message": "pong" }))
    }
}

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

struct Running {
    addr: SocketAddr,
    shutdown: CancellationToken,
    handle: JoinHandle<ShutdownOutcome>,
}

impl Running {
    async fn stop(self) -> ShutdownOutcome {
        self.shutdown.cancel();
        self.handle.await.expect("serve task")
    }
}

async fn start_tls(material: TlsMaterial) -> Running {
    let config = load_server_config(&material).expect("server tls config");
    let bound = RpcServer::new(Router::builder().service(Arc::new(Pinger)).build())
        .with_tls(config)
        .bind("127.0.0.1:0".parse().expect("addr"))
        .await
        .expect("bind");
    let addr = bound.local_addr();
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(bound.serve(shutdown.clone()));
    Running { addr, shutdown, handle }
}

fn server_material() -> TlsMaterial {
    TlsMaterial::new(fixture("server.pem"), fixture("server.key"))
}

fn tls_client(addr: SocketAddr, material: ClientTlsMaterial) -> RpcClient {
    RpcClient::new(addr).with_tls("localhost", &material).expect("client tls config")
}

#[tokio::test]
async fn server_only_tls_serves_verified_clients() {
    let running = start_tls(server_material()).await;

    let client = tls_client(running.addr, ClientTlsMaterial::new(fixture("ca.pem")));
    let result = client.call_ok("test.Pinger/Ping", None).await.expect("ping over tls");
    assert_eq!(result, json!({ "message": "pong" }));
    assert_eq!(
        client.health().await.expect("health"),
        json!({ "ok": true, "service": "aclapi-rpc", "status": "healthy" })
    );

    assert_eq!(running.stop().await, ShutdownOutcome::Graceful);
}

#[tokio::test]
async fn plaintext_client_gets_no_answer_from_tls_server() {
    let running = start_tls(server_material()).await;

    let err = RpcClient::new(running.addr).call("test.Pinger/Ping", None).await.expect_err("plain");
    assert!(!matches!(err, ClientError::Rpc(_)), "{err}");

    running.stop().await;
}

#[tokio::test]
async fn client_rejects_server_it_does_not_trust() {
    let running = start_tls(server_material()).await;

    // Trusts only the client certificate, which did not sign the server chain.
    let material = ClientTlsMaterial::new(fixture("client.pem"));
    let err = tls_client(running.addr, material).call("test.Pinger/Ping", None).await.expect_err(
        "untrusted server",
    );
    assert!(matches!(err, ClientError::Handshake(_)), "{err}");

    running.stop().await;
}

#[tokio::test]
async fn mutual_tls_accepts_client_signed_by_ca() {
    let running = start_tls(server_material().with_client_ca(fixture("ca.pem"))).await;

    let material = ClientTlsMaterial::new(fixture("ca.pem"))
        .with_identity(fixture("client.pem"), fixture("client.key"));
    let result = tls_client(running.addr, material)
        .call_ok("test.Pinger/Ping", None)
        .await
        .expect("ping over mtls");
    assert_eq!(result, json!({ "message": "pong" }));

    assert_eq!(running.stop().await, ShutdownOutcome::Graceful);
}

#[tokio::test]
async fn mutual_tls_rejects_client_without_certificate() {
    let running = start_tls(server_material().with_client_ca(fixture("ca.pem"))).await;

    let err = tls_client(running.addr, ClientTlsMaterial::new(fixture("ca.pem")))
        .call("test.Pinger/Ping", None)
        .await
        .expect_err("anonymous client");
    assert!(!matches!(err, ClientError::Rpc(_)), "{err}");

    running.stop().await;
}

#[tokio::test]
async fn mutual_tls_rejects_client_from_another_ca() {
    let running = start_tls(server_material().with_client_ca(fixture("ca.pem"))).await;

    let material = ClientTlsMaterial::new(fixture("ca.pem"))
        .with_identity(fixture("rogue-client.pem"), fixture("rogue-client.key"));
    let err = tls_client(running.addr, material)
        .call("test.Pinger/Ping", None)
        .await
        .expect_err("rogue client");
    assert!(!matches!(err, ClientError::Rpc(_)), "{err}");

    running.stop().await;
}
