use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use log::Level;
use serde_json::{json, Value as JsonValue};

use crate::types::{RpcError, RpcRequest, RpcResponse};

pub const LOG_TARGET: &str = "aclapi::rpc";

/// Destination for structured interceptor records.
pub trait LogSink: Send + Sync {
    fn emit(&self, level: Level, record: JsonValue);
}

/// Forwards records to whatever `log` backend the process installed.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogFacadeSink;

impl LogSink for LogFacadeSink {
    fn emit(&self, level: Level, record: JsonValue) {
        log::log!(target: LOG_TARGET, level, "{record}");
    }
}

/// Logs every unary call before and after the handler runs. The handler's
/// outcome is returned untouched.
#[derive(Clone)]
pub struct LoggingInterceptor {
    sink: Arc<dyn LogSink>,
}

impl Default for LoggingInterceptor {
    fn default() -> Self {
        Self::new(Arc::new(LogFacadeSink))
    }
}

impl LoggingInterceptor {
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self { sink }
    }

    pub async fn intercept<F, Fut>(
        &self,
        peer: Option<SocketAddr>,
        request: RpcRequest,
        handler: F,
    ) -> RpcResponse
    where
        F: FnOnce(String, Option<JsonValue>) -> Fut,
        Fut: Future<Output = Result<JsonValue, RpcError>>,
    {
        let peer = peer.map(|addr| addr.to_string());
        let RpcRequest { id, method, params } = request;
        self.sink.emit(
            Level::Info,
            json!({
                "event": "rpc_incoming",
                "id": id,
                "method": method,
                "request": params,
                "peer": peer,
            }),
        );

        let started_at = Instant::now();
        let outcome = handler(method.clone(), params).await;
        let elapsed_ms = started_at.elapsed().as_millis() as u64;

        match &outcome {
            Ok(result) => self.sink.emit(
                Level::Info,
                json!({
                    "event": "rpc_completed",
                    "id": id,
                    "method": method,
                    "response": result,
                    "elapsed_ms": elapsed_ms,
                    "peer": peer,
                }),
            ),
            Err(error) => self.sink.emit(
                Level::Error,
                json!({
                    "event": "rpc_failed",
                    "id": id,
                    "method": method,
                    "code": error.code.as_str(),
                    "error": error.message,
                    "elapsed_ms": elapsed_ms,
                    "peer": peer,
                }),
            ),
        }

        RpcResponse::from_outcome(id, outcome)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::types::StatusCode;
    use std::sync::Mutex;

    #[derive(Default)]
    pub(crate) struct CapturingSink {
        pub(crate) records: Mutex<Vec<(Level, JsonValue)>>,
    }

    impl LogSink for CapturingSink {
        fn emit(&self, level: Level, record: JsonValue) {
            self.records.lock().expect("sink lock").push((level, record));
        }
    }

    fn peer() -> Option<SocketAddr> {
        Some("127.0.0.1:40000".parse().expect("addr"))
    }

    #[tokio::test]
    async fn success_is_logged_before_and_after() {
        let sink = Arc::new(CapturingSink::default());
        let interceptor = LoggingInterceptor::new(sink.clone());
        let request = RpcRequest::new(9, "aclapi.PingService/Ping", Some(json!({})));

        let response = interceptor
            .intercept(peer(), request, |method, _params| async move {
                assert_eq!(method, "aclapi.PingService/Ping");
                Ok(json!({ "message": "pong from module" }))
            })
            .await;

        assert_eq!(response.id, 9);
        assert_eq!(response.result, Some(json!({ "message": "pong from module" })));
        assert!(response.error.is_none());

        let records = sink.records.lock().expect("sink lock");
        assert_eq!(records.len(), 2);
        let (level, incoming) = &records[0];
        assert_eq!(*level, Level::Info);
        assert_eq!(incoming["event"], "rpc_incoming");
        assert_eq!(incoming["method"], "aclapi.PingService/Ping");
        assert_eq!(incoming["request"], json!({}));
        assert_eq!(incoming["peer"], "127.0.0.1:40000");
        let (level, completed) = &records[1];
        assert_eq!(*level, Level::Info);
        assert_eq!(completed["event"], "rpc_completed");
        assert_eq!(completed["response"]["message"], "pong from module");
    }

    #[tokio::test]
    async fn failure_is_logged_with_code_and_passed_through() {
        let sink = Arc::new(CapturingSink::default());
        let interceptor = LoggingInterceptor::new(sink.clone());
        let request = RpcRequest::new(10, "aclapi.Nope/Missing", None);

        let response = interceptor
            .intercept(None, request, |method, _params| async move {
                Err(RpcError::unimplemented(&method))
            })
            .await;

        assert!(response.result.is_none());
        assert_eq!(
            response.error,
            Some(RpcError::new(StatusCode::Unimplemented, "unknown method aclapi.Nope/Missing"))
        );

        let records = sink.records.lock().expect("sink lock");
        assert_eq!(records.len(), 2);
        let (level, failed) = &records[1];
        assert_eq!(*level, Level::Error);
        assert_eq!(failed["event"], "rpc_failed");
        assert_eq!(failed["code"], "Unimplemented");
        assert_eq!(failed["error"], "unknown method aclapi.Nope/Missing");
        assert!(failed["peer"].is_null());
        assert!(failed.get("response").is_none());
    }
}
