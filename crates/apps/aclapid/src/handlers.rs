use std::sync::Arc;

use aclapi_dispatch::{AclRequest, Dispatcher};
use aclapi_rpc::{decode_params, encode_result, RpcError, RpcService};
use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};

pub const ACL_SERVICE: &str = "aclapi.ACLService";
pub const PING_SERVICE: &str = "aclapi.PingService";
pub const PING_MESSAGE: &str = "pong from module";

/// `aclapi.ACLService/ApplyACLEntry`. ACL failures are results, never RPC errors.
pub struct AclService {
    dispatcher: Arc<Dispatcher>,
}

impl AclService {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }
}

#[async_trait]
impl RpcService for AclService {
    fn name(&self) -> &'static str {
        ACL_SERVICE
    }

    fn methods(&self) -> &'static [&'static str] {
        &["ApplyACLEntry"]
    }

    async fn call(&self, method: &str, params: Option<JsonValue>) -> Result<JsonValue, RpcError> {
        match method {
            "ApplyACLEntry" => {
                let request: AclRequest = decode_params(params)?;
                let result = self.dispatcher.dispatch(&request.target_path, &request.entry).await;
                encode_result(&result)
            }
            other => Err(RpcError::unimplemented(other)),
        }
    }
}

/// `aclapi.PingService/Ping`. Liveness only.
pub struct PingService;

#[async_trait]
impl RpcService for PingService {
    fn name(&self) -> &'static str {
        PING_SERVICE
    }

    fn methods(&self) -> &'static [&'static str] {
        &["Ping"]
    }

    async fn call(&self, method: &str, _params: Option<JsonValue>) -> Result<JsonValue, RpcError> {
        match method {
            "Ping" => Ok(json!({ "message": PING_MESSAGE })),
            other => Err(RpcError::unimplemented(other)),
        }
    }
}
