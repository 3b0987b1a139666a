use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct RpcRequest {
    pub id: u64,
    pub method: String,
    pub params: Option<JsonValue>,
}

impl RpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Option<JsonValue>) -> Self {
        Self { id, method: method.into(), params }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct RpcResponse {
    pub id: u64,
    pub result: Option<JsonValue>,
    pub error: Option<RpcError>,
}

impl RpcResponse {
    pub fn from_outcome(id: u64, outcome: Result<JsonValue, RpcError>) -> Self {
        match outcome {
            Ok(result) => Self { id, result: Some(result), error: None },
            Err(error) => Self { id, result: None, error: Some(error) },
        }
    }
}

/// Transport-level status of a call, named after the gRPC codes.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
pub enum StatusCode {
    InvalidArgument,
    Unimplemented,
    Internal,
}

impl StatusCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidArgument => "InvalidArgument",
            Self::Unimplemented => "Unimplemented",
            Self::Internal => "Internal",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, thiserror::Error)]
#[error("{code}: {message}")]
pub struct RpcError {
    pub code: StatusCode,
    pub message: String,
}

impl RpcError {
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(StatusCode::InvalidArgument, message)
    }

    pub fn unimplemented(method: &str) -> Self {
        Self::new(StatusCode::Unimplemented, format!("unknown method {method}"))
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Internal, message)
    }
}
