//! Error code catalog.
//!
//! Reserved JSON-RPC 2.0 codes plus the application range (values `>= 0`).

use serde::{Deserialize, Serialize};
use std::fmt;

/// A catalogued error kind: numeric code plus its canonical message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode {
    /// Numeric code sent on the wire.
    pub code: i64,
    /// Canonical message sent on the wire.
    pub message: &'static str,
}

impl ErrorCode {
    /// Define a new error code.
    #[must_use]
    pub const fn new(code: i64, message: &'static str) -> Self {
        Self { code, message }
    }

    /// Whether the code lies in the JSON-RPC reserved range.
    #[must_use]
    pub const fn is_reserved(&self) -> bool {
        self.code <= -32000 && self.code >= -32768
    }

    /// Build the wire error object for this code.
    #[must_use]
    pub fn to_error(self, data: Option<serde_json::Value>) -> RpcError {
        RpcError {
            code: self.code,
            message: self.message.to_string(),
            data,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

// Standard JSON-RPC error codes
/// Parse error.
pub const PARSE_ERROR: ErrorCode = ErrorCode::new(-32700, "Parse error");
/// Invalid request.
pub const INVALID_REQUEST: ErrorCode = ErrorCode::new(-32600, "Invalid request");
/// Method not found.
pub const METHOD_NOT_FOUND: ErrorCode = ErrorCode::new(-32601, "Method not found");
/// Invalid params.
pub const INVALID_PARAMS: ErrorCode = ErrorCode::new(-32602, "Invalid params");
/// Internal error.
pub const INTERNAL_ERROR: ErrorCode = ErrorCode::new(-32603, "Internal error");

// Application error codes
/// An entry with the same key already exists.
pub const DUPLICATE_ENTRY: ErrorCode = ErrorCode::new(1, "Duplicate entry");
/// A required parameter is missing.
pub const PARAMETER_NOT_FOUND: ErrorCode = ErrorCode::new(2, "Parameter not found");
/// No client is registered under the given identifier.
pub const CLIENT_NOT_FOUND: ErrorCode = ErrorCode::new(3, "Client not found");

/// JSON-RPC error object, as carried in a response's `error` member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    /// Error code.
    pub code: i64,
    /// Error message.
    pub message: String,
    /// Additional data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl RpcError {
    /// Whether this error carries the given catalog code.
    #[must_use]
    pub fn is(&self, code: ErrorCode) -> bool {
        self.code == code.code
    }
}

impl From<ErrorCode> for RpcError {
    fn from(code: ErrorCode) -> Self {
        code.to_error(None)
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

impl std::error::Error for RpcError {}
