//! # wsrpc Core
//!
//! Protocol types and configuration for wsrpc.
//!
//! This crate provides:
//! - The JSON-RPC 2.0 message model shared by both directions of a connection
//! - The error code catalog (reserved and application codes)
//! - Configuration loading and validation (JSON5 format)

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error_code;
pub mod message;
pub mod types;

pub use config::{Config, ConfigError, LogFormat};
pub use error_code::{ErrorCode, RpcError};
pub use message::{JSONRPC_VERSION, Message, MessageError, MessageKind, Response};
pub use types::{ClientId, new_request_id};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error_code::{self, ErrorCode, RpcError};
    pub use crate::message::{Message, MessageKind, Response};
    pub use crate::types::ClientId;
}
