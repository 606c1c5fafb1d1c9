//! JSON-RPC 2.0 message model.
//!
//! A single [`Message`] shape covers requests, notifications and responses;
//! which one a frame is depends on which optional members are present.

use serde::de::DeserializeOwned;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::error_code::RpcError;

/// JSON-RPC version string.
pub const JSONRPC_VERSION: &str = "2.0";

/// Message model errors.
#[derive(Error, Debug)]
pub enum MessageError {
    /// Frame is not a valid JSON-RPC object.
    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// Response has no id.
    #[error("Response is missing its id")]
    MissingId,

    /// Response does not carry exactly one of `result` / `error`.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The peer answered with an error object.
    #[error("Remote error: {0}")]
    Remote(RpcError),
}

/// Role of a message, derived from its members.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// `method` and `id` set; a response is expected.
    Request,
    /// `method` set without `id`; never answered.
    Notification,
    /// `method` unset, `id` set.
    Response,
}

/// One JSON-RPC frame.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Message {
    /// Protocol version, stamped on send.
    #[serde(default)]
    pub jsonrpc: String,
    /// Method name (requests and notifications).
    #[serde(default)]
    pub method: Option<String>,
    /// Correlation id.
    #[serde(default)]
    pub id: Option<String>,
    /// Request parameters.
    #[serde(default)]
    pub params: Option<serde_json::Value>,
    /// Success payload (responses).
    #[serde(default, deserialize_with = "present")]
    pub result: Option<serde_json::Value>,
    /// Error payload (responses).
    #[serde(default)]
    pub error: Option<RpcError>,
}

/// Keep an explicit `null` as `Some(Value::Null)`; `Option` would erase it.
fn present<'de, D>(deserializer: D) -> Result<Option<serde_json::Value>, D::Error>
where
    D: Deserializer<'de>,
{
    serde_json::Value::deserialize(deserializer).map(Some)
}

impl Serialize for Message {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("jsonrpc", &self.jsonrpc)?;
        if let Some(method) = &self.method {
            map.serialize_entry("method", method)?;
        }
        // Responses always carry an id, `null` when the request was unidentifiable.
        if self.id.is_some() || self.method.is_none() {
            map.serialize_entry("id", &self.id)?;
        }
        if let Some(params) = &self.params {
            map.serialize_entry("params", params)?;
        }
        if let Some(result) = &self.result {
            map.serialize_entry("result", result)?;
        }
        if let Some(error) = &self.error {
            map.serialize_entry("error", error)?;
        }
        map.end()
    }
}

impl Message {
    /// Create a request. The id is assigned when it is sent.
    #[must_use]
    pub fn request(method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: Some(method.into()),
            id: None,
            params,
            result: None,
            error: None,
        }
    }

    /// Create a notification.
    #[must_use]
    pub fn notification(method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self::request(method, params)
    }

    /// Create a success response.
    #[must_use]
    pub fn result(id: Option<String>, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: None,
            id,
            params: None,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response.
    #[must_use]
    pub fn error(id: Option<String>, error: impl Into<RpcError>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: None,
            id,
            params: None,
            result: None,
            error: Some(error.into()),
        }
    }

    /// Set an explicit id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Classify the message. `None` means neither `method` nor `id` is set.
    #[must_use]
    pub fn kind(&self) -> Option<MessageKind> {
        match (&self.method, &self.id) {
            (Some(_), Some(_)) => Some(MessageKind::Request),
            (Some(_), None) => Some(MessageKind::Notification),
            (None, Some(_)) => Some(MessageKind::Response),
            (None, None) => None,
        }
    }

    /// Whether the version member is the one this protocol speaks.
    #[must_use]
    pub fn has_valid_version(&self) -> bool {
        self.jsonrpc == JSONRPC_VERSION
    }

    /// Deserialize `params` into a typed value. Missing params decode from `null`.
    ///
    /// # Errors
    ///
    /// Returns error if the params do not match `T`.
    pub fn params_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.params.clone().unwrap_or(serde_json::Value::Null))
    }

    /// Decode one frame.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes are not a JSON-RPC object.
    pub fn decode(bytes: &[u8]) -> Result<Self, MessageError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Encode as one frame.
    ///
    /// # Errors
    ///
    /// Returns error if a payload cannot be serialized.
    pub fn encode(&self) -> Result<String, MessageError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Convert a response-shaped message into a structured [`Response`].
    ///
    /// # Errors
    ///
    /// Returns error if the id is missing or the message does not carry
    /// exactly one of `result` and `error`.
    pub fn into_response(self) -> Result<Response, MessageError> {
        let id = self.id.ok_or(MessageError::MissingId)?;
        let outcome = match (self.result, self.error) {
            (Some(result), None) => Ok(result),
            (None, Some(error)) => Err(error),
            (Some(_), Some(_)) => {
                return Err(MessageError::InvalidResponse(
                    "both result and error are set".to_string(),
                ));
            }
            (None, None) => {
                return Err(MessageError::InvalidResponse(
                    "neither result nor error is set".to_string(),
                ));
            }
        };
        Ok(Response { id, outcome })
    }
}

/// A decoded response, handed to completion callbacks.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Id of the request this answers.
    pub id: String,
    /// Result or error object.
    pub outcome: Result<serde_json::Value, RpcError>,
}

impl Response {
    /// Whether the peer answered with an error.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.outcome.is_err()
    }

    /// Deserialize the result into a typed value.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::Remote`] for error responses, or a decode error
    /// if the result does not match `T`.
    pub fn result_as<T: DeserializeOwned>(&self) -> Result<T, MessageError> {
        match &self.outcome {
            Ok(value) => Ok(serde_json::from_value(value.clone())?),
            Err(error) => Err(MessageError::Remote(error.clone())),
        }
    }

    /// Turn back into a wire message.
    #[must_use]
    pub fn into_message(self) -> Message {
        match self.outcome {
            Ok(result) => Message::result(Some(self.id), result),
            Err(error) => Message::error(Some(self.id), error),
        }
    }
}
