//! JSON-RPC message model.
//!
//! A [`Message`] is exactly one of request, response, or notification. The
//! classification happens once, at decode time, so the rest of the crate
//! never inspects raw JSON shapes.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ProtocolError;

/// JSON-RPC error code for an unsupported server→client request.
pub const METHOD_NOT_FOUND: i64 = -32601;

/// Correlation token shared by a request and its response.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl From<i64> for RequestId {
    fn from(id: i64) -> Self {
        Self::Number(id)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s:?}"),
        }
    }
}

/// The `error` member of a failed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ResponseError {
    #[must_use]
    pub fn method_not_found(method: &str) -> Self {
        Self {
            code: METHOD_NOT_FOUND,
            message: format!("Method not found: {method}"),
            data: None,
        }
    }
}

impl fmt::Display for ResponseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request {
        id: RequestId,
        method: String,
        params: Option<Value>,
    },
    Response {
        id: RequestId,
        outcome: Result<Value, ResponseError>,
    },
    Notification {
        method: String,
        params: Option<Value>,
    },
}

impl Message {
    pub fn request(
        id: impl Into<RequestId>,
        method: impl Into<String>,
        params: Option<Value>,
    ) -> Self {
        Self::Request {
            id: id.into(),
            method: method.into(),
            params,
        }
    }

    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self::Notification {
            method: method.into(),
            params,
        }
    }

    #[must_use]
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request { method, .. } | Self::Notification { method, .. } => Some(method),
            Self::Response { .. } => None,
        }
    }

    #[must_use]
    pub fn id(&self) -> Option<&RequestId> {
        match self {
            Self::Request { id, .. } | Self::Response { id, .. } => Some(id),
            Self::Notification { .. } => None,
        }
    }

    #[must_use]
    pub fn is_notification(&self, expected: &str) -> bool {
        matches!(self, Self::Notification { method, .. } if method == expected)
    }

    /// Wire representation, always tagged `"jsonrpc": "2.0"`.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("jsonrpc".into(), Value::from("2.0"));
        match self {
            Self::Request { id, method, params } => {
                obj.insert("id".into(), id_value(id));
                obj.insert("method".into(), Value::from(method.as_str()));
                if let Some(params) = params {
                    obj.insert("params".into(), params.clone());
                }
            }
            Self::Response { id, outcome } => {
                obj.insert("id".into(), id_value(id));
                match outcome {
                    Ok(result) => {
                        obj.insert("result".into(), result.clone());
                    }
                    Err(error) => {
                        obj.insert(
                            "error".into(),
                            serde_json::to_value(error).unwrap_or(Value::Null),
                        );
                    }
                }
            }
            Self::Notification { method, params } => {
                obj.insert("method".into(), Value::from(method.as_str()));
                if let Some(params) = params {
                    obj.insert("params".into(), params.clone());
                }
            }
        }
        Value::Object(obj)
    }

    /// Classify a decoded JSON value.
    ///
    /// A present-but-null `result` still counts as a result, since `shutdown`
    /// legitimately answers with `null`.
    pub fn from_value(value: Value) -> Result<Self, ProtocolError> {
        let Value::Object(mut obj) = value else {
            return Err(ProtocolError::InvalidMessage(
                "top-level value is not an object".into(),
            ));
        };

        let id = match obj.remove("id") {
            None | Some(Value::Null) => None,
            Some(raw) => Some(serde_json::from_value::<RequestId>(raw).map_err(|_| {
                ProtocolError::InvalidMessage("id must be a number or string".into())
            })?),
        };
        let method = match obj.remove("method") {
            None => None,
            Some(Value::String(m)) => Some(m),
            Some(_) => {
                return Err(ProtocolError::InvalidMessage(
                    "method must be a string".into(),
                ));
            }
        };
        let params = obj.remove("params");
        let result = obj.remove("result");
        let error = obj.remove("error");

        match (id, method, result, error) {
            (Some(id), Some(method), None, None) => Ok(Self::Request { id, method, params }),
            (None, Some(method), None, None) => Ok(Self::Notification { method, params }),
            (Some(id), None, Some(result), None) => Ok(Self::Response {
                id,
                outcome: Ok(result),
            }),
            (Some(id), None, None, Some(error)) => {
                let error = serde_json::from_value::<ResponseError>(error).map_err(|e| {
                    ProtocolError::InvalidMessage(format!("malformed error object: {e}"))
                })?;
                Ok(Self::Response {
                    id,
                    outcome: Err(error),
                })
            }
            (_, _, Some(_), Some(_)) => Err(ProtocolError::InvalidMessage(
                "response carries both result and error".into(),
            )),
            _ => Err(ProtocolError::InvalidMessage(
                "ambiguous combination of id, method, result, and error".into(),
            )),
        }
    }
}

fn id_value(id: &RequestId) -> Value {
    match id {
        RequestId::Number(n) => Value::from(*n),
        RequestId::String(s) => Value::from(s.as_str()),
    }
}
