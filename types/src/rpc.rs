//! JSON-RPC 2.0 envelope and the closed method table.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

/// Value of the `jsonrpc` member on every message.
pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC error codes, including the session-layer range.
pub mod error_codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;

    // Session layer (-32000..=-32099)
    pub const SESSION_NOT_FOUND: i32 = -32001;
    pub const SESSION_NOT_BOUND: i32 = -32002;
    pub const SESSION_ALREADY_BOUND: i32 = -32003;

    /// Whether `code` belongs to the reserved session-layer range.
    pub fn is_session_error(code: i32) -> bool {
        (-32099..=-32000).contains(&code)
    }
}

/// JSON-RPC 2.0 Request.
///
/// `id` is `None` only when the member is absent (a notification). An
/// explicit `"id": null` is kept as `Some(Value::Null)` so it can be echoed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct JsonRpcRequest {
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(
        default,
        deserialize_with = "present_id",
        skip_serializing_if = "Option::is_none"
    )]
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub params: Option<Value>,
}

fn present_id<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl JsonRpcRequest {
    /// Create a request with the given correlation id.
    pub fn new(id: impl Into<Value>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id.into()),
            method: method.into(),
            params,
        }
    }

    /// Create a notification (no id, never answered).
    pub fn notification(method: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: None,
            method: method.into(),
            params: None,
        }
    }

    /// A message without an `id` member is a notification.
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// JSON-RPC 2.0 Response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    /// Echo of the request id; `null` when the request id could not be read.
    #[serde(default)]
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Create a success response.
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response.
    pub fn error(id: Value, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Split the envelope into its result or error.
    pub fn into_result(self) -> Result<Value, JsonRpcError> {
        match (self.result, self.error) {
            (_, Some(error)) => Err(error),
            (Some(result), None) => Ok(result),
            (None, None) => Ok(Value::Null),
        }
    }
}

/// JSON-RPC 2.0 Error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub data: Option<Value>,
}

impl fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

impl std::error::Error for JsonRpcError {}

/// The closed set of methods the server answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Initialize,
    Ping,
    ListResources,
    ReadResource,
    /// `notifications/initialized`
    Initialized,
    /// `notifications/cancelled`
    Cancelled,
}

const METHOD_TABLE: &[(&str, Method)] = &[
    ("initialize", Method::Initialize),
    ("ping", Method::Ping),
    ("resources/list", Method::ListResources),
    ("resources/read", Method::ReadResource),
    ("notifications/initialized", Method::Initialized),
    ("notifications/cancelled", Method::Cancelled),
];

impl Method {
    /// Resolve a wire method name. Anything outside the table is `None`.
    pub fn lookup(name: &str) -> Option<Self> {
        METHOD_TABLE
            .iter()
            .find(|(wire, _)| *wire == name)
            .map(|(_, method)| *method)
    }

    /// Wire name of this method.
    pub fn name(self) -> &'static str {
        METHOD_TABLE
            .iter()
            .find(|(_, method)| *method == self)
            .map(|(wire, _)| *wire)
            .unwrap_or("unknown")
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_null_id_is_kept_and_missing_id_is_notification() {
        let with_null: JsonRpcRequest =
            serde_json::from_value(json!({"jsonrpc": "2.0", "id": null, "method": "ping"}))
                .unwrap();
        assert_eq!(with_null.id, Some(Value::Null));
        assert!(!with_null.is_notification());

        let without: JsonRpcRequest = serde_json::from_value(
            json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
        )
        .unwrap();
        assert!(without.id.is_none());
        assert!(without.is_notification());
    }

    #[test]
    fn test_response_always_serializes_id() {
        let response = JsonRpcResponse::error(Value::Null, error_codes::PARSE_ERROR, "bad json");
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["id"], Value::Null);
        assert_eq!(value["error"]["code"], -32700);
        assert!(value.get("result").is_none());
    }

    #[test]
    fn test_into_result() {
        let ok = JsonRpcResponse::success(json!(7), json!({"a": 1}));
        assert_eq!(ok.into_result().unwrap(), json!({"a": 1}));

        let err = JsonRpcResponse::error(json!("x"), error_codes::INVALID_PARAMS, "nope");
        assert_eq!(err.into_result().unwrap_err().code, -32602);
    }

    #[test]
    fn test_method_table_is_closed() {
        assert_eq!(Method::lookup("initialize"), Some(Method::Initialize));
        assert_eq!(Method::lookup("resources/read"), Some(Method::ReadResource));
        assert_eq!(Method::lookup("tools/list"), None);
        assert_eq!(Method::lookup("Initialize"), None);

        for (_, method) in METHOD_TABLE {
            assert_eq!(Method::lookup(method.name()), Some(*method));
        }
    }

    #[test]
    fn test_session_error_range() {
        assert!(error_codes::is_session_error(error_codes::SESSION_NOT_FOUND));
        assert!(error_codes::is_session_error(error_codes::SESSION_ALREADY_BOUND));
        assert!(!error_codes::is_session_error(error_codes::INVALID_PARAMS));
    }
}
