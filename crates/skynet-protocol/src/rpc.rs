use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC 2.0 standard error codes (and the registry's extension range).
pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

/// A JSON-RPC id. Per spec, may be a string, a number, or null (on a
/// response only — requests must carry a non-null id to get a response).
/// An integer-valued number normalizes to its decimal string form so callers
/// always compare ids as strings; any other JSON type is rejected at parse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcId {
    String(String),
    Number(i64),
    Null,
}

impl RpcId {
    /// Normalize to the canonical string form used for correlation/logging.
    pub fn as_normalized_string(&self) -> Option<String> {
        match self {
            RpcId::String(s) => Some(s.clone()),
            RpcId::Number(n) => Some(n.to_string()),
            RpcId::Null => None,
        }
    }

    /// Parse a raw JSON value into an `RpcId`, applying the normalization
    /// rule for integer-valued floats (`2.0` -> `RpcId::Number(2)`) and
    /// rejecting any other JSON type (bool, array, object, fractional number).
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(RpcId::String(s.clone())),
            Value::Null => Some(RpcId::Null),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(RpcId::Number(i))
                } else {
                    n.as_f64().and_then(|f| {
                        if f.fract() == 0.0 {
                            Some(RpcId::Number(f as i64))
                        } else {
                            None
                        }
                    })
                }
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    #[serde(rename = "jsonrpc")]
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
}

impl RpcRequest {
    pub fn new(method: impl Into<String>, params: Option<Value>, id: RpcId) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params,
            id: Some(rpc_id_to_value(&id)),
        }
    }

    /// A request with no id is a notification: the caller expects no response.
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

fn rpc_id_to_value(id: &RpcId) -> Value {
    match id {
        RpcId::String(s) => Value::String(s.clone()),
        RpcId::Number(n) => Value::Number((*n).into()),
        RpcId::Null => Value::Null,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    pub id: Value,
}

impl RpcResponse {
    pub fn success(id: RpcId, result: impl Serialize) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(serde_json::to_value(result).unwrap_or(Value::Null)),
            error: None,
            id: rpc_id_to_value(&id),
        }
    }

    pub fn failure(id: RpcId, error: RpcError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(error),
            id: rpc_id_to_value(&id),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: impl Serialize) -> Self {
        self.data = Some(serde_json::to_value(data).unwrap_or(Value::Null));
        self
    }

    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(PARSE_ERROR, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(INVALID_REQUEST, message)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(METHOD_NOT_FOUND, format!("method not found: {method}"))
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(INVALID_PARAMS, message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(INTERNAL_ERROR, message)
    }
}

/// Server → client push with no matching request (e.g. a streamed chunk).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl RpcNotification {
    pub fn new(method: impl Into<String>, params: impl Serialize) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params: Some(serde_json::to_value(params).unwrap_or(Value::Null)),
        }
    }
}

/// Parse a raw incoming frame, surfacing a `PARSE_ERROR`/`INVALID_REQUEST`
/// `RpcError` the caller can echo back as a response with a null id, per
/// JSON-RPC 2.0's rule for requests that never resolved to a valid id.
pub fn parse_request(raw: &str) -> Result<RpcRequest, RpcError> {
    let value: Value =
        serde_json::from_str(raw).map_err(|e| RpcError::parse_error(e.to_string()))?;
    if value.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
        return Err(RpcError::invalid_request("missing or invalid jsonrpc version"));
    }
    if let Some(id) = value.get("id") {
        if RpcId::from_value(id).is_none() {
            return Err(RpcError::invalid_request("id must be a string, integer, or null"));
        }
    }
    match value.get("method").and_then(Value::as_str) {
        Some(m) if !m.trim().is_empty() => {}
        _ => return Err(RpcError::invalid_request("method must be a non-empty string")),
    }
    serde_json::from_value(value).map_err(|e| RpcError::invalid_request(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_valued_float_id_normalizes_to_decimal_string() {
        let id = RpcId::from_value(&serde_json::json!(2.0)).unwrap();
        assert_eq!(id, RpcId::Number(2));
        assert_eq!(id.as_normalized_string(), Some("2".to_string()));
    }

    #[test]
    fn fractional_id_is_rejected() {
        assert!(RpcId::from_value(&serde_json::json!(2.5)).is_none());
    }

    #[test]
    fn object_id_is_rejected() {
        assert!(RpcId::from_value(&serde_json::json!({"a": 1})).is_none());
    }

    #[test]
    fn parse_request_rejects_blank_method() {
        let raw = r#"{"jsonrpc":"2.0","method":"   ","id":"1"}"#;
        let err = parse_request(raw).unwrap_err();
        assert_eq!(err.code, INVALID_REQUEST);
    }

    #[test]
    fn parse_request_rejects_missing_jsonrpc_version() {
        let raw = r#"{"method":"health","id":"1"}"#;
        let err = parse_request(raw).unwrap_err();
        assert_eq!(err.code, INVALID_REQUEST);
    }

    #[test]
    fn parse_request_accepts_well_formed_request() {
        let raw = r#"{"jsonrpc":"2.0","method":"health","id":"1"}"#;
        let req = parse_request(raw).unwrap();
        assert_eq!(req.method, "health");
        assert!(!req.is_notification());
    }

    #[test]
    fn request_with_no_id_is_a_notification() {
        let raw = r#"{"jsonrpc":"2.0","method":"health"}"#;
        let req = parse_request(raw).unwrap();
        assert!(req.is_notification());
    }
}
