use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tempo_engine::EngineError;

/// JSON-RPC-style request over the WebSocket.
#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    pub method: String,
    pub params: Option<serde_json::Value>,
    pub id: Option<serde_json::Value>,
}

/// Response wire format: `{ id, success, result?, error?: { code, message } }`.
#[derive(Debug, Serialize)]
pub struct RpcResponse {
    pub id: Option<serde_json::Value>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

#[derive(Debug, Serialize)]
pub struct RpcError {
    pub code: String,
    pub message: String,
}

impl RpcResponse {
    pub fn success(id: Option<serde_json::Value>, result: serde_json::Value) -> Self {
        Self {
            id,
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(
        id: Option<serde_json::Value>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id,
            success: false,
            result: None,
            error: Some(RpcError {
                code: code.into(),
                message: message.into(),
            }),
        }
    }

    /// Map a domain error to its stable string code.
    pub fn domain_error(id: Option<serde_json::Value>, err: &EngineError) -> Self {
        Self::error(id, err.code(), err.to_string())
    }

    pub fn method_not_found(id: Option<serde_json::Value>, method: &str) -> Self {
        Self::error(id, "METHOD_NOT_FOUND", format!("Method not found: {method}"))
    }

    pub fn invalid_params(id: Option<serde_json::Value>, msg: impl Into<String>) -> Self {
        Self::error(id, "INVALID_PARAMS", msg)
    }

    pub fn parse_error() -> Self {
        Self::error(None, "PARSE_ERROR", "Parse error")
    }
}

/// Extract a required string param.
pub fn require_str<'a>(params: &'a serde_json::Value, key: &str) -> Result<&'a str, String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| format!("Missing required parameter: {key}"))
}

/// Extract a required i64 param.
pub fn require_i64(params: &serde_json::Value, key: &str) -> Result<i64, String> {
    params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| format!("Missing required parameter: {key}"))
}

/// Extract an optional string param.
pub fn optional_str<'a>(params: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    params.get(key).and_then(|v| v.as_str())
}

/// Extract an optional i64 param.
pub fn optional_i64(params: &serde_json::Value, key: &str) -> Option<i64> {
    params.get(key).and_then(|v| v.as_i64())
}

/// Patch-style param: absent means "leave alone", explicit null means
/// "clear", a number sets the value.
pub fn optional_nullable_i64(params: &serde_json::Value, key: &str) -> Option<Option<i64>> {
    match params.get(key) {
        None => None,
        Some(v) if v.is_null() => Some(None),
        Some(v) => v.as_i64().map(|n| Some(n)),
    }
}

/// Patch-style string param, same tri-state as `optional_nullable_i64`.
pub fn optional_nullable_str(params: &serde_json::Value, key: &str) -> Option<Option<String>> {
    match params.get(key) {
        None => None,
        Some(v) if v.is_null() => Some(None),
        Some(v) => v.as_str().map(|s| Some(s.to_string())),
    }
}

/// Extract a required RFC 3339 timestamp param.
pub fn require_timestamp(params: &serde_json::Value, key: &str) -> Result<DateTime<Utc>, String> {
    let raw = require_str(params, key)?;
    parse_timestamp(raw, key)
}

/// Extract an optional RFC 3339 timestamp param.
pub fn optional_timestamp(
    params: &serde_json::Value,
    key: &str,
) -> Result<Option<DateTime<Utc>>, String> {
    match optional_str(params, key) {
        Some(raw) => parse_timestamp(raw, key).map(Some),
        None => Ok(None),
    }
}

fn parse_timestamp(raw: &str, key: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("Invalid timestamp for {key}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rpc_request() {
        let json = r#"{"method":"task.create","params":{"title":"Write paper"},"id":1}"#;
        let req: RpcRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.method, "task.create");
        assert!(req.params.is_some());
        assert_eq!(req.id, Some(serde_json::json!(1)));
    }

    #[test]
    fn success_response_serializes() {
        let resp = RpcResponse::success(Some(serde_json::json!(1)), serde_json::json!({"ok": true}));
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("\"result\""));
        assert!(!json.contains("\"error\""));
        assert!(json.contains("\"success\":true"));
    }

    #[test]
    fn domain_error_uses_engine_code() {
        let err = EngineError::DuplicateTagName("focus".into());
        let resp = RpcResponse::domain_error(Some(serde_json::json!(2)), &err);
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["code"], "DUPLICATE_TAG_NAME");
    }

    #[test]
    fn require_helpers() {
        let params = serde_json::json!({"name": "test", "count": 5});
        assert_eq!(require_str(&params, "name").unwrap(), "test");
        assert!(require_str(&params, "missing").is_err());
        assert_eq!(require_i64(&params, "count").unwrap(), 5);
        assert!(require_i64(&params, "name").is_err());
    }

    #[test]
    fn nullable_helpers_distinguish_absent_from_null() {
        let params = serde_json::json!({"estimate": null, "parent_id": 4});
        assert_eq!(optional_nullable_i64(&params, "estimate"), Some(None));
        assert_eq!(optional_nullable_i64(&params, "parent_id"), Some(Some(4)));
        assert_eq!(optional_nullable_i64(&params, "missing"), None);

        let params = serde_json::json!({"color": null});
        assert_eq!(optional_nullable_str(&params, "color"), Some(None));
        assert_eq!(optional_nullable_str(&params, "missing"), None);
    }

    #[test]
    fn timestamp_helpers() {
        let params = serde_json::json!({"at": "2026-03-01T10:00:00Z", "bad": "noon"});
        assert!(require_timestamp(&params, "at").is_ok());
        assert!(require_timestamp(&params, "bad").is_err());
        assert!(require_timestamp(&params, "missing").is_err());
        assert_eq!(optional_timestamp(&params, "missing").unwrap(), None);
        assert!(optional_timestamp(&params, "bad").is_err());
    }

    #[test]
    fn parse_error_has_no_id() {
        let resp = RpcResponse::parse_error();
        assert!(resp.id.is_none());
        assert_eq!(resp.error.as_ref().unwrap().code, "PARSE_ERROR");
        assert!(!resp.success);
    }
}
