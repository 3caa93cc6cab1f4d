use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::VerifyError;

pub const METHOD_NOT_FOUND: i64 = -32601;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id,
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn ok(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    /// Resolve this response against the request it should answer.
    pub fn into_result(self, expected_id: u64) -> Result<Value, VerifyError> {
        if self.id.as_u64() != Some(expected_id) {
            return Err(VerifyError::protocol(format!(
                "response id {} does not match request id {}",
                self.id, expected_id
            )));
        }
        if let Some(err) = self.error {
            return Err(VerifyError::protocol(format!(
                "server returned error {}: {}",
                err.code, err.message
            )));
        }
        self.result
            .ok_or_else(|| VerifyError::protocol("response has neither 'result' nor 'error'"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A frame received from the server.
#[derive(Debug, Clone)]
pub enum Incoming {
    Response(JsonRpcResponse),
    /// Server-initiated request that expects an answer.
    Request { id: Value, method: String },
    Notification { method: String },
}

impl Incoming {
    pub fn classify(raw: Value) -> Result<Self, VerifyError> {
        let has_id = raw.get("id").is_some_and(|id| !id.is_null());
        match raw.get("method").and_then(Value::as_str) {
            Some(method) if has_id => Ok(Self::Request {
                id: raw["id"].clone(),
                method: method.to_string(),
            }),
            Some(method) => Ok(Self::Notification {
                method: method.to_string(),
            }),
            None => serde_json::from_value(raw)
                .map(Self::Response)
                .map_err(|e| VerifyError::protocol(format!("malformed JSON-RPC response: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_omits_missing_params() {
        let line = serde_json::to_string(&JsonRpcRequest::new(7, "tools/list", None)).unwrap();
        assert_eq!(line, r#"{"jsonrpc":"2.0","id":7,"method":"tools/list"}"#);
    }

    #[test]
    fn classify_distinguishes_frames() {
        assert!(matches!(
            Incoming::classify(json!({"jsonrpc":"2.0","id":1,"result":{}})).unwrap(),
            Incoming::Response(_)
        ));
        assert!(matches!(
            Incoming::classify(json!({"jsonrpc":"2.0","id":"srv-1","method":"ping"})).unwrap(),
            Incoming::Request { .. }
        ));
        assert!(matches!(
            Incoming::classify(json!({"jsonrpc":"2.0","method":"notifications/message"}))
                .unwrap(),
            Incoming::Notification { .. }
        ));
    }

    #[test]
    fn into_result_checks_correlation_and_error() {
        let resp = JsonRpcResponse::ok(json!(3), json!({"ok": true}));
        assert_eq!(resp.clone().into_result(3).unwrap(), json!({"ok": true}));

        let err = resp.into_result(4).unwrap_err();
        assert!(err.to_string().contains("does not match request id 4"));

        let err = JsonRpcResponse::err(json!(5), -32000, "boom")
            .into_result(5)
            .unwrap_err();
        assert!(matches!(err, VerifyError::Protocol(ref m) if m.contains("boom")));
    }

    #[test]
    fn response_without_result_or_error_is_rejected() {
        let resp: JsonRpcResponse =
            serde_json::from_value(json!({"jsonrpc":"2.0","id":1})).unwrap();
        assert!(resp.into_result(1).is_err());
    }
}
