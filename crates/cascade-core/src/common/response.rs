//! Uniform envelope for non-streaming HTTP responses.
//!
//! Every JSON endpoint wraps its payload in [`ApiResponse`], so clients can
//! branch on `code` without inspecting transport status lines: 200 for
//! success, 4xx/5xx mirroring the HTTP status on failure.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct ApiResponse<T> {
    /// 200 on success, otherwise the HTTP status the failure maps to.
    pub code: u16,
    pub msg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: 200,
            msg: "ok".to_string(),
            data: Some(data),
        }
    }

    pub fn success_with_msg(data: T, msg: impl Into<String>) -> Self {
        Self {
            code: 200,
            msg: msg.into(),
            data: Some(data),
        }
    }

    pub fn error(code: u16, msg: impl Into<String>) -> Self {
        Self {
            code,
            msg: msg.into(),
            data: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_envelope_carries_data() {
        let json = serde_json::to_value(ApiResponse::success("pong")).unwrap();
        assert_eq!(json["code"], 200);
        assert_eq!(json["data"], "pong");
    }

    #[test]
    fn error_envelope_omits_data() {
        let json = serde_json::to_value(ApiResponse::<()>::error(409, "conflict")).unwrap();
        assert_eq!(json["code"], 409);
        assert_eq!(json["msg"], "conflict");
        assert!(json.get("data").is_none());
    }
}
