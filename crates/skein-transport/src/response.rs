//! The JSON envelope every Bot-API-style method answers with.
//!
//! ```json
//! { "ok": false, "error_code": 429, "description": "Too Many Requests",
//!   "parameters": { "retry_after": 5 } }
//! ```

use serde::Deserialize;
use serde::de::DeserializeOwned;

use skein_core::{ApiError, ApiResult};

/// Response envelope of a remote method.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    #[serde(default = "Option::default")]
    pub result: Option<T>,
    #[serde(default)]
    pub error_code: Option<u16>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: Option<ResponseParameters>,
}

/// Extra details attached to a failed call.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponseParameters {
    /// Seconds to wait before repeating the request.
    #[serde(default)]
    pub retry_after: Option<u64>,
    /// The group was upgraded to a supergroup with this id.
    #[serde(default)]
    pub migrate_to_chat_id: Option<i64>,
}

impl<T> ApiResponse<T> {
    /// Converts the envelope into the call result.
    ///
    /// `status` is the HTTP status, used when the body carries no error code.
    pub fn into_result(self, status: u16) -> ApiResult<T> {
        if self.ok {
            return self.result.ok_or_else(|| ApiError::Api {
                code: status,
                description: "response has no result".to_string(),
            });
        }

        let code = self.error_code.unwrap_or(status);
        let description = self
            .description
            .unwrap_or_else(|| "no description".to_string());
        let retry_after = self.parameters.and_then(|p| p.retry_after);
        Err(ApiError::from_status(code, description, retry_after))
    }
}

/// Parses a response body.
///
/// A body that is not an envelope is an error of its HTTP status, or a network
/// error if the status claims success.
pub fn parse_response<T: DeserializeOwned>(status: u16, body: &str) -> ApiResult<T> {
    match serde_json::from_str::<ApiResponse<T>>(body) {
        Ok(response) => response.into_result(status),
        Err(_) if !(200..300).contains(&status) => {
            Err(ApiError::from_status(status, body.trim(), None))
        }
        Err(e) => Err(ApiError::network(format!("invalid response body: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skein_core::{BotInfo, Update};
    use std::time::Duration;

    #[test]
    fn test_successful_updates() {
        let body = r#"{"ok":true,"result":[
            {"update_id":5,"message":{"message_id":1,"chat":{"id":1,"type":"private"},"text":"hi"}}
        ]}"#;
        let updates: Vec<Update> = parse_response(200, body).unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].update_id, 5);
        assert_eq!(updates[0].text(), Some("hi"));
    }

    #[test]
    fn test_get_me() {
        let body = r#"{"ok":true,"result":{"id":42,"is_bot":true,"first_name":"Skein","username":"skein_bot"}}"#;
        let me: BotInfo = parse_response(200, body).unwrap();
        assert_eq!(me.username.as_deref(), Some("skein_bot"));
    }

    #[test]
    fn test_rate_limit_carries_retry_after() {
        let body = r#"{"ok":false,"error_code":429,"description":"Too Many Requests: retry after 5","parameters":{"retry_after":5}}"#;
        let err = parse_response::<bool>(429, body).unwrap_err();
        assert_eq!(err.retry_after(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_fatal_errors() {
        let body = r#"{"ok":false,"error_code":401,"description":"Unauthorized"}"#;
        let err = parse_response::<bool>(401, body).unwrap_err();
        assert!(err.is_fatal_for_polling());

        let body = r#"{"ok":false,"error_code":409,"description":"Conflict: terminated by other getUpdates request"}"#;
        let err = parse_response::<Vec<Update>>(409, body).unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
    }

    #[test]
    fn test_non_json_bodies() {
        let err = parse_response::<bool>(502, "<html>Bad Gateway</html>").unwrap_err();
        assert!(err.is_server_error());

        let err = parse_response::<bool>(200, "not json").unwrap_err();
        assert!(matches!(err, ApiError::Network(_)));
    }

    #[test]
    fn test_missing_error_code_uses_status() {
        let err = parse_response::<bool>(400, r#"{"ok":false}"#).unwrap_err();
        assert_eq!(err.code(), Some(400));
    }
}
