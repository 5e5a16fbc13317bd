use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Access/refresh pair extracted from a backend auth response. Either half
/// may be absent; the normalizer persists whatever is present.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TokenPair {
    pub access: Option<String>,
    pub refresh: Option<String>,
}

impl TokenPair {
    pub fn is_empty(&self) -> bool {
        self.access.is_none() && self.refresh.is_none()
    }
}

/// Query parameters recovered from a callback URL. `error` is set when the
/// provider aborted the flow (e.g. the user denied consent).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

/// Response of the signin prepare endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct PrepareResponse {
    #[serde(rename = "authUrl")]
    pub auth_url: Option<String>,
}

/// Device metadata forwarded to the backend alongside prepare/login calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub platform: String,
    pub user_agent: String,
    pub language: String,
}

/// The only shape UI-facing callers ever see: errors are folded into
/// `error`, a user-closed popup is a neutral `cancelled` completion.
#[derive(Debug, Clone, Serialize)]
pub struct LoginOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<Value>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub cancelled: bool,
}

impl LoginOutcome {
    pub fn ok(user: Option<Value>) -> Self {
        Self {
            success: true,
            error: None,
            user,
            cancelled: false,
        }
    }

    pub fn failure(error: impl ToString) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
            user: None,
            cancelled: false,
        }
    }

    pub fn cancelled() -> Self {
        Self {
            success: false,
            error: None,
            user: None,
            cancelled: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_outcome_failure_serializes_error_only() {
        let json = serde_json::to_value(LoginOutcome::failure("boom")).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "boom");
        assert!(json.get("user").is_none());
        assert!(json.get("cancelled").is_none());
    }

    #[test]
    fn test_login_outcome_cancelled_is_not_an_error() {
        let json = serde_json::to_value(LoginOutcome::cancelled()).unwrap();
        assert_eq!(json["success"], false);
        assert!(json.get("error").is_none());
        assert_eq!(json["cancelled"], true);
    }

    #[test]
    fn test_prepare_response_reads_camel_case_auth_url() {
        let parsed: PrepareResponse =
            serde_json::from_str(r#"{"authUrl":"https://accounts.google.com/o/oauth2/auth"}"#)
                .unwrap();
        assert!(parsed.auth_url.unwrap().starts_with("https://accounts"));
    }
}
