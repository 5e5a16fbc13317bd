use regex::Regex;
use serde_json::{json, Value};
use std::sync::LazyLock;
use url::Url;

use crate::constants::CALLBACK_ENDPOINT;
use crate::error::{AppResult, AuthError};
use crate::models::{AppConfig, CallbackParams};
use crate::modules::auth::{post_backend_json, state};
use crate::modules::persistence::KeyValueStore;
use crate::modules::system::{device, logger};

static CODE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[?&#]code=([^&#\s]+)").expect("Invalid code regex"));
static STATE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[?&#]state=([^&#\s]+)").expect("Invalid state regex"));
static ERROR_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[?&#]error=([^&#\s]+)").expect("Invalid error regex"));

/// Some provider redirects arrive with the `?` swallowed, leaving the query
/// glued to the path (`/auth/callbackflowName=...`). Reinsert it before the
/// first query key so the standard parser can cope.
pub fn repair_callback_url(url: &str) -> String {
    if !url.contains('?') {
        if let Some(idx) = url.find("flowName=") {
            let (head, tail) = url.split_at(idx);
            return format!("{}?{}", head, tail);
        }
    }
    url.to_string()
}

fn params_from_parser(url: &str) -> CallbackParams {
    let mut params = CallbackParams::default();
    if let Ok(parsed) = Url::parse(url) {
        for (k, v) in parsed.query_pairs() {
            match k.as_ref() {
                "code" => params.code = Some(v.to_string()),
                "state" => params.state = Some(v.to_string()),
                "error" => params.error = Some(v.to_string()),
                _ => {}
            }
        }
    }
    params
}

fn capture(regex: &Regex, raw: &str) -> Option<String> {
    regex
        .captures(raw)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

fn code_from_path_segments(url: &str) -> Option<String> {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    for segment in without_query.split('/') {
        if let Some(idx) = segment.find("code=") {
            let value = &segment[idx + "code=".len()..];
            let value = value.split(['&', ';']).next().unwrap_or(value);
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

/// Progressively more permissive extraction: the URL parser first, then raw
/// regex matching, then a scan of path segments for an embedded `code=`.
pub fn extract_callback_params(url: &str) -> CallbackParams {
    let mut params = params_from_parser(url);
    if params.code.is_none() {
        params.code = capture(&CODE_REGEX, url);
    }
    if params.state.is_none() {
        params.state = capture(&STATE_REGEX, url);
    }
    if params.error.is_none() {
        params.error = capture(&ERROR_REGEX, url);
    }
    if params.code.is_none() {
        params.code = code_from_path_segments(url);
    }
    params
}

/// Processes a returned callback URL end to end: repair, extraction,
/// provider-error short-circuit, CSRF validation (which must abort before
/// the exchange call goes out), then the code exchange itself. Returns the
/// backend's response body for the token normalizer.
pub async fn handle_oauth_callback(
    config: &AppConfig,
    session: &dyn KeyValueStore,
    current_url: &str,
) -> AppResult<Value> {
    let repaired = repair_callback_url(current_url);
    if repaired != current_url {
        logger::log_warn("[W-AUTH-CALLBACK-REPAIR] repaired_malformed_callback_url");
    }

    let params = extract_callback_params(&repaired);

    if let Some(error) = params.error {
        logger::log_warn(&format!(
            "[W-AUTH-PROVIDER-ERROR] callback_returned_error: {}",
            error
        ));
        return Err(AuthError::Exchange(format!("provider_error: {}", error)));
    }

    let (code, state_value) = match (params.code, params.state) {
        (Some(code), Some(state_value)) => (code, state_value),
        (code, state_value) => {
            let mut missing = Vec::new();
            if code.is_none() {
                missing.push("code");
            }
            if state_value.is_none() {
                missing.push("state");
            }
            logger::log_error(&format!(
                "[E-AUTH-CALLBACK-PARAMS] callback_missing_parameters: {} url: {}",
                missing.join(", "),
                &repaired.chars().take(512).collect::<String>()
            ));
            return Err(AuthError::MissingParameters(missing.join(", ")));
        }
    };

    if !state::validate_state(session, &state_value) {
        return Err(AuthError::CsrfValidation);
    }

    let body = json!({
        "code": code,
        "state": state_value,
        "redirectUri": config.redirect_uri(),
        "clientInfo": device::device_info(),
    });
    let response = post_backend_json(config, CALLBACK_ENDPOINT, &body, true)
        .await
        .map_err(AuthError::Exchange)?;

    if response.get("success").and_then(Value::as_bool) == Some(false) {
        let message = response
            .get("error")
            .or_else(|| response.get("message"))
            .and_then(Value::as_str)
            .unwrap_or("backend_rejected_exchange");
        return Err(AuthError::Exchange(message.to_string()));
    }

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::SESSION_STATE_KEY;
    use crate::modules::persistence::MemoryStore;
    use crate::test_utils::spawn_backend_once;

    #[test]
    fn test_repair_reinserts_missing_question_mark() {
        assert_eq!(
            repair_callback_url("https://app.test/auth/callbackflowName=abc&code=X&state=Y"),
            "https://app.test/auth/callback?flowName=abc&code=X&state=Y"
        );
    }

    #[test]
    fn test_repair_leaves_wellformed_urls_alone() {
        let url = "https://app.test/auth/callback?flowName=abc&code=X";
        assert_eq!(repair_callback_url(url), url);
        // A URL with a query already present is never touched, even if it
        // also mentions flowName later in the string.
        let odd = "https://app.test/auth/callback?x=1&flowName=abc";
        assert_eq!(repair_callback_url(odd), odd);
    }

    #[test]
    fn test_extract_params_repaired_malformation() {
        let repaired =
            repair_callback_url("https://app.test/auth/callbackflowName=abc&code=X&state=Y");
        let params = extract_callback_params(&repaired);
        assert_eq!(params.code.as_deref(), Some("X"));
        assert_eq!(params.state.as_deref(), Some("Y"));
        assert_eq!(params.error, None);
    }

    #[test]
    fn test_extract_params_regex_fallback_on_unparseable_url() {
        // Not a valid absolute URL, so the parser yields nothing and the
        // regex pass has to recover the fields.
        let params = extract_callback_params("garbage text ?code=abc123&state=oauth_xyz");
        assert_eq!(params.code.as_deref(), Some("abc123"));
        assert_eq!(params.state.as_deref(), Some("oauth_xyz"));
    }

    #[test]
    fn test_extract_params_path_segment_last_resort() {
        let params = extract_callback_params("https://app.test/auth/code=embedded123/done");
        assert_eq!(params.code.as_deref(), Some("embedded123"));
        assert_eq!(params.state, None);
    }

    #[test]
    fn test_extract_params_error_field() {
        let params =
            extract_callback_params("https://app.test/auth/callback?error=access_denied&state=s");
        assert_eq!(params.error.as_deref(), Some("access_denied"));
    }

    fn test_config(backend: &str) -> AppConfig {
        let mut config = AppConfig::new();
        config.backend_base_url = backend.to_string();
        config.client_id = "client-123".to_string();
        config
    }

    #[tokio::test]
    async fn test_provider_error_short_circuits_before_state_validation() {
        let session = MemoryStore::new();
        // No pending state at all: an error param must still come back as
        // the provider error, not as a CSRF failure.
        let config = test_config("http://127.0.0.1:9");
        let err = handle_oauth_callback(
            &config,
            &session,
            "https://app.test/auth/callback?error=access_denied",
        )
        .await
        .unwrap_err();
        match err {
            AuthError::Exchange(e) => assert!(e.contains("access_denied")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_parameters_after_all_fallbacks() {
        let session = MemoryStore::new();
        let config = test_config("http://127.0.0.1:9");
        let err =
            handle_oauth_callback(&config, &session, "https://app.test/auth/callback?foo=bar")
                .await
                .unwrap_err();
        match err {
            AuthError::MissingParameters(missing) => {
                assert!(missing.contains("code"));
                assert!(missing.contains("state"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_csrf_failure_aborts_before_exchange() {
        let session = MemoryStore::new();
        state::store_state(&session, "oauth_expected").unwrap();
        // Port 9 is unreachable: if the exchange call were attempted the
        // error would be an Exchange failure, so CsrfValidation proves the
        // network call never went out.
        let config = test_config("http://127.0.0.1:9");
        let err = handle_oauth_callback(
            &config,
            &session,
            "https://app.test/auth/callback?code=X&state=mismatched",
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AuthError::CsrfValidation));
        // The pending state survives a mismatch for a retry.
        assert_eq!(
            session.get(SESSION_STATE_KEY).unwrap(),
            Some("oauth_expected".to_string())
        );
    }

    #[tokio::test]
    async fn test_exchange_posts_code_and_state() {
        let (backend, handle) =
            spawn_backend_once(r#"{"success":true,"access":"A","refresh":"R"}"#).await;
        let session = MemoryStore::new();
        state::store_state(&session, "oauth_abc123").unwrap();
        let config = test_config(&backend);

        let response = handle_oauth_callback(
            &config,
            &session,
            "https://app.test/auth/callback?code=X&state=oauth_abc123",
        )
        .await
        .unwrap();
        assert_eq!(response["access"], "A");

        let request = handle.await.unwrap();
        assert!(request.contains(&format!("POST {} ", CALLBACK_ENDPOINT)));
        assert!(request.to_ascii_lowercase().contains("x-api-key"));
        assert!(request.contains(r#""code":"X""#));
        assert!(request.contains(r#""state":"oauth_abc123""#));
        // Validation consumed the pending state.
        assert_eq!(session.get(SESSION_STATE_KEY).unwrap(), None);
        assert!(session
            .get(crate::constants::SESSION_BASE_STATE_KEY)
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_backend_reported_failure_maps_to_exchange_error() {
        let (backend, _handle) =
            spawn_backend_once(r#"{"success":false,"error":"invalid_grant"}"#).await;
        let session = MemoryStore::new();
        state::store_state(&session, "oauth_abc123").unwrap();
        let config = test_config(&backend);

        let err = handle_oauth_callback(
            &config,
            &session,
            "https://app.test/auth/callback?code=X&state=oauth_abc123",
        )
        .await
        .unwrap_err();
        match err {
            AuthError::Exchange(e) => assert_eq!(e, "invalid_grant"),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
