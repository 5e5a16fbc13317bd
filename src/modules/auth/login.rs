use serde_json::{json, Value};

use crate::constants::LOGIN_ENDPOINT;
use crate::error::AuthError;
use crate::models::{AppConfig, LoginOutcome};
use crate::modules::auth::{post_backend_json, tokens};
use crate::modules::events::{self, AuthEvent};
use crate::modules::persistence::KeyValueStore;
use crate::modules::system::request_context::{self, FlowContext};
use crate::modules::system::{device, logger};

/// Direct login with a Google access token already in hand (no popup, no
/// callback). The response shape matches the callback exchange, so it flows
/// through the same normalizer and vault.
pub async fn login_with_google(
    config: &AppConfig,
    vault: &dyn KeyValueStore,
    email: &str,
    google_id: &str,
    access_token: &str,
) -> LoginOutcome {
    request_context::with_flow_context(
        FlowContext::for_attempt(),
        login_inner(config, vault, email, google_id, access_token),
    )
    .await
}

async fn login_inner(
    config: &AppConfig,
    vault: &dyn KeyValueStore,
    email: &str,
    google_id: &str,
    access_token: &str,
) -> LoginOutcome {
    let body = json!({
        "email": email,
        "googleId": google_id,
        "accessToken": access_token,
        "deviceInfo": device::device_info(),
    });

    let result = async {
        let response = post_backend_json(config, LOGIN_ENDPOINT, &body, true)
            .await
            .map_err(AuthError::Exchange)?;
        if response.get("success").and_then(Value::as_bool) == Some(false) {
            let message = response
                .get("error")
                .or_else(|| response.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("backend_rejected_login");
            return Err(AuthError::Exchange(message.to_string()));
        }
        tokens::finish_login(vault, &response)
    }
    .await;

    match result {
        Ok(user) => {
            logger::log_info(&format!("Google login completed for {}", email));
            events::emit(AuthEvent::LoginSucceeded { user: user.clone() });
            LoginOutcome::ok(user)
        }
        Err(e) => {
            logger::log_error(&format!("[E-AUTH-LOGIN] google_login_failed: {}", e));
            events::emit(AuthEvent::LoginFailed {
                error: e.to_string(),
            });
            LoginOutcome::failure(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};
    use crate::modules::persistence::MemoryStore;
    use crate::test_utils::spawn_backend_once;

    fn test_config(backend: &str) -> AppConfig {
        let mut config = AppConfig::new();
        config.backend_base_url = backend.to_string();
        config.client_id = "client-123".to_string();
        config
    }

    #[tokio::test]
    async fn test_login_persists_nested_tokens_and_reports_user() {
        let (backend, handle) = spawn_backend_once(
            r#"{"success":true,"tokens":{"access":"A","refresh":"R"},"user":{"email":"a@b.c"}}"#,
        )
        .await;
        let vault = MemoryStore::new();
        let config = test_config(&backend);

        let outcome =
            login_with_google(&config, &vault, "a@b.c", "google-1", "provider-token").await;
        assert!(outcome.success);
        assert_eq!(outcome.user.unwrap()["email"], "a@b.c");
        assert_eq!(vault.get(ACCESS_TOKEN_KEY).unwrap().as_deref(), Some("A"));
        assert_eq!(vault.get(REFRESH_TOKEN_KEY).unwrap().as_deref(), Some("R"));

        let request = handle.await.unwrap();
        assert!(request.contains(&format!("POST {} ", LOGIN_ENDPOINT)));
        assert!(request.contains(r#""googleId":"google-1""#));
        assert!(request.contains(r#""accessToken":"provider-token""#));
    }

    #[tokio::test]
    async fn test_login_backend_rejection_folds_into_outcome() {
        let (backend, _handle) =
            spawn_backend_once(r#"{"success":false,"message":"account_disabled"}"#).await;
        let vault = MemoryStore::new();
        let config = test_config(&backend);

        let outcome = login_with_google(&config, &vault, "a@b.c", "google-1", "tok").await;
        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("Token exchange failed: account_disabled"));
        assert_eq!(vault.get(ACCESS_TOKEN_KEY).unwrap(), None);
    }

    #[tokio::test]
    async fn test_login_network_failure_folds_into_outcome() {
        let vault = MemoryStore::new();
        let config = test_config("http://127.0.0.1:9");

        let outcome = login_with_google(&config, &vault, "a@b.c", "google-1", "tok").await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("Token exchange failed"));
    }
}
