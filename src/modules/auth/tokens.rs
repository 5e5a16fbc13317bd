use serde_json::Value;

use crate::constants::{ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, USER_RECORD_KEY};
use crate::error::{AppResult, AuthError};
use crate::models::TokenPair;
use crate::modules::persistence::KeyValueStore;
use crate::modules::system::logger;

/// The backend serves tokens in two shapes, sometimes both at once: direct
/// `access`/`refresh` fields, or nested one level under `tokens`. Both spots
/// are checked independently; the nested pair is applied second, so when the
/// shapes disagree the nested values win.
pub fn extract_tokens(response: &Value) -> TokenPair {
    let mut pair = TokenPair::default();
    if let Some(access) = response.get("access").and_then(Value::as_str) {
        pair.access = Some(access.to_string());
    }
    if let Some(refresh) = response.get("refresh").and_then(Value::as_str) {
        pair.refresh = Some(refresh.to_string());
    }
    if let Some(tokens) = response.get("tokens") {
        if let Some(access) = tokens.get("access").and_then(Value::as_str) {
            pair.access = Some(access.to_string());
        }
        if let Some(refresh) = tokens.get("refresh").and_then(Value::as_str) {
            pair.refresh = Some(refresh.to_string());
        }
    }
    pair
}

/// Upserts whatever the response carried into the shared vault, then
/// re-reads to confirm the write actually landed. Individual write failures
/// are logged, not fatal; the one hard requirement is that the access token
/// ends up readable.
pub fn finish_login(vault: &dyn KeyValueStore, response: &Value) -> AppResult<Option<Value>> {
    let pair = extract_tokens(response);
    let Some(access) = pair.access.as_deref() else {
        return Err(AuthError::Exchange(
            "access_token_missing_in_response".to_string(),
        ));
    };

    if let Err(e) = vault.set(ACCESS_TOKEN_KEY, access) {
        logger::log_warn(&format!(
            "[W-AUTH-VAULT-WRITE] failed_to_write_access_token: {}",
            e
        ));
    }
    if let Some(refresh) = pair.refresh.as_deref() {
        if let Err(e) = vault.set(REFRESH_TOKEN_KEY, refresh) {
            logger::log_warn(&format!(
                "[W-AUTH-VAULT-WRITE] failed_to_write_refresh_token: {}",
                e
            ));
        }
    }

    let user = response.get("user").cloned();
    if let Some(user_value) = user.as_ref() {
        match serde_json::to_string(user_value) {
            Ok(serialized) => {
                if let Err(e) = vault.set(USER_RECORD_KEY, &serialized) {
                    logger::log_warn(&format!(
                        "[W-AUTH-VAULT-WRITE] failed_to_write_user_record: {}",
                        e
                    ));
                }
            }
            Err(e) => {
                logger::log_warn(&format!(
                    "[W-AUTH-VAULT-WRITE] failed_to_serialize_user_record: {}",
                    e
                ));
            }
        }
    }

    let persisted = vault
        .get(ACCESS_TOKEN_KEY)
        .ok()
        .flatten()
        .map(|v| v == access)
        .unwrap_or(false);
    if !persisted {
        logger::log_error("[E-AUTH-VAULT-VERIFY] access_token_not_readable_after_write");
        return Err(AuthError::Storage(
            "access_token_not_persisted".to_string(),
        ));
    }

    logger::log_info("Login tokens persisted and verified");
    Ok(user)
}
