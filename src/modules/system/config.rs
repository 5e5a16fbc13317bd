use std::fs;

use crate::models::AppConfig;
use crate::modules::system::device::get_data_dir;

const CONFIG_FILE: &str = "config.json";

fn env_first(keys: &[&str]) -> Option<String> {
    for k in keys {
        if let Ok(v) = std::env::var(k) {
            let t = v.trim();
            if !t.is_empty() {
                return Some(t.to_string());
            }
        }
    }
    None
}

pub fn load_app_config() -> Result<AppConfig, String> {
    let data_dir = get_data_dir()?;

    let config_path = data_dir.join(CONFIG_FILE);

    if !config_path.exists() {
        let config = AppConfig::new();
        let _ = save_app_config(&config);
        return Ok(config);
    }

    let content = fs::read_to_string(&config_path)
        .map_err(|e| format!("failed_to_read_config_file: {}", e))?;

    let config: AppConfig =
        serde_json::from_str(&content).map_err(|e| format!("failed_to_parse_config_file: {}", e))?;

    Ok(config)
}
pub fn save_app_config(config: &AppConfig) -> Result<(), String> {
    let data_dir = get_data_dir()?;
    let config_path = data_dir.join(CONFIG_FILE);

    let content = serde_json::to_string_pretty(config)
        .map_err(|e| format!("failed_to_serialize_config: {}", e))?;

    fs::write(&config_path, content).map_err(|e| format!("failed_to_save_config: {}", e))
}
/// Environment beats the config file so containerized deployments never need
/// to ship one.
pub fn apply_env_overrides(config: &mut AppConfig) {
    if let Some(url) = env_first(&["MONETA_BACKEND_URL", "BACKEND_URL"]) {
        config.backend_base_url = url;
    }
    if let Some(key) = env_first(&["MONETA_API_KEY", "API_KEY"]) {
        config.api_key = key;
    }
    if let Some(id) = env_first(&["MONETA_GOOGLE_CLIENT_ID", "GOOGLE_CLIENT_ID"]) {
        config.client_id = id;
    }
    if let Some(origin) = env_first(&["MONETA_APP_ORIGIN", "APP_ORIGIN"]) {
        config.app_origin = origin;
    }
    if let Some(scope) = env_first(&["MONETA_OAUTH_SCOPE", "OAUTH_SCOPE"]) {
        config.oauth_scope = scope;
    }
}
pub fn validate_app_config(config: &AppConfig) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();
    if config.backend_base_url.trim().is_empty() {
        errors.push("backend_base_url_missing".to_string());
    } else if url::Url::parse(&config.backend_base_url).is_err() {
        errors.push(format!(
            "backend_base_url_invalid: {}",
            config.backend_base_url
        ));
    }
    if url::Url::parse(&config.app_origin).is_err() {
        errors.push(format!("app_origin_invalid: {}", config.app_origin));
    }
    if config.client_id.trim().is_empty() {
        errors.push("client_id_missing".to_string());
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{lock_env, ScopedEnvVar};

    fn valid_config() -> AppConfig {
        let mut config = AppConfig::new();
        config.backend_base_url = "https://api.moneta.finance".to_string();
        config.client_id = "client-123.apps.googleusercontent.com".to_string();
        config
    }

    #[test]
    fn test_env_overrides_beat_file_values() {
        let _guard = lock_env();
        let _url = ScopedEnvVar::set("MONETA_BACKEND_URL", "https://api.override.test");
        let _key = ScopedEnvVar::set("MONETA_API_KEY", "override-key");
        let mut config = valid_config();
        apply_env_overrides(&mut config);
        assert_eq!(config.backend_base_url, "https://api.override.test");
        assert_eq!(config.api_key, "override-key");
    }

    #[test]
    fn test_blank_env_values_are_ignored() {
        let _guard = lock_env();
        let _url = ScopedEnvVar::set("MONETA_BACKEND_URL", "   ");
        let mut config = valid_config();
        apply_env_overrides(&mut config);
        assert_eq!(config.backend_base_url, "https://api.moneta.finance");
    }

    #[test]
    fn test_validate_rejects_missing_backend_and_client() {
        let config = AppConfig::new();
        let errors = validate_app_config(&config).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("backend_base_url")));
        assert!(errors.iter().any(|e| e.contains("client_id")));
    }

    #[test]
    fn test_validate_accepts_complete_config() {
        assert!(validate_app_config(&valid_config()).is_ok());
    }
}
