use serde::{Deserialize, Serialize};
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Base URL of the application backend, e.g. `https://api.moneta.finance`.
    pub backend_base_url: String,
    /// Value of the `X-API-Key` header required by the backend.
    pub api_key: String,
    pub client_id: String,
    #[serde(default = "default_oauth_scope")]
    pub oauth_scope: String,
    /// Origin the redirect URI is built from. Overridden at runtime when the
    /// loopback callback listener picks its port.
    #[serde(default = "default_app_origin")]
    pub app_origin: String,
    #[serde(default)]
    pub popup: PopupConfig,
}

fn default_oauth_scope() -> String {
    "openid email profile".to_string()
}

fn default_app_origin() -> String {
    "http://localhost:5173".to_string()
}

impl AppConfig {
    pub fn new() -> Self {
        Self {
            backend_base_url: String::new(),
            api_key: String::new(),
            client_id: String::new(),
            oauth_scope: default_oauth_scope(),
            app_origin: default_app_origin(),
            popup: PopupConfig::default(),
        }
    }

    pub fn redirect_uri(&self) -> String {
        crate::constants::default_redirect_uri(&self.app_origin)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::new()
    }
}
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PopupConfig {
    pub width: u32,
    pub height: u32,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_timeout_seconds() -> u64 {
    crate::constants::SIGNIN_TIMEOUT.as_secs()
}

fn default_poll_interval_ms() -> u64 {
    crate::constants::POPUP_POLL_INTERVAL.as_millis() as u64
}

impl PopupConfig {
    pub fn new() -> Self {
        Self {
            width: 500,
            height: 640,
            timeout_seconds: default_timeout_seconds(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }

    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_seconds)
    }

    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl Default for PopupConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults_fill_missing_fields() {
        let config: AppConfig = serde_json::from_str(
            r#"{"backend_base_url":"https://api.test","api_key":"k","client_id":"c"}"#,
        )
        .unwrap();
        assert_eq!(config.oauth_scope, "openid email profile");
        assert_eq!(config.popup.timeout_seconds, 300);
        assert_eq!(config.popup.poll_interval_ms, 1000);
    }

    #[test]
    fn test_redirect_uri_uses_app_origin() {
        let mut config = AppConfig::new();
        config.app_origin = "https://moneta.finance".to_string();
        assert_eq!(
            config.redirect_uri(),
            "https://moneta.finance/auth/callback?flowName=GeneralOAuthFlow"
        );
    }
}
