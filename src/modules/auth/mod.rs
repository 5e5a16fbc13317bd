pub mod callback;
pub mod flow;
pub mod login;
pub mod popup;
pub mod state;
pub mod tokens;

use crate::models::AppConfig;
use crate::utils::http;

/// All backend auth endpoints share one calling convention: JSON body,
/// `X-API-Key` header, JSON response. Errors come back as strings; each
/// caller maps them onto its own failure variant.
pub(crate) async fn post_backend_json(
    config: &AppConfig,
    path: &str,
    body: &serde_json::Value,
    long_timeout: bool,
) -> Result<serde_json::Value, String> {
    let client = if long_timeout {
        http::get_long_client()
    } else {
        http::get_client()
    };
    let url = format!("{}{}", config.backend_base_url.trim_end_matches('/'), path);

    let response = client
        .post(&url)
        .header("X-API-Key", &config.api_key)
        .json(body)
        .send()
        .await
        .map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                format!(
                    "request_failed: {}. Please check your connection to the Moneta backend.",
                    e
                )
            } else {
                format!("request_failed: {}", e)
            }
        })?;

    if response.status().is_success() {
        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| format!("response_parsing_failed: {}", e))
    } else {
        let status = response.status().as_u16();
        let error_text = response.text().await.unwrap_or_default();
        Err(format!("backend_returned_{}: {}", status, error_text))
    }
}
