use crate::constants::USER_AGENT;
use once_cell::sync::Lazy;
use reqwest::Client;
use std::time::Duration;

pub static SHARED_CLIENT: Lazy<Client> = Lazy::new(|| create_base_client(15));
pub static SHARED_CLIENT_LONG: Lazy<Client> = Lazy::new(|| create_base_client(60));

fn create_base_client(timeout_secs: u64) -> Client {
    Client::builder()
        .user_agent(USER_AGENT.as_str())
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!("Failed to build HTTP client, falling back to defaults: {}", e);
            Client::new()
        })
}

/// Short-timeout client for prepare-style calls.
pub fn get_client() -> Client {
    SHARED_CLIENT.clone()
}

/// Long-timeout client for token exchanges, which sit behind the provider's
/// own upstream calls.
pub fn get_long_client() -> Client {
    SHARED_CLIENT_LONG.clone()
}
