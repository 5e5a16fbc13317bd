use std::sync::LazyLock;
use std::time::Duration;

/// Prefix carried by every CSRF state token this client generates.
pub const STATE_PREFIX: &str = "oauth_";
pub const STATE_SUFFIX_LEN: usize = 32;

/// Session-scoped storage keys for the pending sign-in attempt.
pub const SESSION_STATE_KEY: &str = "oauth_state";
pub const SESSION_BASE_STATE_KEY: &str = "oauth_base_state";

/// Persistent storage keys shared with the rest of the application.
pub const ACCESS_TOKEN_KEY: &str = "auth_access_token";
pub const REFRESH_TOKEN_KEY: &str = "auth_refresh_token";
pub const USER_RECORD_KEY: &str = "auth_user";

/// Flow marker appended to the redirect URI; the backend keys its callback
/// handling off this value.
pub const OAUTH_FLOW_NAME: &str = "GeneralOAuthFlow";

pub const PREPARE_ENDPOINT: &str = "/auth/unified/google/signin/prepare";
pub const CALLBACK_ENDPOINT: &str = "/auth/google/callback";
pub const LOGIN_ENDPOINT: &str = "/auth/google/login";

/// Hard ceiling on one sign-in attempt, popup open to completion.
pub const SIGNIN_TIMEOUT: Duration = Duration::from_secs(300);
/// Cadence of the popup close-detection poll.
pub const POPUP_POLL_INTERVAL: Duration = Duration::from_secs(1);

pub fn default_redirect_uri(origin: &str) -> String {
    format!(
        "{}/auth/callback?flowName={}",
        origin.trim_end_matches('/'),
        OAUTH_FLOW_NAME
    )
}

pub static USER_AGENT: LazyLock<String> = LazyLock::new(|| {
    format!(
        "moneta/{} {}/{}",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH
    )
});
