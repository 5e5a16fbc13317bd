use crate::constants::USER_AGENT;
use crate::models::DeviceInfo;
use std::fs;
use std::path::PathBuf;

const DATA_DIR: &str = ".moneta";

pub fn get_data_dir() -> Result<PathBuf, String> {
    fn ensure_dir(path: &PathBuf) -> Result<(), String> {
        if !path.exists() {
            fs::create_dir_all(path).map_err(|e| format!("failed_to_create_data_dir: {}", e))?;
        }
        Ok(())
    }
    if let Ok(env_path) = std::env::var("DATA_DIR") {
        if !env_path.trim().is_empty() {
            let data_dir = PathBuf::from(env_path);
            ensure_dir(&data_dir)?;
            return Ok(data_dir);
        }
    }
    if cfg!(test) {
        let data_dir = std::env::temp_dir().join(format!(".moneta-test-{}", std::process::id()));
        ensure_dir(&data_dir)?;
        return Ok(data_dir);
    }

    if let Some(home) = dirs::home_dir() {
        let data_dir = home.join(DATA_DIR);
        if ensure_dir(&data_dir).is_ok() {
            return Ok(data_dir);
        }
    }
    let fallback_dir = std::env::temp_dir().join(DATA_DIR);
    ensure_dir(&fallback_dir)?;
    Ok(fallback_dir)
}

/// Snapshot sent to the backend's prepare/login endpoints.
pub fn device_info() -> DeviceInfo {
    DeviceInfo {
        platform: std::env::consts::OS.to_string(),
        user_agent: USER_AGENT.clone(),
        language: system_language(),
    }
}

/// Best-effort BCP 47 tag from the POSIX locale env vars ("en_US.UTF-8" ->
/// "en-US"). Falls back to en-US when nothing usable is set.
pub fn system_language() -> String {
    for key in ["LC_ALL", "LC_MESSAGES", "LANG"] {
        if let Ok(raw) = std::env::var(key) {
            if let Some(tag) = parse_locale_tag(&raw) {
                return tag;
            }
        }
    }
    "en-US".to_string()
}

fn parse_locale_tag(raw: &str) -> Option<String> {
    let base = raw.split('.').next()?.trim();
    if base.is_empty() || base.eq_ignore_ascii_case("c") || base.eq_ignore_ascii_case("posix") {
        return None;
    }
    Some(base.replace('_', "-"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{lock_env, ScopedEnvVar};

    #[test]
    fn test_parse_locale_tag() {
        assert_eq!(parse_locale_tag("en_US.UTF-8"), Some("en-US".to_string()));
        assert_eq!(parse_locale_tag("pt_BR"), Some("pt-BR".to_string()));
        assert_eq!(parse_locale_tag("C"), None);
        assert_eq!(parse_locale_tag("POSIX"), None);
        assert_eq!(parse_locale_tag(""), None);
    }

    #[test]
    fn test_system_language_falls_back_to_en_us() {
        let _guard = lock_env();
        let _a = ScopedEnvVar::unset("LC_ALL");
        let _b = ScopedEnvVar::unset("LC_MESSAGES");
        let _c = ScopedEnvVar::unset("LANG");
        assert_eq!(system_language(), "en-US");
    }

    #[test]
    fn test_device_info_platform_matches_build_target() {
        let info = device_info();
        assert_eq!(info.platform, std::env::consts::OS);
        assert!(info.user_agent.starts_with("moneta/"));
    }

    #[test]
    fn test_data_dir_honors_env_override() {
        let _guard = lock_env();
        let dir = std::env::temp_dir().join(format!("moneta-data-{}", std::process::id()));
        let _v = ScopedEnvVar::set("DATA_DIR", dir.to_str().unwrap());
        assert_eq!(get_data_dir().unwrap(), dir);
    }
}
