//! Launch configuration for the Chromium-backed driver.

use std::{env, path::PathBuf};

use serde::{Deserialize, Serialize};

use crate::detect_chrome_executable;

/// Configuration for launching and tuning the browser session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BrowserSettings {
    pub executable: PathBuf,
    pub user_data_dir: PathBuf,
    pub headless: bool,
    pub user_agent: String,
    pub window_width: u32,
    pub window_height: u32,
    pub request_timeout_ms: u64,
    pub launch_timeout_ms: u64,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            executable: detect_chrome_executable().unwrap_or_default(),
            user_data_dir: default_profile_dir(),
            headless: resolve_headless_default(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            window_width: 1920,
            window_height: 1080,
            request_timeout_ms: 30_000,
            launch_timeout_ms: 20_000,
        }
    }
}

/// The portal serves a degraded layout to unknown agents, so a desktop
/// Chrome identity is pinned by default.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
AppleWebKit/537.36 (KHTML, like Gecko) Chrome/111.0.0.0 Safari/537.36";

fn resolve_headless_default() -> bool {
    // IMS_HEADLESS: "0", "false", "no", "off" means headful
    match env::var("IMS_HEADLESS") {
        Ok(value) => {
            let lower = value.to_ascii_lowercase();
            !matches!(lower.as_str(), "0" | "false" | "no" | "off")
        }
        Err(_) => true,
    }
}

fn default_profile_dir() -> PathBuf {
    if let Ok(path) = env::var("IMS_CHROME_PROFILE") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return PathBuf::from(trimmed);
        }
    }
    PathBuf::from("./.ims-profile")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let settings = BrowserSettings::default();
        assert_eq!(settings.window_width, 1920);
        assert_eq!(settings.window_height, 1080);
        assert!(settings.request_timeout_ms >= 1000);
        assert!(settings.user_agent.contains("Chrome"));
    }
}
