//! Pipeline configuration.
//!
//! Everything tunable lives here as an explicit value; nothing reads global
//! mutable state at run time. Defaults reproduce the portal's observed
//! behavior and can be overridden per instance.

use std::time::Duration;

use digit_ocr::OcrConfig;
use portal_driver::BrowserSettings;
use serde::{Deserialize, Serialize};
use url::Url;

/// Named wait budgets for every point where the pipeline suspends on the
/// remote portal.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WaitPolicy {
    /// Full-page navigations.
    pub navigation: Duration,
    /// Named frame attachment.
    pub frame_attach: Duration,
    /// Individual element appearance/actionability.
    pub element: Duration,
    /// The portal performs a synchronous-looking round trip after form
    /// submission with no DOM loading signal; this is the one fixed wait the
    /// site forces on us, kept as a single named value so it can be tuned.
    pub submit_settle: Duration,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            navigation: Duration::from_secs(30),
            frame_attach: Duration::from_secs(10),
            element: Duration::from_secs(5),
            submit_settle: Duration::from_millis(500),
        }
    }
}

/// Positional rule identifying the attendance table among structurally
/// similar tables. The portal exposes no unique id, so the original rule
/// ("second-to-last table of this class") is preserved as data, including its
/// failure mode: if the layout shifts, the wrong table is silently selected.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TablePick {
    pub class_name: String,
    /// 1 = last matching table, 2 = second to last, and so on.
    pub from_last: usize,
}

impl Default for TablePick {
    fn default() -> Self {
        Self {
            class_name: "plum_fieldbig".to_string(),
            from_last: 2,
        }
    }
}

impl TablePick {
    pub fn selector(&self) -> String {
        format!("table.{}", self.class_name)
    }
}

/// Top-level configuration for one scraper instance.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub base_url: Url,
    pub wait: WaitPolicy,
    pub table_pick: TablePick,
    /// How many times a captcha misread may be retried. Credential errors are
    /// never retried regardless of this value.
    pub max_captcha_retries: u32,
    pub browser: BrowserSettings,
    pub ocr: OcrConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            base_url: Url::parse("https://www.imsnsit.org/imsnsit/")
                .expect("default portal url is valid"),
            wait: WaitPolicy::default(),
            table_pick: TablePick::default(),
            max_captcha_retries: 1,
            browser: BrowserSettings::default(),
            ocr: OcrConfig::default(),
        }
    }
}
