//! Captcha Resolver: capture the captcha image from the login frame and turn
//! it into a digits-only guess.
//!
//! An OCR engine failure is reported as "unreadable", not as an error: the
//! login flow already has a captcha-retry path and a wrong guess and an
//! unreadable image are handled identically there. Every call re-captures the
//! image, because the portal rotates it on each render.

use std::sync::Arc;

use digit_ocr::ImageRecognizer;
use portal_driver::{Driver, DriverError, FrameRef, Scope};
use tracing::{debug, warn};

use crate::config::WaitPolicy;

/// Captcha image element inside the login frame.
const CAPTCHA_IMAGE: &str = "#captchaimg";

pub struct CaptchaResolver {
    recognizer: Arc<dyn ImageRecognizer>,
}

impl CaptchaResolver {
    pub fn new(recognizer: Arc<dyn ImageRecognizer>) -> Self {
        Self { recognizer }
    }

    /// `Ok(Some(guess))` on a readable image (guess may be empty),
    /// `Ok(None)` when the engine could not read it. Driver failures while
    /// locating or capturing the element propagate.
    pub async fn resolve(
        &self,
        driver: &dyn Driver,
        frame: &FrameRef,
        wait: &WaitPolicy,
    ) -> Result<Option<String>, DriverError> {
        let scope = Scope::Frame(frame.clone());
        let image = driver.capture(&scope, CAPTCHA_IMAGE, wait.element).await?;

        match self.recognizer.recognize(&image).await {
            Ok(raw) => {
                let guess = normalize_guess(&raw);
                debug!(target: "pipeline", guess = %guess, "captcha recognized");
                Ok(Some(guess))
            }
            Err(err) => {
                warn!(target: "pipeline", %err, "captcha unreadable");
                Ok(None)
            }
        }
    }
}

/// Normalize raw OCR output into a digits-only guess.
///
/// The portal's captcha font renders `1` close enough to `l`/`I` that the
/// engine regularly confuses them, so those fold to `1`; every other
/// non-digit character is stripped.
pub fn normalize_guess(raw: &str) -> String {
    raw.chars()
        .filter_map(|ch| match ch {
            'l' | 'I' | '|' => Some('1'),
            ch if ch.is_ascii_digit() => Some(ch),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_strips_and_folds() {
        assert_eq!(normalize_guess("l2O3\n"), "123");
        assert_eq!(normalize_guess(" 4 5 6 "), "456");
        assert_eq!(normalize_guess("I9|"), "191");
    }

    #[test]
    fn empty_guess_is_allowed() {
        assert_eq!(normalize_guess("abc"), "");
        assert_eq!(normalize_guess(""), "");
    }
}
