//! OCR collaborator: best-effort digit recognition over raw image bytes.
//!
//! Consumed as a black box by the captcha resolver. The default engine shells
//! out to the `tesseract` binary in single-word mode with a digit whitelist;
//! anything smarter (custom traineddata for the portal's fixed font) is a
//! matter of configuration, not code.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Failures from the OCR engine. Callers are expected to treat these as
/// "unreadable image", not as fatal conditions.
#[derive(Debug, Error)]
pub enum OcrError {
    #[error("failed to stage image: {0}")]
    Stage(#[from] std::io::Error),

    #[error("ocr engine failed: {0}")]
    Engine(String),
}

/// Engine configuration, passed in at construction. There is deliberately no
/// process-global state here: two sessions with different configurations must
/// not interfere.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OcrConfig {
    /// Traineddata language/model name.
    pub lang: String,
    /// Directory holding the traineddata; exported to the engine as
    /// `TESSDATA_PREFIX` when set.
    pub tessdata_dir: Option<PathBuf>,
    /// OCR engine mode (1 = LSTM only).
    pub oem: u8,
    /// Page segmentation mode (8 = single word).
    pub psm: u8,
    /// Characters the engine is allowed to emit.
    pub whitelist: String,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            lang: std::env::var("IMS_OCR_LANG").unwrap_or_else(|_| "eng".to_string()),
            tessdata_dir: std::env::var("IMS_TESSDATA").ok().map(PathBuf::from),
            oem: 1,
            psm: 8,
            whitelist: "0123456789".to_string(),
        }
    }
}

/// Image-to-text capability. Implementations return whatever the engine saw;
/// sanitization is the caller's concern.
#[async_trait]
pub trait ImageRecognizer: Send + Sync {
    async fn recognize(&self, image: &[u8]) -> Result<String, OcrError>;
}

/// [`ImageRecognizer`] backed by the Tesseract CLI.
pub struct TesseractOcr {
    config: OcrConfig,
}

impl TesseractOcr {
    pub fn new(config: OcrConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ImageRecognizer for TesseractOcr {
    async fn recognize(&self, image: &[u8]) -> Result<String, OcrError> {
        // tesseract insists on a file path for input; stage the bytes in a
        // temp file that lives for the duration of the call.
        let staged = tempfile::Builder::new()
            .prefix("captcha-")
            .suffix(".jpg")
            .tempfile()?;
        tokio::fs::write(staged.path(), image).await?;

        let mut command = Command::new("tesseract");
        command
            .arg(staged.path())
            .arg("stdout")
            .args(["-l", &self.config.lang])
            .args(["--oem", &self.config.oem.to_string()])
            .args(["--psm", &self.config.psm.to_string()])
            .args([
                "-c",
                &format!("tessedit_char_whitelist={}", self.config.whitelist),
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if let Some(dir) = &self.config.tessdata_dir {
            command.env("TESSDATA_PREFIX", dir);
        }

        let output = command
            .output()
            .await
            .map_err(|err| OcrError::Engine(format!("failed to spawn tesseract: {err}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OcrError::Engine(format!(
                "tesseract exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout).into_owned();
        debug!(target: "digit-ocr", raw = %text.trim(), "ocr output");
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_targets_digits() {
        let config = OcrConfig::default();
        assert_eq!(config.whitelist, "0123456789");
        assert_eq!(config.oem, 1);
        assert_eq!(config.psm, 8);
    }
}
