//! Pipeline error taxonomy and its wire representation.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Terminal pipeline failures. Credential and captcha outcomes carry no
/// detail (the portal's banner text is the whole story); structural and
/// infrastructure failures keep the step that observed them.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ScrapeError {
    #[error("user id rejected by the portal")]
    InvalidUserId,

    #[error("password rejected by the portal")]
    InvalidPassword,

    #[error("captcha rejected on the final attempt")]
    InvalidCaptcha,

    /// Expected link/frame absent before the attendance form was reached.
    #[error("navigation failed: {0}")]
    Navigation(String),

    /// Target table or a required row/header missing from the results page.
    #[error("extraction failed: {0}")]
    Extraction(String),

    /// Browser launch failures, transport errors, anything unclassified.
    #[error("unexpected failure: {0}")]
    Unknown(String),
}

/// Wire-level error codes returned to the HTTP layer.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidUserId,
    InvalidPassword,
    InvalidCaptcha,
    NavigationError,
    ExtractionError,
    UnknownError,
    InvalidParameters,
}

impl ScrapeError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ScrapeError::InvalidUserId => ErrorCode::InvalidUserId,
            ScrapeError::InvalidPassword => ErrorCode::InvalidPassword,
            ScrapeError::InvalidCaptcha => ErrorCode::InvalidCaptcha,
            ScrapeError::Navigation(_) => ErrorCode::NavigationError,
            ScrapeError::Extraction(_) => ErrorCode::ExtractionError,
            ScrapeError::Unknown(_) => ErrorCode::UnknownError,
        }
    }

    /// Caller-facing message, matching the portal wording users already know.
    pub fn message(&self) -> &'static str {
        match self {
            ScrapeError::InvalidUserId => "User ID is not valid",
            ScrapeError::InvalidPassword => "Password is not valid",
            ScrapeError::InvalidCaptcha => "Captcha is not valid",
            ScrapeError::Navigation(_) => "Unable to reach the attendance form",
            ScrapeError::Extraction(_) => "Failed to extract attendance data",
            ScrapeError::Unknown(_) => "An unexpected error occurred",
        }
    }

    /// Diagnostic detail, present only where there is something to add.
    pub fn detail(&self) -> Option<&str> {
        match self {
            ScrapeError::Navigation(detail)
            | ScrapeError::Extraction(detail)
            | ScrapeError::Unknown(detail) => Some(detail),
            _ => None,
        }
    }
}
