//! Error taxonomy for driver operations.

use thiserror::Error;

/// Failures surfaced by a [`crate::Driver`] implementation.
#[derive(Debug, Error, Clone)]
pub enum DriverError {
    /// Browser process could not be launched or connected to
    #[error("browser launch failed: {0}")]
    Launch(String),

    /// Page navigation did not complete
    #[error("navigation failed: {0}")]
    Navigation(String),

    /// A bounded wait for an element or condition expired
    #[error("wait timeout: {0}")]
    WaitTimeout(String),

    /// The frame element attached but exposes no content document
    #[error("frame not found: {0}")]
    FrameNotFound(String),

    /// Selector matched nothing within the deadline
    #[error("target element not found: {0}")]
    TargetNotFound(String),

    /// Dropdown option missing from the select control
    #[error("option not found: {0}")]
    OptionNotFound(String),

    /// Injected script failed or returned an unusable value
    #[error("script error: {0}")]
    Script(String),

    /// DevTools protocol transport failure
    #[error("cdp i/o error: {0}")]
    CdpIo(String),

    /// Internal invariant violation
    #[error("internal error: {0}")]
    Internal(String),
}

impl DriverError {
    /// True for failures that mean "the expected page structure is absent",
    /// as opposed to infrastructure trouble.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            DriverError::WaitTimeout(_)
                | DriverError::FrameNotFound(_)
                | DriverError::TargetNotFound(_)
                | DriverError::OptionNotFound(_)
        )
    }
}
