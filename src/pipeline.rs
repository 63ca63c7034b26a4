//! End-to-end pipeline: one request, one exclusively-owned browser session,
//! one structured result.
//!
//! Every failure anywhere in the flow is caught here, mapped to the error
//! taxonomy, and returned as a value; the session is torn down on the same
//! exit path regardless of outcome.

use std::sync::Arc;

use digit_ocr::ImageRecognizer;
use portal_driver::{Driver, DriverError, DriverFactory, Scope};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::captcha::CaptchaResolver;
use crate::config::AppConfig;
use crate::errors::{ErrorCode, ScrapeError};
use crate::extract::{self, AttendanceQuery, AttendanceRecord};
use crate::login::{self, Credentials, LoginOutcome};
use crate::navigate;

/// Entry link on the portal landing page.
const STUDENT_LOGIN_LINK: &str = "a[href=\"student.htm\"]";
const BANNER_FRAME: &str = "banner";
const DATA_FRAME: &str = "data";

/// Incoming request body. All fields are required; validation happens before
/// any browser is launched.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeRequest {
    pub user_id: Option<String>,
    pub password: Option<String>,
    pub year: Option<String>,
    pub semester: Option<String>,
}

impl ScrapeRequest {
    /// Split into credentials and query, or `None` when any field is missing
    /// or empty.
    pub fn validate(&self) -> Option<(Credentials, AttendanceQuery)> {
        let field = |value: &Option<String>| -> Option<String> {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        Some((
            Credentials {
                user_id: field(&self.user_id)?,
                password: field(&self.password)?,
            },
            AttendanceQuery {
                year: field(&self.year)?,
                sem: field(&self.semester)?,
            },
        ))
    }
}

/// Wire envelope returned to the HTTP layer.
#[derive(Clone, Debug, Serialize)]
pub struct ScrapeResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<AttendanceRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ScrapeResponse {
    pub fn ok(data: AttendanceRecord) -> Self {
        Self {
            success: true,
            message: "Attendance data retrieved successfully".to_string(),
            data: Some(data),
            error: None,
            detail: None,
        }
    }

    pub fn failure(code: ErrorCode, message: impl Into<String>, detail: Option<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
            error: Some(code),
            detail,
        }
    }
}

impl From<ScrapeError> for ScrapeResponse {
    fn from(err: ScrapeError) -> Self {
        ScrapeResponse::failure(
            err.code(),
            err.message(),
            err.detail().map(str::to_string),
        )
    }
}

/// Launch a fresh session, run the pipeline, tear the session down, return
/// the envelope.
pub async fn scrape(
    config: &AppConfig,
    factory: &dyn DriverFactory,
    recognizer: Arc<dyn ImageRecognizer>,
    credentials: Credentials,
    query: AttendanceQuery,
) -> ScrapeResponse {
    let driver = match factory.launch().await {
        Ok(driver) => driver,
        Err(err) => {
            warn!(target: "pipeline", %err, "session launch failed");
            return ScrapeError::Unknown(err.to_string()).into();
        }
    };
    scrape_with(driver, config, recognizer, credentials, query).await
}

/// Run the pipeline on an already-launched session. The session is closed on
/// every exit path before the result is returned; there is no partial reuse.
pub async fn scrape_with(
    driver: Box<dyn Driver>,
    config: &AppConfig,
    recognizer: Arc<dyn ImageRecognizer>,
    credentials: Credentials,
    query: AttendanceQuery,
) -> ScrapeResponse {
    let session = Uuid::new_v4();
    info!(target: "pipeline", %session, year = %query.year, sem = %query.sem, "scrape started");

    let outcome = run(driver.as_ref(), config, recognizer, &credentials, &query).await;

    if let Err(err) = driver.close().await {
        warn!(target: "pipeline", %session, %err, "session teardown failed");
    }

    match outcome {
        Ok(record) => {
            info!(target: "pipeline", %session, subjects = record.overall_stats.overall_class.len(), "scrape succeeded");
            ScrapeResponse::ok(record)
        }
        Err(err) => {
            info!(target: "pipeline", %session, code = ?err.code(), "scrape failed");
            err.into()
        }
    }
}

async fn run(
    driver: &dyn Driver,
    config: &AppConfig,
    recognizer: Arc<dyn ImageRecognizer>,
    credentials: &Credentials,
    query: &AttendanceQuery,
) -> Result<AttendanceRecord, ScrapeError> {
    let wait = &config.wait;

    driver
        .goto(config.base_url.as_str(), wait.navigation)
        .await
        .map_err(entry_failed)?;

    driver
        .click(&Scope::Page, STUDENT_LOGIN_LINK, wait.element)
        .await
        .map_err(entry_failed)?;

    let banner = driver
        .frame(BANNER_FRAME, wait.frame_attach)
        .await
        .map_err(entry_failed)?;

    let resolver = CaptchaResolver::new(recognizer);
    match login::login(
        driver,
        &resolver,
        &banner,
        credentials,
        wait,
        config.max_captcha_retries,
    )
    .await
    {
        LoginOutcome::Success => {}
        LoginOutcome::InvalidUserId => return Err(ScrapeError::InvalidUserId),
        LoginOutcome::InvalidPassword => return Err(ScrapeError::InvalidPassword),
        LoginOutcome::InvalidCaptcha => return Err(ScrapeError::InvalidCaptcha),
        LoginOutcome::UnknownError(detail) => return Err(ScrapeError::Unknown(detail)),
    }

    navigate::to_attendance_form(driver, wait).await?;

    // Login navigated the page; the data frame belongs to the new frameset.
    let data = driver
        .frame(DATA_FRAME, wait.frame_attach)
        .await
        .map_err(entry_failed)?;

    extract::extract(driver, &data, query, wait, &config.table_pick).await
}

/// Structural absences before the attendance form mean the portal layout is
/// not what the flow expects; anything else is infrastructure trouble.
fn entry_failed(err: DriverError) -> ScrapeError {
    if err.is_structural() {
        ScrapeError::Navigation(err.to_string())
    } else {
        ScrapeError::Unknown(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_requires_every_field() {
        let request = ScrapeRequest {
            user_id: Some("S1".into()),
            password: Some("P1".into()),
            year: Some("2023-24".into()),
            semester: None,
        };
        assert!(request.validate().is_none());

        let request = ScrapeRequest {
            user_id: Some("  ".into()),
            password: Some("P1".into()),
            year: Some("2023-24".into()),
            semester: Some("2".into()),
        };
        assert!(request.validate().is_none());
    }

    #[test]
    fn validate_trims_fields() {
        let request = ScrapeRequest {
            user_id: Some(" S1 ".into()),
            password: Some("P1".into()),
            year: Some("2023-24".into()),
            semester: Some("2".into()),
        };
        let (credentials, query) = request.validate().unwrap();
        assert_eq!(credentials.user_id, "S1");
        assert_eq!(query.sem, "2");
    }

    #[test]
    fn failure_envelope_skips_empty_fields() {
        let response: ScrapeResponse = ScrapeError::InvalidPassword.into();
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "INVALID_PASSWORD");
        assert!(json.get("data").is_none());
        assert!(json.get("detail").is_none());
    }
}
