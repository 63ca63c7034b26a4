//! Login State Machine.
//!
//! One submit routine, one banner classifier, one retry loop. Credential
//! rejections are terminal on first sighting; only a captcha rejection is
//! retried, at most `max_captcha_retries` times, and the final attempt's
//! outcome is returned as-is. A fresh captcha is captured on every attempt
//! because the portal re-renders it after each failed submit.

use portal_driver::{Driver, DriverError, FrameRef, Scope};
use tokio::time::sleep;
use tracing::{debug, info};

use crate::captcha::CaptchaResolver;
use crate::config::WaitPolicy;

const USER_FIELD: &str = "#uid";
const PASSWORD_FIELD: &str = "#pwd";
const CAPTCHA_FIELD: &str = "#cap";
const SUBMIT_BUTTON: &str = "#login";
/// The portal renders both status banners and error banners in these cells.
const BANNER_FIELDS: &str = ".plum_field";

/// Caller-supplied credentials; never persisted beyond the session.
#[derive(Clone, Debug)]
pub struct Credentials {
    pub user_id: String,
    pub password: String,
}

/// Terminal states of the login flow.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LoginOutcome {
    Success,
    InvalidUserId,
    InvalidPassword,
    InvalidCaptcha,
    UnknownError(String),
}

/// Run the login flow inside the banner frame. Never fails: any unexpected
/// driver failure (element missing, frame detached) maps to
/// [`LoginOutcome::UnknownError`].
pub async fn login(
    driver: &dyn Driver,
    resolver: &CaptchaResolver,
    frame: &FrameRef,
    credentials: &Credentials,
    wait: &WaitPolicy,
    max_captcha_retries: u32,
) -> LoginOutcome {
    match attempt_loop(driver, resolver, frame, credentials, wait, max_captcha_retries).await {
        Ok(outcome) => outcome,
        Err(err) => LoginOutcome::UnknownError(err.to_string()),
    }
}

async fn attempt_loop(
    driver: &dyn Driver,
    resolver: &CaptchaResolver,
    frame: &FrameRef,
    credentials: &Credentials,
    wait: &WaitPolicy,
    max_captcha_retries: u32,
) -> Result<LoginOutcome, DriverError> {
    let mut attempt: u32 = 0;
    loop {
        submit_attempt(driver, resolver, frame, credentials, wait).await?;

        match classify_banner(&banner_texts(driver, frame).await?) {
            None => {
                info!(target: "pipeline", attempt, "login succeeded");
                return Ok(LoginOutcome::Success);
            }
            Some(LoginOutcome::InvalidCaptcha) if attempt < max_captcha_retries => {
                // A fresh captcha is rendered with the error banner.
                info!(target: "pipeline", attempt, "captcha rejected, retrying");
                attempt += 1;
            }
            Some(outcome) => {
                info!(target: "pipeline", attempt, ?outcome, "login failed");
                return Ok(outcome);
            }
        }
    }
}

async fn submit_attempt(
    driver: &dyn Driver,
    resolver: &CaptchaResolver,
    frame: &FrameRef,
    credentials: &Credentials,
    wait: &WaitPolicy,
) -> Result<(), DriverError> {
    let scope = Scope::Frame(frame.clone());

    // An unreadable captcha becomes an empty guess: the submit then fails
    // with the captcha banner and flows into the ordinary retry path.
    let guess = resolver.resolve(driver, frame, wait).await?.unwrap_or_default();

    driver
        .fill(&scope, USER_FIELD, &credentials.user_id, wait.element)
        .await?;
    driver
        .fill(&scope, PASSWORD_FIELD, &credentials.password, wait.element)
        .await?;
    driver.fill(&scope, CAPTCHA_FIELD, &guess, wait.element).await?;
    driver.click(&scope, SUBMIT_BUTTON, wait.element).await?;

    // No load signal is exposed after the submit round trip; settle before
    // inspecting the banner.
    sleep(wait.submit_settle).await;
    Ok(())
}

async fn banner_texts(driver: &dyn Driver, frame: &FrameRef) -> Result<Vec<String>, DriverError> {
    let texts = driver.texts(&Scope::Frame(frame.clone()), BANNER_FIELDS).await?;
    debug!(target: "pipeline", banners = texts.len(), "inspected post-submit banners");
    Ok(texts)
}

/// Map known error banner text to an outcome; `None` means no error banner,
/// which the portal uses to signal success.
fn classify_banner(texts: &[String]) -> Option<LoginOutcome> {
    for text in texts {
        if text.contains("not authorised to use this Login") {
            return Some(LoginOutcome::InvalidUserId);
        }
        if text.contains("password does not match") {
            return Some(LoginOutcome::InvalidPassword);
        }
        if text.contains("Invalid Security Number") {
            return Some(LoginOutcome::InvalidCaptcha);
        }
    }
    None
}
