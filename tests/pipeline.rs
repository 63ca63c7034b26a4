//! End-to-end pipeline tests against fake driver and recognizer
//! implementations: submit-count invariants, envelope shapes, and session
//! teardown on every exit path.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use digit_ocr::{ImageRecognizer, OcrError};
use portal_driver::{
    CellSnapshot, Driver, DriverError, FrameRef, RowSnapshot, Scope, TableSnapshot,
};

use ims_attendance::config::{AppConfig, WaitPolicy};
use ims_attendance::errors::ErrorCode;
use ims_attendance::extract::AttendanceQuery;
use ims_attendance::login::Credentials;
use ims_attendance::pipeline::scrape_with;

const LOGIN_BUTTON: &str = "#login";
const BANNER_FIELDS: &str = ".plum_field";

#[derive(Default)]
struct FakeState {
    submits: AtomicUsize,
    table_waits: AtomicUsize,
    closed: AtomicBool,
}

impl FakeState {
    fn submits(&self) -> usize {
        self.submits.load(Ordering::SeqCst)
    }

    fn table_waits(&self) -> usize {
        self.table_waits.load(Ordering::SeqCst)
    }

    fn closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Scripted portal: banners are indexed by submit attempt, frames by name
/// (a leading `!` marks a frame that attaches without a content document),
/// and the results page is a fixed set of table snapshots.
struct FakeDriver {
    state: Arc<FakeState>,
    banners_per_attempt: Vec<Vec<String>>,
    frames: Vec<&'static str>,
    tables: Vec<TableSnapshot>,
}

impl FakeDriver {
    fn boxed(
        banners_per_attempt: Vec<Vec<String>>,
        frames: Vec<&'static str>,
        tables: Vec<TableSnapshot>,
    ) -> (Box<dyn Driver>, Arc<FakeState>) {
        let state = Arc::new(FakeState::default());
        let driver = FakeDriver {
            state: Arc::clone(&state),
            banners_per_attempt,
            frames,
            tables,
        };
        (Box::new(driver), state)
    }
}

#[async_trait]
impl Driver for FakeDriver {
    async fn goto(&self, _url: &str, _deadline: Duration) -> Result<(), DriverError> {
        Ok(())
    }

    async fn frame(&self, name: &str, _deadline: Duration) -> Result<FrameRef, DriverError> {
        if self.frames.contains(&name) {
            Ok(FrameRef::named(name))
        } else if self
            .frames
            .iter()
            .any(|frame| frame.strip_prefix('!') == Some(name))
        {
            Err(DriverError::FrameNotFound(format!(
                "frame '{name}' has no content document"
            )))
        } else {
            Err(DriverError::WaitTimeout(format!(
                "frame '{name}' did not attach"
            )))
        }
    }

    async fn wait_for(
        &self,
        _scope: &Scope,
        selector: &str,
        _deadline: Duration,
    ) -> Result<(), DriverError> {
        if selector.starts_with("table.") {
            self.state.table_waits.fetch_add(1, Ordering::SeqCst);
            if self.tables.is_empty() {
                return Err(DriverError::WaitTimeout(format!(
                    "no element matched '{selector}'"
                )));
            }
        }
        Ok(())
    }

    async fn fill(
        &self,
        _scope: &Scope,
        _selector: &str,
        _value: &str,
        _deadline: Duration,
    ) -> Result<(), DriverError> {
        Ok(())
    }

    async fn click(
        &self,
        _scope: &Scope,
        selector: &str,
        _deadline: Duration,
    ) -> Result<(), DriverError> {
        if selector == LOGIN_BUTTON {
            self.state.submits.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn click_link(
        &self,
        _scope: &Scope,
        _text: &str,
        _exact: bool,
        _deadline: Duration,
    ) -> Result<(), DriverError> {
        Ok(())
    }

    async fn select(
        &self,
        _scope: &Scope,
        _selector: &str,
        _value: &str,
        _deadline: Duration,
    ) -> Result<(), DriverError> {
        Ok(())
    }

    async fn capture(
        &self,
        _scope: &Scope,
        _selector: &str,
        _deadline: Duration,
    ) -> Result<Vec<u8>, DriverError> {
        Ok(vec![0xFF, 0xD8, 0xFF])
    }

    async fn texts(&self, _scope: &Scope, selector: &str) -> Result<Vec<String>, DriverError> {
        if selector == BANNER_FIELDS {
            let attempt = self.state.submits();
            return Ok(self
                .banners_per_attempt
                .get(attempt.saturating_sub(1))
                .cloned()
                .unwrap_or_default());
        }
        Ok(Vec::new())
    }

    async fn tables(
        &self,
        _scope: &Scope,
        _selector: &str,
    ) -> Result<Vec<TableSnapshot>, DriverError> {
        Ok(self.tables.clone())
    }

    async fn close(&self) -> Result<(), DriverError> {
        self.state.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// A portal that never answers: `goto` fails, teardown still works.
struct DeadPortal {
    state: Arc<FakeState>,
}

impl DeadPortal {
    fn boxed() -> (Box<dyn Driver>, Arc<FakeState>) {
        let state = Arc::new(FakeState::default());
        let driver = DeadPortal {
            state: Arc::clone(&state),
        };
        (Box::new(driver), state)
    }
}

#[async_trait]
impl Driver for DeadPortal {
    async fn goto(&self, url: &str, _deadline: Duration) -> Result<(), DriverError> {
        Err(DriverError::Navigation(format!(
            "navigation to {url} timed out"
        )))
    }

    async fn frame(&self, name: &str, _deadline: Duration) -> Result<FrameRef, DriverError> {
        Ok(FrameRef::named(name))
    }

    async fn wait_for(
        &self,
        _scope: &Scope,
        _selector: &str,
        _deadline: Duration,
    ) -> Result<(), DriverError> {
        Ok(())
    }

    async fn fill(
        &self,
        _scope: &Scope,
        _selector: &str,
        _value: &str,
        _deadline: Duration,
    ) -> Result<(), DriverError> {
        Ok(())
    }

    async fn click(
        &self,
        _scope: &Scope,
        _selector: &str,
        _deadline: Duration,
    ) -> Result<(), DriverError> {
        Ok(())
    }

    async fn click_link(
        &self,
        _scope: &Scope,
        _text: &str,
        _exact: bool,
        _deadline: Duration,
    ) -> Result<(), DriverError> {
        Ok(())
    }

    async fn select(
        &self,
        _scope: &Scope,
        _selector: &str,
        _value: &str,
        _deadline: Duration,
    ) -> Result<(), DriverError> {
        Ok(())
    }

    async fn capture(
        &self,
        _scope: &Scope,
        _selector: &str,
        _deadline: Duration,
    ) -> Result<Vec<u8>, DriverError> {
        Ok(Vec::new())
    }

    async fn texts(&self, _scope: &Scope, _selector: &str) -> Result<Vec<String>, DriverError> {
        Ok(Vec::new())
    }

    async fn tables(
        &self,
        _scope: &Scope,
        _selector: &str,
    ) -> Result<Vec<TableSnapshot>, DriverError> {
        Ok(Vec::new())
    }

    async fn close(&self) -> Result<(), DriverError> {
        self.state.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct FixedOcr(&'static str);

#[async_trait]
impl ImageRecognizer for FixedOcr {
    async fn recognize(&self, _image: &[u8]) -> Result<String, OcrError> {
        Ok(self.0.to_string())
    }
}

struct BrokenOcr;

#[async_trait]
impl ImageRecognizer for BrokenOcr {
    async fn recognize(&self, _image: &[u8]) -> Result<String, OcrError> {
        Err(OcrError::Engine("no text detected".into()))
    }
}

fn fast_config() -> AppConfig {
    AppConfig {
        wait: WaitPolicy {
            navigation: Duration::from_millis(50),
            frame_attach: Duration::from_millis(50),
            element: Duration::from_millis(50),
            submit_settle: Duration::from_millis(1),
        },
        ..AppConfig::default()
    }
}

fn credentials() -> Credentials {
    Credentials {
        user_id: "S1".into(),
        password: "P1".into(),
    }
}

fn query() -> AttendanceQuery {
    AttendanceQuery {
        year: "2023-24".into(),
        sem: "2".into(),
    }
}

fn head_row(texts: &[&str]) -> RowSnapshot {
    RowSnapshot {
        class: "plum_head".into(),
        cells: texts
            .iter()
            .map(|text| CellSnapshot {
                header: false,
                text: text.to_string(),
            })
            .collect(),
    }
}

/// The single-subject results page from the portal, target table followed by
/// a trailing footer table so the second-to-last rule has something to skip.
fn results_tables() -> Vec<TableSnapshot> {
    let target = TableSnapshot {
        rows: vec![
            head_row(&["Subject", "Days"]),
            head_row(&["Overall Class", "10"]),
            head_row(&["Overall Absent", "2"]),
            head_row(&["Overall Present", "8"]),
            head_row(&["Overall (%)", "80"]),
        ],
    };
    vec![target, TableSnapshot::default()]
}

fn all_frames() -> Vec<&'static str> {
    vec!["banner", "top", "data"]
}

const CAPTCHA_BANNER: &str = "Invalid Security Number";
const PASSWORD_BANNER: &str = "Your password does not match.";
const USER_BANNER: &str = "You are not authorised to use this Login";

#[tokio::test]
async fn first_attempt_success_submits_once() {
    let (driver, state) = FakeDriver::boxed(vec![vec![]], all_frames(), results_tables());
    let response = scrape_with(
        driver,
        &fast_config(),
        Arc::new(FixedOcr("1234")),
        credentials(),
        query(),
    )
    .await;

    assert!(response.success, "expected success: {:?}", response.message);
    assert_eq!(state.submits(), 1);
    assert_eq!(state.table_waits(), 1, "results table must be waited for");
    assert!(state.closed());

    let data = response.data.expect("record present");
    assert_eq!(data.headers, vec!["Subject", "Days"]);
    assert_eq!(data.overall_stats.overall_class, vec!["10"]);
    assert_eq!(data.overall_stats.overall_absent, vec!["2"]);
    assert_eq!(data.overall_stats.overall_present, vec!["8"]);
    assert_eq!(data.overall_stats.overall_percentage, vec!["80"]);
}

#[tokio::test]
async fn credential_errors_are_never_retried() {
    for (banner, code) in [
        (PASSWORD_BANNER, ErrorCode::InvalidPassword),
        (USER_BANNER, ErrorCode::InvalidUserId),
    ] {
        let (driver, state) = FakeDriver::boxed(
            vec![vec![banner.to_string()]],
            all_frames(),
            results_tables(),
        );
        let response = scrape_with(
            driver,
            &fast_config(),
            Arc::new(FixedOcr("1234")),
            credentials(),
            query(),
        )
        .await;

        assert!(!response.success);
        assert_eq!(response.error, Some(code));
        assert_eq!(state.submits(), 1, "banner {banner:?} must not retry");
        assert!(state.closed());
    }
}

#[tokio::test]
async fn captcha_misread_retried_exactly_once_then_success() {
    let (driver, state) = FakeDriver::boxed(
        vec![vec![CAPTCHA_BANNER.to_string()], vec![]],
        all_frames(),
        results_tables(),
    );
    let response = scrape_with(
        driver,
        &fast_config(),
        Arc::new(FixedOcr("1234")),
        credentials(),
        query(),
    )
    .await;

    assert!(response.success);
    assert_eq!(state.submits(), 2);
}

#[tokio::test]
async fn second_captcha_failure_is_final() {
    let (driver, state) = FakeDriver::boxed(
        vec![
            vec![CAPTCHA_BANNER.to_string()],
            vec![CAPTCHA_BANNER.to_string()],
        ],
        all_frames(),
        results_tables(),
    );
    let response = scrape_with(
        driver,
        &fast_config(),
        Arc::new(FixedOcr("1234")),
        credentials(),
        query(),
    )
    .await;

    assert!(!response.success);
    assert_eq!(response.error, Some(ErrorCode::InvalidCaptcha));
    assert_eq!(state.submits(), 2, "exactly one retry, then terminal");
    assert!(state.closed());
}

#[tokio::test]
async fn retry_outcome_returned_as_is() {
    let (driver, state) = FakeDriver::boxed(
        vec![
            vec![CAPTCHA_BANNER.to_string()],
            vec![PASSWORD_BANNER.to_string()],
        ],
        all_frames(),
        results_tables(),
    );
    let response = scrape_with(
        driver,
        &fast_config(),
        Arc::new(FixedOcr("1234")),
        credentials(),
        query(),
    )
    .await;

    assert_eq!(response.error, Some(ErrorCode::InvalidPassword));
    assert_eq!(state.submits(), 2);
}

#[tokio::test]
async fn unreadable_captcha_submits_empty_guess() {
    let (driver, state) = FakeDriver::boxed(vec![vec![]], all_frames(), results_tables());
    let response = scrape_with(
        driver,
        &fast_config(),
        Arc::new(BrokenOcr),
        credentials(),
        query(),
    )
    .await;

    // The engine failure is not fatal; the attempt proceeds and this portal
    // happened to accept it.
    assert!(response.success);
    assert_eq!(state.submits(), 1);
}

#[tokio::test]
async fn missing_data_frame_is_structural_and_still_tears_down() {
    let (driver, state) =
        FakeDriver::boxed(vec![vec![]], vec!["banner", "top"], results_tables());
    let response = scrape_with(
        driver,
        &fast_config(),
        Arc::new(FixedOcr("1234")),
        credentials(),
        query(),
    )
    .await;

    assert!(!response.success);
    assert_eq!(response.error, Some(ErrorCode::NavigationError));
    assert!(state.closed(), "session must be closed on failure paths");
}

#[tokio::test]
async fn unreachable_portal_is_infrastructure_error() {
    let (driver, state) = DeadPortal::boxed();
    let response = scrape_with(
        driver,
        &fast_config(),
        Arc::new(FixedOcr("1234")),
        credentials(),
        query(),
    )
    .await;

    assert!(!response.success);
    // A dead or unreachable portal is infrastructure trouble, not a layout
    // change.
    assert_eq!(response.error, Some(ErrorCode::UnknownError));
    assert_eq!(state.submits(), 0);
    assert!(state.closed());
}

#[tokio::test]
async fn results_table_never_rendering_is_extraction_error() {
    let (driver, state) = FakeDriver::boxed(vec![vec![]], all_frames(), Vec::new());
    let response = scrape_with(
        driver,
        &fast_config(),
        Arc::new(FixedOcr("1234")),
        credentials(),
        query(),
    )
    .await;

    assert!(!response.success);
    assert_eq!(response.error, Some(ErrorCode::ExtractionError));
    assert_eq!(state.table_waits(), 1);
    assert!(state.closed());
}

#[tokio::test]
async fn detached_data_frame_is_navigation_error() {
    let (driver, state) = FakeDriver::boxed(
        vec![vec![]],
        vec!["banner", "top", "!data"],
        results_tables(),
    );
    let response = scrape_with(
        driver,
        &fast_config(),
        Arc::new(FixedOcr("1234")),
        credentials(),
        query(),
    )
    .await;

    assert!(!response.success);
    assert_eq!(response.error, Some(ErrorCode::NavigationError));
    assert!(state.closed());
}

#[tokio::test]
async fn missing_banner_frame_before_login_is_navigation_error() {
    let (driver, state) = FakeDriver::boxed(vec![vec![]], vec![], results_tables());
    let response = scrape_with(
        driver,
        &fast_config(),
        Arc::new(FixedOcr("1234")),
        credentials(),
        query(),
    )
    .await;

    assert!(!response.success);
    assert_eq!(response.error, Some(ErrorCode::NavigationError));
    assert_eq!(state.submits(), 0);
    assert!(state.closed());
}
