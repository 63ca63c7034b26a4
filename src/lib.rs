//! Attendance scraper for the IMS student portal.
//!
//! The portal exposes no API: the pipeline drives a headless browser through
//! an image-captcha login, walks a legacy nested-frame UI, and scrapes the
//! attendance summary table into a stable record shape. Browser and OCR
//! engines are consumed behind capability traits ([`portal_driver::Driver`],
//! [`digit_ocr::ImageRecognizer`]) so the whole flow runs against fixtures in
//! tests.

pub mod captcha;
pub mod config;
pub mod errors;
pub mod extract;
pub mod login;
pub mod navigate;
pub mod pipeline;
pub mod server;

pub use config::{AppConfig, TablePick, WaitPolicy};
pub use errors::{ErrorCode, ScrapeError};
pub use extract::{AttendanceQuery, AttendanceRecord, OverallStats};
pub use login::{Credentials, LoginOutcome};
pub use pipeline::{ScrapeRequest, ScrapeResponse};
