//! Navigation Sequencer: from the post-login landing state to the attendance
//! form.
//!
//! Runs only after a successful login. Each step waits for its target link to
//! appear instead of sleeping; a missing link is terminal, since it means the
//! portal layout changed or login left the session somewhere unexpected.

use portal_driver::{Driver, DriverError, Scope};
use tracing::{debug, info};

use crate::config::WaitPolicy;
use crate::errors::ScrapeError;

const BANNER_FRAME: &str = "banner";
const TOP_FRAME: &str = "top";

const ACTIVITIES_LINK: &str = "My Activities";
const EXPAND_ALL_LINK: &str = "Expand All";
const ATTENDANCE_LINK: &str = "MyAttendance";

/// Drive banner-frame "My Activities", then the top-frame menu ("Expand All"
/// followed by the "MyAttendance" entry). The banner frame is re-resolved
/// here because login navigated the page, which staled any earlier handle.
pub async fn to_attendance_form(
    driver: &dyn Driver,
    wait: &WaitPolicy,
) -> Result<(), ScrapeError> {
    let banner = driver
        .frame(BANNER_FRAME, wait.frame_attach)
        .await
        .map_err(step_failed)?;
    driver
        .click_link(&Scope::Frame(banner), ACTIVITIES_LINK, true, wait.element)
        .await
        .map_err(step_failed)?;
    debug!(target: "pipeline", link = ACTIVITIES_LINK, "menu opened");

    let top = driver
        .frame(TOP_FRAME, wait.frame_attach)
        .await
        .map_err(step_failed)?;
    let menu = Scope::Frame(top);
    driver
        .click_link(&menu, EXPAND_ALL_LINK, true, wait.element)
        .await
        .map_err(step_failed)?;
    driver
        .click_link(&menu, ATTENDANCE_LINK, false, wait.element)
        .await
        .map_err(step_failed)?;

    info!(target: "pipeline", "attendance form reached");
    Ok(())
}

fn step_failed(err: DriverError) -> ScrapeError {
    if err.is_structural() {
        ScrapeError::Navigation(err.to_string())
    } else {
        ScrapeError::Unknown(err.to_string())
    }
}
