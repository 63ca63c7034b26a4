//! The capability surface the pipeline programs against.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::DriverError;

/// Handle to a named sub-document resolved by [`Driver::frame`].
///
/// The handle addresses the frame by name, not by a live DOM reference, so it
/// survives re-renders of the frame's content; it must still be re-resolved
/// after a full-page navigation replaces the frameset itself.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FrameRef {
    pub name: String,
}

impl FrameRef {
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Where a DOM operation is rooted: the top document or a named frame.
#[derive(Clone, Debug)]
pub enum Scope {
    Page,
    Frame(FrameRef),
}

impl Scope {
    pub fn frame(name: impl Into<String>) -> Self {
        Scope::Frame(FrameRef::named(name))
    }
}

/// One table cell as rendered, with its tag kind preserved: the portal emits
/// some aggregate rows with header cells where data cells are expected.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CellSnapshot {
    #[serde(default)]
    pub header: bool,
    #[serde(default)]
    pub text: String,
}

/// One table row with its class attribute and cells.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RowSnapshot {
    #[serde(default)]
    pub class: String,
    #[serde(default)]
    pub cells: Vec<CellSnapshot>,
}

impl RowSnapshot {
    /// The row's visible text, cells joined by single spaces.
    pub fn text(&self) -> String {
        self.cells
            .iter()
            .map(|cell| cell.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// A rendered table, read once as a static value.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TableSnapshot {
    #[serde(default)]
    pub rows: Vec<RowSnapshot>,
}

/// Minimal browser capability surface required by the scraping pipeline.
///
/// Every method that waits on the remote site takes an explicit deadline and
/// resolves or fails within it; none blocks indefinitely.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Navigate the top-level page.
    async fn goto(&self, url: &str, deadline: Duration) -> Result<(), DriverError>;

    /// Wait for a `frame`/`iframe` with the given name to attach and expose a
    /// content document.
    async fn frame(&self, name: &str, deadline: Duration) -> Result<FrameRef, DriverError>;

    /// Wait until the selector matches at least one element in the scope.
    async fn wait_for(
        &self,
        scope: &Scope,
        selector: &str,
        deadline: Duration,
    ) -> Result<(), DriverError>;

    /// Set an input's value, firing the input/change events the portal's
    /// scripts listen for.
    async fn fill(
        &self,
        scope: &Scope,
        selector: &str,
        value: &str,
        deadline: Duration,
    ) -> Result<(), DriverError>;

    /// Click the first element matching the selector.
    async fn click(
        &self,
        scope: &Scope,
        selector: &str,
        deadline: Duration,
    ) -> Result<(), DriverError>;

    /// Click the first anchor whose text matches. With `exact` the trimmed
    /// text must equal `text`; otherwise a substring match is used.
    async fn click_link(
        &self,
        scope: &Scope,
        text: &str,
        exact: bool,
        deadline: Duration,
    ) -> Result<(), DriverError>;

    /// Select a `<select>` option by its value attribute.
    async fn select(
        &self,
        scope: &Scope,
        selector: &str,
        value: &str,
        deadline: Duration,
    ) -> Result<(), DriverError>;

    /// Capture the region occupied by the first matching element as JPEG
    /// bytes. The capture is taken fresh on every call.
    async fn capture(
        &self,
        scope: &Scope,
        selector: &str,
        deadline: Duration,
    ) -> Result<Vec<u8>, DriverError>;

    /// Visible texts of all elements matching the selector, in DOM order.
    async fn texts(&self, scope: &Scope, selector: &str) -> Result<Vec<String>, DriverError>;

    /// Snapshot every table matching the selector, in DOM order.
    async fn tables(
        &self,
        scope: &Scope,
        selector: &str,
    ) -> Result<Vec<TableSnapshot>, DriverError>;

    /// Tear the session down: page, context and browser process. Idempotent.
    async fn close(&self) -> Result<(), DriverError>;
}

/// Launches a fresh, exclusively-owned session per request.
#[async_trait]
pub trait DriverFactory: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn Driver>, DriverError>;
}
