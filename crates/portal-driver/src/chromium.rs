//! Chromium-backed [`Driver`] implementation.
//!
//! The portal is a legacy frameset, so frame-scoped operations cannot go
//! through element handles on the top document. Every operation instead
//! evaluates a script whose root is either `document` or the named frame's
//! `contentDocument`, polling until the target appears or the deadline
//! expires.

use std::fs;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::page::{CaptureScreenshotFormat, Viewport};
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::error::CdpError;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, warn};

use crate::config::BrowserSettings;
use crate::driver::{Driver, DriverFactory, FrameRef, Scope, TableSnapshot};
use crate::error::DriverError;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// One exclusively-owned browser + page, torn down with the driver.
pub struct ChromiumDriver {
    page: Page,
    browser: Mutex<Option<Browser>>,
    events: Mutex<Option<JoinHandle<()>>>,
}

impl ChromiumDriver {
    /// Launch a fresh browser process and open a single blank page.
    pub async fn launch(settings: &BrowserSettings) -> Result<Self, DriverError> {
        let config = browser_config(settings)?;
        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|err| DriverError::Launch(err.to_string()))?;

        let events = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(target: "portal-driver", %err, "browser event loop ended");
                    break;
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|err| DriverError::Launch(err.to_string()))?;

        debug!(target: "portal-driver", "chromium session established");
        Ok(Self {
            page,
            browser: Mutex::new(Some(browser)),
            events: Mutex::new(Some(events)),
        })
    }

    async fn eval(&self, expression: String) -> Result<Value, DriverError> {
        let params = EvaluateParams::builder()
            .expression(expression)
            .return_by_value(true)
            .await_promise(true)
            .build()
            .map_err(DriverError::Internal)?;

        let outcome = self.page.evaluate(params).await.map_err(map_cdp_error)?;
        Ok(outcome.into_value().unwrap_or(Value::Null))
    }

    /// Evaluate `expression` (which must yield `{status: ...}`) until the
    /// status is `"ok"` or the deadline passes; the last status observed is
    /// handed to `on_expiry` to pick the error.
    async fn poll_until_ok(
        &self,
        expression: &str,
        deadline: Duration,
        on_expiry: impl Fn(&str) -> DriverError,
    ) -> Result<Value, DriverError> {
        let expires = Instant::now() + deadline;
        let mut last_status = "missing".to_string();

        loop {
            let value = self.eval(expression.to_string()).await?;
            let status = value
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or("missing")
                .to_string();
            if status == "ok" {
                return Ok(value);
            }
            last_status = status;

            if Instant::now() >= expires {
                return Err(on_expiry(&last_status));
            }
            sleep(POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl Driver for ChromiumDriver {
    async fn goto(&self, url: &str, deadline: Duration) -> Result<(), DriverError> {
        match timeout(deadline, self.page.goto(url)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(err)) => Err(DriverError::Navigation(err.to_string())),
            Err(_) => Err(DriverError::Navigation(format!(
                "navigation to {url} timed out"
            ))),
        }
    }

    async fn frame(&self, name: &str, deadline: Duration) -> Result<FrameRef, DriverError> {
        let expression = format!(
            "(() => {{ const el = {probe}; if (!el) return {{status: 'missing'}}; \
             const doc = el.contentDocument || (el.contentWindow ? el.contentWindow.document : null); \
             return doc ? {{status: 'ok'}} : {{status: 'detached'}}; }})()",
            probe = frame_probe(name),
        );

        self.poll_until_ok(&expression, deadline, |last| match last {
            "detached" => DriverError::FrameNotFound(format!(
                "frame '{name}' attached without a content document"
            )),
            _ => DriverError::WaitTimeout(format!("frame '{name}' did not attach")),
        })
        .await?;

        debug!(target: "portal-driver", frame = name, "frame resolved");
        Ok(FrameRef::named(name))
    }

    async fn wait_for(
        &self,
        scope: &Scope,
        selector: &str,
        deadline: Duration,
    ) -> Result<(), DriverError> {
        let expression = scoped_op(
            scope,
            &format!(
                "const el = root.querySelector({sel}); \
                 return el ? {{status: 'ok'}} : {{status: 'missing'}};",
                sel = js_literal(selector),
            ),
        );
        self.poll_until_ok(&expression, deadline, |last| {
            expiry_error(last, scope, format!("no element matched '{selector}'"))
        })
        .await?;
        Ok(())
    }

    async fn fill(
        &self,
        scope: &Scope,
        selector: &str,
        value: &str,
        deadline: Duration,
    ) -> Result<(), DriverError> {
        let expression = scoped_op(
            scope,
            &format!(
                "const el = root.querySelector({sel}); \
                 if (!el) return {{status: 'missing'}}; \
                 el.value = {val}; \
                 el.dispatchEvent(new Event('input', {{ bubbles: true }})); \
                 el.dispatchEvent(new Event('change', {{ bubbles: true }})); \
                 return {{status: 'ok'}};",
                sel = js_literal(selector),
                val = js_literal(value),
            ),
        );
        self.poll_until_ok(&expression, deadline, |last| {
            expiry_error(last, scope, format!("fill target '{selector}' not found"))
        })
        .await?;
        Ok(())
    }

    async fn click(
        &self,
        scope: &Scope,
        selector: &str,
        deadline: Duration,
    ) -> Result<(), DriverError> {
        let expression = scoped_op(
            scope,
            &format!(
                "const el = root.querySelector({sel}); \
                 if (!el) return {{status: 'missing'}}; \
                 el.click(); \
                 return {{status: 'ok'}};",
                sel = js_literal(selector),
            ),
        );
        self.poll_until_ok(&expression, deadline, |last| {
            expiry_error(last, scope, format!("click target '{selector}' not found"))
        })
        .await?;
        Ok(())
    }

    async fn click_link(
        &self,
        scope: &Scope,
        text: &str,
        exact: bool,
        deadline: Duration,
    ) -> Result<(), DriverError> {
        let expression = scoped_op(
            scope,
            &format!(
                "const wanted = {text}; \
                 const anchors = Array.from(root.querySelectorAll('a')); \
                 const el = anchors.find(a => {{ \
                     const label = (a.innerText || a.textContent || '').trim(); \
                     return {exact} ? label === wanted : label.includes(wanted); \
                 }}); \
                 if (!el) return {{status: 'missing'}}; \
                 el.click(); \
                 return {{status: 'ok'}};",
                text = js_literal(text),
                exact = exact,
            ),
        );
        self.poll_until_ok(&expression, deadline, |last| {
            expiry_error(last, scope, format!("link '{text}' not found"))
        })
        .await?;
        Ok(())
    }

    async fn select(
        &self,
        scope: &Scope,
        selector: &str,
        value: &str,
        deadline: Duration,
    ) -> Result<(), DriverError> {
        let expression = scoped_op(
            scope,
            &format!(
                "const el = root.querySelector({sel}); \
                 if (!el) return {{status: 'missing'}}; \
                 const options = Array.from(el.options || []); \
                 const option = options.find(opt => opt.value === {val}); \
                 if (!option) return {{status: 'option-missing'}}; \
                 el.value = option.value; \
                 el.dispatchEvent(new Event('input', {{ bubbles: true }})); \
                 el.dispatchEvent(new Event('change', {{ bubbles: true }})); \
                 return {{status: 'ok'}};",
                sel = js_literal(selector),
                val = js_literal(value),
            ),
        );
        self.poll_until_ok(&expression, deadline, |last| match last {
            "option-missing" => DriverError::OptionNotFound(format!(
                "select '{selector}' has no option with value '{value}'"
            )),
            other => expiry_error(other, scope, format!("select '{selector}' not found")),
        })
        .await?;
        Ok(())
    }

    async fn capture(
        &self,
        scope: &Scope,
        selector: &str,
        deadline: Duration,
    ) -> Result<Vec<u8>, DriverError> {
        // The clip is expressed in top-document coordinates, so a frame-scoped
        // element's rect is offset by its frame element's rect.
        let offset = match scope {
            Scope::Page => "{x: 0, y: 0}".to_string(),
            Scope::Frame(frame) => format!(
                "(() => {{ const el = {probe}; if (!el) return null; \
                 const r = el.getBoundingClientRect(); return {{x: r.x, y: r.y}}; }})()",
                probe = frame_probe(&frame.name),
            ),
        };
        let expression = scoped_op(
            scope,
            &format!(
                "const el = root.querySelector({sel}); \
                 if (!el) return {{status: 'missing'}}; \
                 const offset = {offset}; \
                 if (!offset) return {{status: 'no-frame'}}; \
                 const r = el.getBoundingClientRect(); \
                 if (!r.width || !r.height) return {{status: 'missing'}}; \
                 return {{status: 'ok', x: offset.x + r.x, y: offset.y + r.y, \
                          width: r.width, height: r.height}};",
                sel = js_literal(selector),
                offset = offset,
            ),
        );

        let rect = self
            .poll_until_ok(&expression, deadline, |last| {
                expiry_error(last, scope, format!("capture target '{selector}' not found"))
            })
            .await?;

        let field = |name: &str| rect.get(name).and_then(Value::as_f64).unwrap_or(0.0);
        let clip = Viewport {
            x: field("x"),
            y: field("y"),
            width: field("width"),
            height: field("height"),
            scale: 1.0,
        };

        self.page
            .screenshot(
                ScreenshotParams::builder()
                    .format(CaptureScreenshotFormat::Jpeg)
                    .clip(clip)
                    .build(),
            )
            .await
            .map_err(map_cdp_error)
    }

    async fn texts(&self, scope: &Scope, selector: &str) -> Result<Vec<String>, DriverError> {
        let expression = scoped_op(
            scope,
            &format!(
                "const texts = Array.from(root.querySelectorAll({sel}))\
                     .map(el => (el.innerText || el.textContent || '').trim()); \
                 return {{status: 'ok', texts}};",
                sel = js_literal(selector),
            ),
        );
        let value = self.eval(expression).await?;
        match value.get("status").and_then(Value::as_str) {
            Some("ok") => {}
            Some("no-frame") => {
                return Err(DriverError::FrameNotFound(scope_label(scope)));
            }
            _ => {
                return Err(DriverError::Script(format!(
                    "text query for '{selector}' returned no result"
                )));
            }
        }
        serde_json::from_value(value.get("texts").cloned().unwrap_or(Value::Null))
            .map_err(|err| DriverError::Script(err.to_string()))
    }

    async fn tables(
        &self,
        scope: &Scope,
        selector: &str,
    ) -> Result<Vec<TableSnapshot>, DriverError> {
        let expression = scoped_op(
            scope,
            &format!(
                "const tables = Array.from(root.querySelectorAll({sel})).map(table => ({{ \
                     rows: Array.from(table.querySelectorAll('tr')).map(row => ({{ \
                         class: row.className || '', \
                         cells: Array.from(row.querySelectorAll('td, th')).map(cell => ({{ \
                             header: cell.tagName === 'TH', \
                             text: (cell.innerText || cell.textContent || '').trim(), \
                         }})), \
                     }})), \
                 }})); \
                 return {{status: 'ok', tables}};",
                sel = js_literal(selector),
            ),
        );
        let value = self.eval(expression).await?;
        match value.get("status").and_then(Value::as_str) {
            Some("ok") => {}
            Some("no-frame") => {
                return Err(DriverError::FrameNotFound(scope_label(scope)));
            }
            _ => {
                return Err(DriverError::Script(format!(
                    "table snapshot for '{selector}' returned no result"
                )));
            }
        }
        serde_json::from_value(value.get("tables").cloned().unwrap_or(Value::Null))
            .map_err(|err| DriverError::Script(err.to_string()))
    }

    async fn close(&self) -> Result<(), DriverError> {
        let browser = self.browser.lock().await.take();
        if let Some(mut browser) = browser {
            if let Err(err) = browser.close().await {
                warn!(target: "portal-driver", %err, "browser close failed");
            }
            if let Err(err) = browser.wait().await {
                debug!(target: "portal-driver", %err, "browser wait failed");
            }
        }
        if let Some(events) = self.events.lock().await.take() {
            events.abort();
        }
        debug!(target: "portal-driver", "chromium session closed");
        Ok(())
    }
}

/// Launches one [`ChromiumDriver`] per request.
#[derive(Clone, Debug)]
pub struct ChromiumFactory {
    settings: BrowserSettings,
}

impl ChromiumFactory {
    pub fn new(settings: BrowserSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl DriverFactory for ChromiumFactory {
    async fn launch(&self) -> Result<Box<dyn Driver>, DriverError> {
        Ok(Box::new(ChromiumDriver::launch(&self.settings).await?))
    }
}

fn browser_config(settings: &BrowserSettings) -> Result<BrowserConfig, DriverError> {
    if !settings.executable.as_os_str().is_empty() && !settings.executable.exists() {
        return Err(DriverError::Launch(format!(
            "chrome executable not found at {}; set IMS_CHROME to the full path",
            settings.executable.display()
        )));
    }

    fs::create_dir_all(&settings.user_data_dir)
        .map_err(|err| DriverError::Launch(format!("failed to ensure user-data-dir: {err}")))?;

    let user_agent_arg = format!("--user-agent={}", settings.user_agent);
    let mut builder = BrowserConfig::builder()
        .request_timeout(Duration::from_millis(settings.request_timeout_ms))
        .launch_timeout(Duration::from_millis(settings.launch_timeout_ms))
        .window_size(settings.window_width, settings.window_height)
        .user_data_dir(&settings.user_data_dir);

    if !settings.headless {
        builder = builder.with_head();
    }

    if std::env::var("IMS_DISABLE_SANDBOX")
        .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
        .unwrap_or(false)
    {
        builder = builder.no_sandbox();
    }

    let mut args = vec![
        "--disable-background-networking",
        "--disable-breakpad",
        "--disable-default-apps",
        "--disable-dev-shm-usage",
        "--disable-extensions",
        "--disable-hang-monitor",
        "--disable-popup-blocking",
        "--disable-prompt-on-repost",
        "--disable-sync",
        "--no-first-run",
        "--no-default-browser-check",
        "--password-store=basic",
        user_agent_arg.as_str(),
    ];
    if settings.headless {
        args.push("--hide-scrollbars");
        args.push("--mute-audio");
    }
    builder = builder.args(args);

    if !settings.executable.as_os_str().is_empty() {
        builder = builder.chrome_executable(&settings.executable);
    }

    builder
        .build()
        .map_err(|err| DriverError::Launch(format!("browser config error: {err}")))
}

/// CSS probe for a named frame; framesets use `<frame>`, newer pages `<iframe>`.
fn frame_probe(name: &str) -> String {
    format!(
        "document.querySelector({sel})",
        sel = js_literal(&format!("frame[name=\"{name}\"], iframe[name=\"{name}\"]")),
    )
}

/// Wrap an operation body in an IIFE whose `root` is the scope's document.
/// A frame scope whose content document is gone yields `{status: 'no-frame'}`.
fn scoped_op(scope: &Scope, body: &str) -> String {
    let root = match scope {
        Scope::Page => "document".to_string(),
        Scope::Frame(frame) => format!(
            "(() => {{ const el = {probe}; if (!el) return null; \
             return el.contentDocument || (el.contentWindow ? el.contentWindow.document : null); \
             }})()",
            probe = frame_probe(&frame.name),
        ),
    };
    format!(
        "(() => {{ try {{ const root = {root}; \
         if (!root) return {{status: 'no-frame'}}; \
         {body} \
         }} catch (err) {{ return {{status: 'error', detail: String(err)}}; }} }})()"
    )
}

fn js_literal(raw: &str) -> String {
    serde_json::to_string(raw).unwrap_or_else(|_| "\"\"".to_string())
}

fn scope_label(scope: &Scope) -> String {
    match scope {
        Scope::Page => "page document unavailable".to_string(),
        Scope::Frame(frame) => format!("frame '{}' has no content document", frame.name),
    }
}

fn expiry_error(last_status: &str, scope: &Scope, detail: String) -> DriverError {
    match last_status {
        "no-frame" => DriverError::FrameNotFound(scope_label(scope)),
        "error" => DriverError::Script(detail),
        _ => DriverError::TargetNotFound(detail),
    }
}

fn map_cdp_error(err: CdpError) -> DriverError {
    let detail = err.to_string();
    match err {
        CdpError::Timeout => DriverError::WaitTimeout(detail),
        CdpError::JavascriptException(_) => DriverError::Script(detail),
        CdpError::FrameNotFound(_) => DriverError::FrameNotFound(detail),
        _ => DriverError::CdpIo(detail),
    }
}
