pub mod error;
pub mod popups;
pub mod stealth;

pub use error::{BrowserlessError, Result};
pub use popups::{DismissOutcome, DismissPattern, DismissReport};
pub use stealth::BrowserProfile;

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::cdp::browser_protocol::emulation::{
    SetDeviceMetricsOverrideParams, SetTimezoneOverrideParams, SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::network::{Headers, SetExtraHttpHeadersParams};
use chromiumoxide::cdp::browser_protocol::page::{
    AddScriptToEvaluateOnNewDocumentParams, CaptureScreenshotFormat,
};
use chromiumoxide::error::CdpError;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::{Browser, Handler, Page};
use futures::StreamExt;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const SETTLE_AFTER_LOAD: Duration = Duration::from_millis(1500);
const NETWORK_IDLE_BUDGET_MS: u64 = 5_000;

// =============================================================================
// Options and output
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct RenderOptions {
    pub timeout_ms: u64,
    pub smart_scroll_enabled: bool,
    pub smart_scroll_pixels: u32,
    pub dismiss_popups: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 90_000,
            smart_scroll_enabled: false,
            smart_scroll_pixels: 350,
            dismiss_popups: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub html: String,
    /// PNG of the visible viewport.
    pub screenshot: Vec<u8>,
    pub final_url: String,
    pub title: String,
}

// =============================================================================
// Connection
// =============================================================================

struct Connection {
    browser: Arc<Browser>,
    handler: JoinHandle<()>,
    closed: Arc<AtomicBool>,
    generation: u64,
}

impl Connection {
    fn is_alive(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
struct Lease {
    browser: Arc<Browser>,
    closed: Arc<AtomicBool>,
    generation: u64,
}

fn spawn_handler(mut handler: Handler, closed: Arc<AtomicBool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if let Err(e) = event {
                debug!(error = %e, "CDP handler event error");
            }
        }
        closed.store(true, Ordering::SeqCst);
    })
}

// =============================================================================
// BrowserlessClient
// =============================================================================

/// One long-lived websocket to the remote browser, shared by every render.
///
/// Concurrent renders are bounded by a page semaphore. The connection is
/// opened lazily and re-opened at most once per render when it turns out to
/// be dead.
pub struct BrowserlessClient {
    ws_url: String,
    connection: Mutex<Option<Connection>>,
    pages: Semaphore,
}

impl BrowserlessClient {
    pub fn new(endpoint: &str, token: Option<&str>, max_pages: usize) -> Result<Self> {
        let mut parsed = url::Url::parse(endpoint)
            .map_err(|e| BrowserlessError::Endpoint(format!("{endpoint}: {e}")))?;
        if !matches!(parsed.scheme(), "ws" | "wss") {
            return Err(BrowserlessError::Endpoint(format!(
                "{endpoint}: expected ws:// or wss://"
            )));
        }
        if let Some(token) = token {
            parsed.query_pairs_mut().append_pair("token", token);
        }

        Ok(Self {
            ws_url: parsed.to_string(),
            connection: Mutex::new(None),
            pages: Semaphore::new(max_pages.max(1)),
        })
    }

    /// Render a page and capture its HTML plus a viewport screenshot.
    ///
    /// A connection that drops at any point of the attempt is replaced once
    /// and the page is rendered again within the same deadline.
    pub async fn render(&self, url: &str, options: &RenderOptions) -> Result<RenderedPage> {
        let _permit = self
            .pages
            .acquire()
            .await
            .map_err(|_| BrowserlessError::ConnectionLost("page pool closed".into()))?;

        let deadline = Instant::now() + Duration::from_millis(options.timeout_ms);
        with_one_reconnect(|stale| self.render_once(url, options, deadline, stale)).await
    }

    /// Drop the connection. The next render reconnects.
    pub async fn shutdown(&self) {
        if let Some(conn) = self.connection.lock().await.take() {
            conn.handler.abort();
            info!("Browser connection closed");
        }
    }

    /// One render on the current connection. Returns the generation it ran on,
    /// or `None` when no connection could be leased.
    async fn render_once(
        &self,
        url: &str,
        options: &RenderOptions,
        deadline: Instant,
        stale: Option<u64>,
    ) -> (Option<u64>, Result<RenderedPage>) {
        let timed_out = || BrowserlessError::Timeout(options.timeout_ms);

        let lease = match tokio::time::timeout_at(deadline, self.lease(stale)).await {
            Ok(Ok(lease)) => lease,
            Ok(Err(e)) => return (None, Err(e)),
            Err(_) => return (None, Err(timed_out())),
        };
        let generation = Some(lease.generation);

        let new_page = lease.browser.new_page("about:blank");
        let page = match tokio::time::timeout_at(deadline, new_page).await {
            Ok(Ok(page)) => page,
            Ok(Err(e)) => {
                return (generation, Err(BrowserlessError::ConnectionLost(e.to_string())));
            }
            Err(_) => return (generation, Err(timed_out())),
        };

        let outcome = tokio::time::timeout_at(deadline, drive(&page, url, options, &lease)).await;

        if let Err(e) = page.close().await {
            debug!(url, error = %e, "Page close failed");
        }

        let result = match outcome {
            Ok(result) => result,
            Err(_) => {
                warn!(url, timeout_ms = options.timeout_ms, "Render timed out");
                Err(timed_out())
            }
        };
        (generation, result)
    }

    /// Current live connection, connecting if there is none. `stale` forces a
    /// reconnect unless another task already replaced that generation.
    async fn lease(&self, stale: Option<u64>) -> Result<Lease> {
        let mut slot = self.connection.lock().await;

        if let Some(conn) = slot.as_ref() {
            let replaced_already = stale.is_some_and(|g| g != conn.generation);
            if conn.is_alive() && (stale.is_none() || replaced_already) {
                return Ok(Lease {
                    browser: Arc::clone(&conn.browser),
                    closed: Arc::clone(&conn.closed),
                    generation: conn.generation,
                });
            }
        }

        let generation = slot.as_ref().map(|c| c.generation + 1).unwrap_or(0);
        if let Some(old) = slot.take() {
            old.handler.abort();
        }

        let (browser, handler) = Browser::connect(self.ws_url.clone())
            .await
            .map_err(|e| BrowserlessError::ConnectionLost(format!("connect failed: {e}")))?;
        let closed = Arc::new(AtomicBool::new(false));
        let handler = spawn_handler(handler, Arc::clone(&closed));

        info!(generation, "Connected to remote browser");

        let conn = Connection {
            browser: Arc::new(browser),
            handler,
            closed,
            generation,
        };
        let lease = Lease {
            browser: Arc::clone(&conn.browser),
            closed: Arc::clone(&conn.closed),
            generation,
        };
        *slot = Some(conn);
        Ok(lease)
    }
}

/// Run `attempt` and, if it lost a live connection, run it once more with
/// that generation marked stale so the next lease reconnects.
async fn with_one_reconnect<T, F, Fut>(mut attempt: F) -> Result<T>
where
    F: FnMut(Option<u64>) -> Fut,
    Fut: Future<Output = (Option<u64>, Result<T>)>,
{
    match attempt(None).await {
        (Some(generation), Err(BrowserlessError::ConnectionLost(reason))) => {
            warn!(generation, reason = %reason, "Connection lost, reconnecting once");
            attempt(Some(generation)).await.1
        }
        (_, result) => result,
    }
}

// =============================================================================
// Page driving
// =============================================================================

fn classify(lease: &Lease, e: CdpError) -> BrowserlessError {
    if lease.closed.load(Ordering::SeqCst) {
        BrowserlessError::ConnectionLost(e.to_string())
    } else {
        BrowserlessError::Navigation(e.to_string())
    }
}

async fn drive(
    page: &Page,
    url: &str,
    options: &RenderOptions,
    lease: &Lease,
) -> Result<RenderedPage> {
    let profile = BrowserProfile::random();
    prepare(page, &profile).await.map_err(|e| classify(lease, e))?;

    debug!(url, user_agent = %profile.user_agent, "Navigating");
    page.goto(url).await.map_err(|e| classify(lease, e))?;
    tokio::time::sleep(SETTLE_AFTER_LOAD).await;

    if options.dismiss_popups {
        let report = popups::dismiss_popups(page).await;
        if !report.dismissed.is_empty() || !report.stuck.is_empty() {
            debug!(
                url,
                dismissed = ?report.dismissed,
                stuck = ?report.stuck,
                overlays_hidden = report.overlays_hidden,
                "Popup dismissal"
            );
        }
    }

    if options.smart_scroll_enabled {
        let scroll = format!("window.scrollBy(0, {})", options.smart_scroll_pixels);
        if let Err(e) = page.evaluate(scroll).await {
            debug!(url, error = %e, "Smart scroll failed");
        }
        if !wait_for_network_idle(page, NETWORK_IDLE_BUDGET_MS).await {
            debug!(url, "Network still busy after scroll, capturing anyway");
        }
    }

    let html = page.content().await.map_err(|e| classify(lease, e))?;
    let title = page.get_title().await.ok().flatten().unwrap_or_default();
    let final_url = page
        .url()
        .await
        .ok()
        .flatten()
        .unwrap_or_else(|| url.to_string());

    let screenshot = page
        .screenshot(
            ScreenshotParams::builder()
                .format(CaptureScreenshotFormat::Png)
                .full_page(false)
                .build(),
        )
        .await
        .map_err(|e| classify(lease, e))?;

    info!(url, final_url = %final_url, html_len = html.len(), "Rendered page");

    Ok(RenderedPage {
        html,
        screenshot,
        final_url,
        title,
    })
}

/// Identity and fingerprint countermeasures, applied before navigation.
async fn prepare(page: &Page, profile: &BrowserProfile) -> std::result::Result<(), CdpError> {
    let mut ua = SetUserAgentOverrideParams::new(profile.user_agent.clone());
    ua.accept_language = Some(stealth::ACCEPT_LANGUAGE.to_string());
    ua.platform = Some(profile.platform.to_string());
    page.execute(ua).await?;

    page.execute(SetExtraHttpHeadersParams::new(Headers::new(
        profile.headers.clone(),
    )))
    .await?;

    page.execute(SetDeviceMetricsOverrideParams::new(
        stealth::VIEWPORT_WIDTH,
        stealth::VIEWPORT_HEIGHT,
        1.0,
        false,
    ))
    .await?;

    if let Err(e) = page
        .execute(SetTimezoneOverrideParams::new(stealth::TIMEZONE))
        .await
    {
        debug!(error = %e, "Timezone override rejected");
    }

    page.execute(AddScriptToEvaluateOnNewDocumentParams::new(
        stealth::STEALTH_SCRIPT,
    ))
    .await?;

    Ok(())
}

/// Poll resource-timing entries until the count stops growing for a second.
async fn wait_for_network_idle(page: &Page, budget_ms: u64) -> bool {
    let script = format!(
        r#"(async () => {{
    const budget = {budget_ms}, idleMs = 1000, step = 250, start = Date.now();
    const count = () => {{ try {{ return performance.getEntriesByType('resource').length; }} catch (_) {{ return 0; }} }};
    let last = count(), stable = 0;
    while (Date.now() - start < budget) {{
        await new Promise(r => setTimeout(r, step));
        const now = count();
        if (now === last && document.readyState === 'complete') {{
            stable += step;
            if (stable >= idleMs) return true;
        }} else {{
            stable = 0;
        }}
        last = now;
    }}
    return false;
}})()"#
    );

    match page.evaluate(script).await {
        Ok(result) => result.into_value::<bool>().unwrap_or(false),
        Err(_) => false,
    }
}
