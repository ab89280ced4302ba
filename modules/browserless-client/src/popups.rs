//! Consent and promotional overlay dismissal.
//!
//! Each pattern is tried in order with click-and-verify: the script clicks the
//! first visible match, waits briefly, then reports whether the element is
//! gone. Nothing here is fatal; capture proceeds whatever the outcome.

use chromiumoxide::Page;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DismissPattern {
    /// CSS selector of an accept/close control.
    Selector(&'static str),
    /// Button or link whose trimmed text equals this (case-insensitive).
    ButtonText(&'static str),
}

/// Known consent-manager controls first, then generic wording.
pub const DISMISS_PATTERNS: &[DismissPattern] = &[
    DismissPattern::Selector("#didomi-notice-agree-button"),
    DismissPattern::Selector("#onetrust-accept-btn-handler"),
    DismissPattern::Selector("#sp-cc-accept"),
    DismissPattern::Selector("#tarteaucitronPersonalize2"),
    DismissPattern::Selector("#CybotCookiebotDialogBodyLevelButtonLevelOptinAllowAll"),
    DismissPattern::Selector(".axeptio_btn_acceptAll"),
    DismissPattern::Selector(".qc-cmp2-summary-buttons button[mode='primary']"),
    DismissPattern::Selector("button[data-testid='uc-accept-all-button']"),
    DismissPattern::ButtonText("Tout accepter"),
    DismissPattern::ButtonText("Accepter et fermer"),
    DismissPattern::ButtonText("Accepter"),
    DismissPattern::ButtonText("J'accepte"),
    DismissPattern::ButtonText("Accept all"),
    DismissPattern::ButtonText("Accept"),
    DismissPattern::ButtonText("Continuer les achats"),
    DismissPattern::ButtonText("Continuer sans accepter"),
    DismissPattern::ButtonText("No thanks"),
    DismissPattern::Selector("[aria-label='Fermer']"),
    DismissPattern::Selector("[aria-label='Close']"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DismissOutcome {
    NotFound,
    Dismissed,
    StillVisible,
}

impl DismissOutcome {
    pub fn from_js(value: &str) -> Self {
        match value {
            "dismissed" => DismissOutcome::Dismissed,
            "stuck" => DismissOutcome::StillVisible,
            _ => DismissOutcome::NotFound,
        }
    }
}

impl DismissPattern {
    pub fn label(&self) -> &'static str {
        match self {
            DismissPattern::Selector(s) | DismissPattern::ButtonText(s) => s,
        }
    }

    /// Script resolving to `"absent"`, `"dismissed"` or `"stuck"`.
    pub fn script(&self) -> String {
        let finder = match self {
            DismissPattern::Selector(selector) => format!(
                "Array.from(document.querySelectorAll({sel})).find(visible)",
                sel = js_string(selector)
            ),
            DismissPattern::ButtonText(text) => format!(
                "Array.from(document.querySelectorAll('button, a, [role=\"button\"], input[type=\"button\"], input[type=\"submit\"]'))\
                 .find(el => visible(el) && (el.innerText || el.value || '').trim().toLowerCase() === {text})",
                text = js_string(&text.to_lowercase())
            ),
        };

        format!(
            r#"(async () => {{
    const visible = (el) => {{
        if (!el || !el.isConnected) return false;
        const r = el.getBoundingClientRect();
        const s = window.getComputedStyle(el);
        return r.width > 0 && r.height > 0 && s.visibility !== 'hidden' && s.display !== 'none';
    }};
    const el = {finder};
    if (!el) return 'absent';
    try {{ el.click(); }} catch (_) {{ return 'stuck'; }}
    await new Promise(r => setTimeout(r, 400));
    return visible(el) ? 'stuck' : 'dismissed';
}})()"#
        )
    }
}

fn js_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "''".to_string())
}

/// Hides leftover fixed overlays covering most of the viewport and unlocks
/// scrolling. Resolves to the number of hidden elements.
pub const OVERLAY_CLEANUP_SCRIPT: &str = r#"(() => {
    document.dispatchEvent(new KeyboardEvent('keydown', { key: 'Escape', keyCode: 27, bubbles: true }));
    let hidden = 0;
    const vw = window.innerWidth, vh = window.innerHeight;
    for (const el of document.querySelectorAll('body *')) {
        const s = window.getComputedStyle(el);
        if (s.position !== 'fixed' && s.position !== 'sticky') continue;
        const z = parseInt(s.zIndex, 10);
        if (isNaN(z) || z <= 100) continue;
        const r = el.getBoundingClientRect();
        if (r.width * r.height < vw * vh * 0.5) continue;
        el.style.setProperty('display', 'none', 'important');
        hidden++;
    }
    for (const node of [document.documentElement, document.body]) {
        if (!node) continue;
        node.style.setProperty('overflow', 'auto', 'important');
        node.style.setProperty('position', 'static', 'important');
    }
    return hidden;
})()"#;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DismissReport {
    pub dismissed: Vec<&'static str>,
    pub stuck: Vec<&'static str>,
    pub overlays_hidden: u64,
}

/// Try every pattern, then clear leftover overlays.
pub async fn dismiss_popups(page: &Page) -> DismissReport {
    let mut report = DismissReport::default();

    for pattern in DISMISS_PATTERNS {
        let outcome = match page.evaluate(pattern.script()).await {
            Ok(result) => result
                .into_value::<String>()
                .map(|v| DismissOutcome::from_js(&v))
                .unwrap_or(DismissOutcome::NotFound),
            Err(e) => {
                debug!(pattern = pattern.label(), error = %e, "Dismiss script failed");
                DismissOutcome::NotFound
            }
        };

        match outcome {
            DismissOutcome::Dismissed => report.dismissed.push(pattern.label()),
            DismissOutcome::StillVisible => report.stuck.push(pattern.label()),
            DismissOutcome::NotFound => {}
        }
    }

    report.overlays_hidden = match page.evaluate(OVERLAY_CLEANUP_SCRIPT).await {
        Ok(result) => result.into_value::<u64>().unwrap_or(0),
        Err(e) => {
            debug!(error = %e, "Overlay cleanup failed");
            0
        }
    };

    report
}
