//! Per-attempt browser identity: user agent, request headers, viewport and the
//! init script that masks the usual automation fingerprints.

use rand::seq::IndexedRandom;
use serde_json::json;

pub const VIEWPORT_WIDTH: i64 = 1920;
pub const VIEWPORT_HEIGHT: i64 = 1080;
pub const TIMEZONE: &str = "Europe/Paris";
pub const ACCEPT_LANGUAGE: &str = "fr-FR,fr;q=0.9,en-US;q=0.8,en;q=0.7";

pub const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/130.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:133.0) Gecko/20100101 Firefox/133.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36 Edg/131.0.0.0",
];

/// Runs before any page script on every navigation of the page.
pub const STEALTH_SCRIPT: &str = r#"
Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
Object.defineProperty(navigator, 'plugins', {
    get: () => [
        { name: 'Chrome PDF Plugin', filename: 'internal-pdf-viewer' },
        { name: 'Chrome PDF Viewer', filename: 'mhjfbmdgcfjbbpaeojofohoefgiehjai' },
        { name: 'Native Client', filename: 'internal-nacl-plugin' }
    ]
});
Object.defineProperty(navigator, 'languages', { get: () => ['fr-FR', 'fr', 'en-US', 'en'] });
window.chrome = window.chrome || { runtime: {}, loadTimes: function() {}, csi: function() {} };
const originalQuery = window.navigator.permissions && window.navigator.permissions.query;
if (originalQuery) {
    window.navigator.permissions.query = (parameters) => (
        parameters.name === 'notifications'
            ? Promise.resolve({ state: Notification.permission })
            : originalQuery(parameters)
    );
}
"#;

/// Identity presented by one render attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct BrowserProfile {
    pub user_agent: String,
    pub platform: &'static str,
    pub headers: serde_json::Value,
}

impl BrowserProfile {
    pub fn random() -> Self {
        let ua = USER_AGENTS
            .choose(&mut rand::rng())
            .copied()
            .unwrap_or(USER_AGENTS[0]);
        Self::for_user_agent(ua)
    }

    pub fn for_user_agent(user_agent: &str) -> Self {
        Self {
            user_agent: user_agent.to_string(),
            platform: platform_of(user_agent),
            headers: request_headers(user_agent),
        }
    }
}

fn platform_of(user_agent: &str) -> &'static str {
    if user_agent.contains("Macintosh") {
        "macOS"
    } else {
        "Windows"
    }
}

/// Chromium major version from a UA string, `None` for Firefox.
fn chromium_version(user_agent: &str) -> Option<&str> {
    if user_agent.contains("Firefox/") {
        return None;
    }
    let rest = user_agent.split("Chrome/").nth(1)?;
    rest.split('.').next()
}

/// Headers a real desktop browser sends on a top-level navigation.
pub fn request_headers(user_agent: &str) -> serde_json::Value {
    let mut headers = json!({
        "Accept": "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
        "Accept-Language": ACCEPT_LANGUAGE,
        "Upgrade-Insecure-Requests": "1",
        "Sec-Fetch-Dest": "document",
        "Sec-Fetch-Mode": "navigate",
        "Sec-Fetch-Site": "cross-site",
        "Sec-Fetch-User": "?1",
        "Referer": "https://www.google.fr/",
    });

    if let Some(version) = chromium_version(user_agent) {
        let brand = if user_agent.contains("Edg/") {
            "Microsoft Edge"
        } else {
            "Google Chrome"
        };
        headers["Sec-Ch-Ua"] = json!(format!(
            "\"{brand}\";v=\"{version}\", \"Chromium\";v=\"{version}\", \"Not_A Brand\";v=\"24\""
        ));
        headers["Sec-Ch-Ua-Mobile"] = json!("?0");
        headers["Sec-Ch-Ua-Platform"] = json!(format!("\"{}\"", platform_of(user_agent)));
    }

    headers
}
