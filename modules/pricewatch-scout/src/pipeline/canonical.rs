use std::sync::LazyLock;

use regex::Regex;
use url::Url;

const TRACKING_PARAMS: &[&str] = &[
    "ref", "ref_", "tag", "fbclid", "gclid", "msclkid", "dclid", "yclid", "mc_cid", "mc_eid",
    "_ga", "igshid", "srsltid",
];

static RE_ASIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/(?:dp|gp/product|gp/aw/d|exec/obidos/asin)/([A-Z0-9]{10})").expect("valid regex")
});

fn is_tracking(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key.as_str())
}

/// Canonical form of a product URL: Amazon pages reduced to `/dp/<ASIN>`,
/// tracking parameters and fragments removed. Unparsable input is returned
/// unchanged.
pub fn simplify_url(raw: &str) -> String {
    let Ok(mut url) = Url::parse(raw.trim()) else {
        return raw.to_string();
    };

    let is_amazon = url
        .host_str()
        .is_some_and(|h| h.split('.').any(|label| label == "amazon"));
    if is_amazon {
        if let Some(asin) = RE_ASIN.captures(url.path()).and_then(|c| c.get(1)) {
            let path = format!("/dp/{}", asin.as_str());
            url.set_path(&path);
            url.set_query(None);
            url.set_fragment(None);
            return url.to_string();
        }
    }

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !is_tracking(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }
    url.set_fragment(None);
    url.to_string()
}
