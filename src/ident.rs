#![forbid(unsafe_code)]

//! Canonical video id resolution.
//!
//! Inputs arrive as raw 19-digit ids, canonical `douyin.com/video/...` URLs,
//! short share links that only resolve through an HTTP redirect, or free text
//! with an id buried somewhere inside. Everything funnels into [`resolve`],
//! which yields the canonical id or `None` when no id can be recovered.

use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result};
use regex::Regex;
use tracing::{debug, warn};

static URL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://[^\s]+").expect("url pattern compiles"));

/// Douyin video ids are 19 decimal digits. On longer runs the leftmost 19
/// digits win, matching what existing spreadsheets were built against.
static VIDEO_ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{19}").expect("id pattern compiles"));

/// Older link formats carried shorter ids; tried in order after the 19-digit
/// scan comes up empty.
static LEGACY_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [r"/video/(\d+)", r"aweme_id=(\d+)", r"modal_id=(\d+)"]
        .iter()
        .map(|pattern| Regex::new(pattern).expect("legacy pattern compiles"))
        .collect()
});

const REDIRECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Follows share-link redirects to their final URL. Abstracted so tests can
/// substitute a canned target instead of the network.
pub trait ResolveRedirect {
    fn final_url(&self, url: &str) -> Result<String>;
}

/// Production resolver: issues a HEAD request and reports where the redirect
/// chain ended up.
pub struct HttpRedirectResolver {
    client: reqwest::blocking::Client,
}

impl HttpRedirectResolver {
    pub fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(REDIRECT_TIMEOUT)
            .build()
            .context("building redirect client")?;
        Ok(Self { client })
    }
}

impl ResolveRedirect for HttpRedirectResolver {
    fn final_url(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .head(url)
            .send()
            .with_context(|| format!("resolving short link {url}"))?;
        Ok(response.url().to_string())
    }
}

/// Resolver that never touches the network; inputs pass through untouched.
/// Useful where the caller knows it only deals in raw ids.
pub struct NoRedirect;

impl ResolveRedirect for NoRedirect {
    fn final_url(&self, url: &str) -> Result<String> {
        Ok(url.to_string())
    }
}

/// True for link hosts that only reveal the video id after a redirect.
fn is_short_link(url: &str) -> bool {
    url.contains("v.douyin.com") || url.contains("douyin.com/share/")
}

/// Resolves an arbitrary video reference to its canonical 19-digit id.
///
/// Short links are expanded first so the digit scan runs over the final URL;
/// a failed expansion is non-fatal and the scan falls back to the original
/// input. Returns `None` when nothing id-shaped can be found.
pub fn resolve(input: &str, resolver: &dyn ResolveRedirect) -> Option<String> {
    let mut haystack = input.trim().to_string();

    if haystack.contains("http") {
        let short_link = URL_PATTERN
            .find(&haystack)
            .map(|found| found.as_str().to_string())
            .filter(|url| is_short_link(url));
        if let Some(url) = short_link {
            match resolver.final_url(&url) {
                Ok(resolved) => {
                    debug!("short link {url} resolved to {resolved}");
                    haystack = resolved;
                }
                Err(err) => {
                    warn!("failed to resolve short link {url}: {err:#}");
                }
            }
        }
    }

    if let Some(found) = VIDEO_ID_PATTERN.find(&haystack) {
        return Some(found.as_str().to_string());
    }

    for pattern in LEGACY_PATTERNS.iter() {
        if let Some(captures) = pattern.captures(&haystack) {
            return Some(captures[1].to_string());
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use std::cell::RefCell;

    /// Fake resolver returning a fixed target and recording whether it ran.
    struct FakeResolver {
        target: Option<String>,
        calls: RefCell<Vec<String>>,
    }

    impl FakeResolver {
        fn redirects_to(target: &str) -> Self {
            Self {
                target: Some(target.to_string()),
                calls: RefCell::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                target: None,
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl ResolveRedirect for FakeResolver {
        fn final_url(&self, url: &str) -> Result<String> {
            self.calls.borrow_mut().push(url.to_string());
            match &self.target {
                Some(target) => Ok(target.clone()),
                None => bail!("connection refused"),
            }
        }
    }

    #[test]
    fn resolve_plain_id() {
        assert_eq!(
            resolve("7567352731951164082", &NoRedirect).as_deref(),
            Some("7567352731951164082")
        );
    }

    #[test]
    fn resolve_id_embedded_in_text() {
        assert_eq!(
            resolve("看看这个视频 7567352731951164082 不错", &NoRedirect).as_deref(),
            Some("7567352731951164082")
        );
    }

    #[test]
    fn resolve_picks_leftmost_of_multiple_runs() {
        let input = "1111111111111111111 and 2222222222222222222";
        assert_eq!(resolve(input, &NoRedirect).as_deref(), Some("1111111111111111111"));
    }

    #[test]
    fn resolve_takes_first_nineteen_of_longer_run() {
        // 20-digit run: compatibility dictates the first 19 digits.
        assert_eq!(
            resolve("12345678901234567890", &NoRedirect).as_deref(),
            Some("1234567890123456789")
        );
    }

    #[test]
    fn resolve_canonical_url() {
        assert_eq!(
            resolve(
                "https://www.douyin.com/video/7567352731951164082",
                &NoRedirect
            )
            .as_deref(),
            Some("7567352731951164082")
        );
    }

    #[test]
    fn resolve_legacy_patterns_in_order() {
        assert_eq!(
            resolve("https://example.com/video/12345", &NoRedirect).as_deref(),
            Some("12345")
        );
        assert_eq!(
            resolve("https://example.com/detail?aweme_id=678", &NoRedirect).as_deref(),
            Some("678")
        );
        assert_eq!(
            resolve("https://example.com/page?modal_id=999", &NoRedirect).as_deref(),
            Some("999")
        );
    }

    #[test]
    fn resolve_short_link_uses_redirect_target() {
        let resolver =
            FakeResolver::redirects_to("https://www.douyin.com/video/7567352731951164082");
        assert_eq!(
            resolve("https://v.douyin.com/abc123", &resolver).as_deref(),
            Some("7567352731951164082")
        );
        assert_eq!(
            resolver.calls.borrow().as_slice(),
            ["https://v.douyin.com/abc123"]
        );
    }

    #[test]
    fn resolve_share_link_host_is_expanded() {
        let resolver =
            FakeResolver::redirects_to("https://www.douyin.com/video/1234567890123456789");
        assert_eq!(
            resolve("https://www.douyin.com/share/xyz", &resolver).as_deref(),
            Some("1234567890123456789")
        );
    }

    #[test]
    fn resolve_redirect_failure_falls_back_to_original_input() {
        let resolver = FakeResolver::failing();
        assert_eq!(
            resolve(
                "https://v.douyin.com/abc 7567352731951164082",
                &resolver
            )
            .as_deref(),
            Some("7567352731951164082")
        );
        assert_eq!(resolver.calls.borrow().len(), 1);
    }

    #[test]
    fn resolve_regular_url_skips_redirect_resolution() {
        let resolver = FakeResolver::redirects_to("https://unused.example");
        assert_eq!(
            resolve(
                "https://www.douyin.com/video/7567352731951164082",
                &resolver
            )
            .as_deref(),
            Some("7567352731951164082")
        );
        assert!(resolver.calls.borrow().is_empty());
    }

    #[test]
    fn resolve_returns_none_without_id() {
        assert!(resolve("no digits here", &NoRedirect).is_none());
        assert!(resolve("", &NoRedirect).is_none());
        assert!(resolve("12345678", &NoRedirect).is_none());
    }
}
