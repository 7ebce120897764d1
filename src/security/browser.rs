/// User-agent classification into a small closed set of browser families
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserFamily {
    Chrome,
    Firefox,
    Safari,
    Edge,
    Opera,
    Other,
}

impl BrowserFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            BrowserFamily::Chrome => "chrome",
            BrowserFamily::Firefox => "firefox",
            BrowserFamily::Safari => "safari",
            BrowserFamily::Edge => "edge",
            BrowserFamily::Opera => "opera",
            BrowserFamily::Other => "other",
        }
    }

    /// Parse an allowlist entry into a family name
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "chrome" => Some(BrowserFamily::Chrome),
            "firefox" => Some(BrowserFamily::Firefox),
            "safari" => Some(BrowserFamily::Safari),
            "edge" => Some(BrowserFamily::Edge),
            "opera" => Some(BrowserFamily::Opera),
            "other" => Some(BrowserFamily::Other),
            _ => None,
        }
    }

    /// Classify a raw user-agent string.
    ///
    /// Order matters: Chrome-derived browsers advertise "Chrome" in their
    /// user-agent, and Chrome advertises "Safari", so the more specific
    /// markers are checked first.
    pub fn classify(user_agent: &str) -> Self {
        let ua = user_agent.to_ascii_lowercase();

        if ua.contains("edg/") || ua.contains("edge/") {
            BrowserFamily::Edge
        } else if ua.contains("opr/") || ua.contains("opera") {
            BrowserFamily::Opera
        } else if ua.contains("firefox/") {
            BrowserFamily::Firefox
        } else if ua.contains("chrome/") || ua.contains("crios/") {
            BrowserFamily::Chrome
        } else if ua.contains("safari/") {
            BrowserFamily::Safari
        } else {
            BrowserFamily::Other
        }
    }
}
