//! User-Agent string sent with every mirror request.

/// Project URL for User-Agent identification (RFC 9308).
const PROJECT_UA_URL: &str = "https://github.com/vs49688/accords-mirrorrer";

/// Default User-Agent for download requests.
#[must_use]
pub fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("mirrorer/{version} (+{PROJECT_UA_URL})")
}
