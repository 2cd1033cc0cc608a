//! Environment-derived defaults for client construction.
//!
//! The core client takes resolved values as plain arguments; these helpers
//! are what the builder falls back to when a value is not given explicitly.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Local;
use uuid::Uuid;

/// Server URL override.
pub const ENV_URL: &str = "FIREFLY_URL";
/// Channel id override.
pub const ENV_CHANNEL: &str = "FIREFLY_CHANNEL";
/// Landing-page override.
pub const ENV_HTML: &str = "FIREFLY_HTML";

const ENV_USER: &str = "USER";
const LOCAL_URL: &str = "http://localhost:8080/firefly";
const DEFAULT_HTML: &str = "slate.html";

/// The server URL to use when none is given: `FIREFLY_URL`, else a local
/// desktop server.
pub fn default_url() -> String {
    std::env::var(ENV_URL).unwrap_or_else(|_| LOCAL_URL.to_string())
}

/// The landing page appended to viewer URLs: `FIREFLY_HTML`, else `slate.html`.
pub fn default_html_file() -> String {
    std::env::var(ENV_HTML).unwrap_or_else(|_| DEFAULT_HTML.to_string())
}

/// Resolve the channel id: explicit value wins, then `FIREFLY_CHANNEL`, then
/// a channel derived from the user name and today's date. The derived form is
/// deliberately stable within a day so separate processes run by the same
/// user land in the same view.
pub fn resolve_channel(explicit: Option<&str>) -> String {
    if let Some(channel) = explicit {
        return channel.to_string();
    }
    if let Ok(channel) = std::env::var(ENV_CHANNEL) {
        if !channel.is_empty() {
            return channel;
        }
    }
    derived_channel()
}

fn derived_channel() -> String {
    let user = std::env::var(ENV_USER).unwrap_or_default();
    let seed = format!("{user}{}", Local::now().format("%Y-%m-%d"));
    URL_SAFE_NO_PAD.encode(seed.as_bytes())
}

/// A freshly generated channel id, unique per call. Useful when a process
/// must not share a view with anything else.
pub fn unique_channel() -> String {
    Uuid::new_v4().to_string()
}
