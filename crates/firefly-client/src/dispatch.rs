//! Synchronous request/response command dispatch.

use http::StatusCode;
use tracing::debug;

use crate::action::{Action, ResultRecord};
use crate::error::{Error, Result};
use crate::location::ServerLocation;
use crate::session::SessionHeaders;

/// Sends encoded actions to the server's command endpoint and parses the
/// response envelope. Owns nothing beyond a handle on the shared HTTP client.
pub(crate) struct CommandDispatcher {
    http: reqwest::Client,
    location: ServerLocation,
}

impl CommandDispatcher {
    pub fn new(http: reqwest::Client, location: ServerLocation) -> Self {
        Self { http, location }
    }

    /// POST one action for `channel`, carrying the session routing headers.
    ///
    /// Non-200 statuses surface as [`Error::Transport`]; a body that is not
    /// a single-element JSON array surfaces as [`Error::Protocol`]. A
    /// malformed response is never silently swallowed.
    pub async fn dispatch(
        &self,
        channel: &str,
        action: &Action,
        headers: &SessionHeaders,
    ) -> Result<ResultRecord> {
        let encoded = action.encode()?;
        let url = self.location.cmd_url();
        debug!(action = %action.action_type, channel, "dispatching action");

        let form = [
            ("channelID", channel),
            ("cmd", "pushAction"),
            ("action", encoded.as_str()),
        ];
        let mut request = self.http.post(&url).form(&form);
        for (name, value) in headers.header_pairs() {
            request = request.header(name, value);
        }

        let response = request.send().await?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(Error::transport(status, url));
        }
        parse_result(&response.text().await?)
    }

    /// GET-style command (alive check and friends), same envelope rules.
    pub async fn send_get(&self, url: &str, headers: &SessionHeaders) -> Result<ResultRecord> {
        let mut request = self.http.get(url);
        for (name, value) in headers.header_pairs() {
            request = request.header(name, value);
        }
        let response = request.send().await?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(Error::transport(status, url.to_string()));
        }
        parse_result(&response.text().await?)
    }
}

/// The server answers every command with a single-element JSON array; element
/// 0 is the result record.
fn parse_result(body: &str) -> Result<ResultRecord> {
    let records: Vec<ResultRecord> = serde_json::from_str(body)
        .map_err(|err| Error::protocol(format!("response is not a JSON record array: {err}")))?;
    records
        .into_iter()
        .next()
        .ok_or_else(|| Error::protocol("response record array is empty"))
}
