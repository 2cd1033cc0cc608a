//! Server location parsing and endpoint derivation.

use std::fmt;

use url::Url;

use crate::error::{Error, Result};

/// The (scheme, host, path-prefix) triple derived from the configured server
/// URL. Together with a channel id it keys the connection registry: two
/// clients with equal locations and channels share one event channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerLocation {
    secure: bool,
    /// `host[:port]` plus the path prefix, e.g. `localhost:8080/firefly`.
    location: String,
}

impl ServerLocation {
    /// Parse a server URL. Only `http` and `https` schemes are accepted;
    /// a trailing slash on the path is ignored.
    pub fn parse(raw: &str) -> Result<Self> {
        let url = Url::parse(raw)
            .map_err(|err| Error::invalid_config(format!("invalid server URL {raw}: {err}")))?;

        let secure = match url.scheme() {
            "http" => false,
            "https" => true,
            other => {
                return Err(Error::invalid_config(format!(
                    "unsupported scheme {other:?} in server URL {raw}; use http or https"
                )));
            }
        };

        let host = url
            .host_str()
            .ok_or_else(|| Error::invalid_config(format!("server URL {raw} has no host")))?;

        let mut location = host.to_string();
        if let Some(port) = url.port() {
            location.push(':');
            location.push_str(&port.to_string());
        }
        location.push_str(url.path().trim_end_matches('/'));

        Ok(Self { secure, location })
    }

    /// Whether the location uses TLS. Bearer tokens are only allowed on
    /// secure locations.
    pub fn is_secure(&self) -> bool {
        self.secure
    }

    fn http_base(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{scheme}://{}", self.location)
    }

    fn ws_base(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!("{scheme}://{}", self.location)
    }

    /// Endpoint for action dispatch and uploads.
    pub fn cmd_url(&self) -> String {
        format!("{}/sticky/CmdSrv", self.http_base())
    }

    /// Endpoint for the persistent event connection.
    pub fn events_url(&self, channel: &str) -> String {
        format!(
            "{}/sticky/firefly/events?channelID={channel}",
            self.ws_base()
        )
    }

    /// Endpoint for the one-time reachability check at construction.
    pub fn health_url(&self) -> String {
        format!("{}/healthz", self.http_base())
    }

    /// URL a human opens in a browser to join the channel's view.
    pub fn viewer_url(&self, html_file: &str, channel: &str) -> String {
        if html_file.is_empty() {
            format!("{}/?__wsch={channel}", self.http_base())
        } else {
            format!("{}/{html_file}?__wsch={channel}", self.http_base())
        }
    }
}

impl fmt::Display for ServerLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.location)
    }
}
