//! Routing-header state for one server session.

/// Header naming the logical channel on every outgoing request.
pub const CHANNEL_HEADER: &str = "FF-channel";

/// Header naming the server-side connection, known only after the handshake.
pub const CONN_ID_HEADER: &str = "FF-connID";

/// The routing headers for one (channel, location) session. Owned by the
/// event channel once one is open; written exactly once per successful
/// handshake, from inside the receive loop, and snapshot-read by every
/// client handle on each outgoing HTTP request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionHeaders {
    /// The channel id. Empty only when the session was opened without one,
    /// in which case the handshake fills in the server-assigned id.
    pub channel: String,
    /// Server-assigned connection id, absent until the handshake.
    pub conn_id: Option<String>,
}

impl SessionHeaders {
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            conn_id: None,
        }
    }

    /// The header pairs to attach to an outgoing request.
    pub fn header_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![(CHANNEL_HEADER, self.channel.clone())];
        if let Some(conn_id) = &self.conn_id {
            pairs.push((CONN_ID_HEADER, conn_id.clone()));
        }
        pairs
    }
}
