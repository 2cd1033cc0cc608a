//! One persistent event connection per (channel, location) pair.

use std::fmt;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use http::header::{HeaderName, HeaderValue, AUTHORIZATION};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::location::ServerLocation;
use crate::session::SessionHeaders;

use super::listener::{EventCallback, ListenerTable, ServerEvent};

/// Reserved frame name signaling connection establishment; its data carries
/// the server-assigned channel and connection ids.
pub const CONNECTION_ESTABLISHED: &str = "EVT_CONN_EST";

/// Registry key for one event channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelKey {
    pub channel: String,
    pub location: ServerLocation,
}

impl ChannelKey {
    pub fn new(channel: impl Into<String>, location: ServerLocation) -> Self {
        Self {
            channel: channel.into(),
            location,
        }
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}---{}", self.channel, self.location)
    }
}

/// Invoked from the receive loop after the handshake updates the routing
/// headers, so callers can observe the new `FF-connID`.
pub type HeaderCallback = Arc<dyn Fn(&SessionHeaders) + Send + Sync>;

/// Options for opening an event channel.
#[derive(Clone, Default)]
pub struct ChannelOptions {
    /// Bearer token carried on the upgrade request. Only allowed for secure
    /// locations; the client enforces this at construction.
    pub bearer_token: Option<String>,
    /// Optional observer for handshake header updates.
    pub on_headers: Option<HeaderCallback>,
}

impl fmt::Debug for ChannelOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelOptions")
            .field("bearer_token", &self.bearer_token.as_ref().map(|_| "<set>"))
            .field("on_headers", &self.on_headers.as_ref().map(|_| "<set>"))
            .finish()
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// One live event connection: the WebSocket, its listener table, the session
/// header state, and the background receive loop that fans frames out to
/// listeners.
pub(crate) struct EventChannel {
    key: ChannelKey,
    session: RwLock<SessionHeaders>,
    listeners: Mutex<ListenerTable>,
    shutdown: watch::Sender<bool>,
    ended: watch::Receiver<bool>,
}

impl EventChannel {
    /// Open the connection and spawn the receive loop. A refused connection
    /// or failed upgrade surfaces as [`Error::ConnectionFailed`]; nothing is
    /// registered in that case.
    pub(crate) async fn connect(key: ChannelKey, options: ChannelOptions) -> Result<Arc<Self>> {
        let url = key.location.events_url(&key.channel);
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|err| Error::connection_failed(&key.location, err))?;

        // header names are case-insensitive; from_static requires lowercase
        let channel_header = HeaderName::from_static("ff-channel");
        let channel_value = HeaderValue::from_str(&key.channel)
            .map_err(|_| Error::invalid_config("channel id contains non-header characters"))?;
        request.headers_mut().insert(channel_header, channel_value);

        if let Some(token) = &options.bearer_token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| Error::invalid_config("token contains non-header characters"))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (stream, response) = connect_async(request)
            .await
            .map_err(|err| Error::connection_failed(&key.location, err))?;
        debug!(url = %url, status = %response.status(), "event channel connected");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (ended_tx, ended_rx) = watch::channel(false);

        let channel = Arc::new(Self {
            session: RwLock::new(SessionHeaders::new(&key.channel)),
            key,
            listeners: Mutex::new(ListenerTable::default()),
            shutdown: shutdown_tx,
            ended: ended_rx,
        });

        tokio::spawn(receive_loop(
            Arc::clone(&channel),
            stream,
            shutdown_rx,
            ended_tx,
            options.on_headers,
        ));

        Ok(channel)
    }

    pub(crate) fn add_listener(&self, callback: &EventCallback, name: &str) {
        debug!(channel = %self.key.channel, event = name, "adding listener");
        self.listeners.lock().add(callback, name);
    }

    pub(crate) fn remove_listener(&self, callback: &EventCallback, name: &str) {
        debug!(channel = %self.key.channel, event = name, "removing listener");
        self.listeners.lock().remove(callback, name);
    }

    pub(crate) fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Snapshot of the current routing headers.
    pub(crate) fn session_snapshot(&self) -> SessionHeaders {
        self.session.read().clone()
    }

    /// Ask the receive loop to close the connection and exit. The loop
    /// treats this as normal termination.
    pub(crate) fn disconnect(&self) {
        let _ = self.shutdown.send(true);
    }

    /// A receiver that flips to `true` when the receive loop has exited,
    /// whatever the cause.
    pub(crate) fn ended(&self) -> watch::Receiver<bool> {
        self.ended.clone()
    }

    fn handle_frame(&self, raw: &str, on_headers: Option<&HeaderCallback>) {
        let event: ServerEvent = match serde_json::from_str(raw) {
            Ok(event) => event,
            Err(err) => {
                // one malformed event must not kill the channel
                warn!(error = %err, frame = raw, "could not parse event frame, skipping");
                return;
            }
        };

        if event.name == CONNECTION_ESTABLISHED {
            self.apply_handshake(&event, on_headers);
        } else {
            let callbacks = self.listeners.lock().matching(&event.name);
            for callback in callbacks {
                callback(&event);
            }
        }
    }

    fn apply_handshake(&self, event: &ServerEvent, on_headers: Option<&HeaderCallback>) {
        let assigned_channel = event.data.get("channel").and_then(Value::as_str);
        let conn_id = event.data.get("connID").and_then(Value::as_str);

        let snapshot = {
            let mut session = self.session.write();
            if session.channel.is_empty() {
                if let Some(channel) = assigned_channel {
                    session.channel = channel.to_string();
                }
            }
            if let Some(conn_id) = conn_id {
                session.conn_id = Some(conn_id.to_string());
            }
            session.clone()
        };
        debug!(
            channel = %snapshot.channel,
            conn_id = ?snapshot.conn_id,
            "connection established"
        );

        if let Some(callback) = on_headers {
            callback(&snapshot);
        }
    }
}

/// Dedicated background loop for one channel: receives frames, decodes them,
/// and invokes matching listeners synchronously. Exits on server close, on a
/// transport error, or on an explicit disconnect; exiting releases everyone
/// blocked in a wait-for-events call.
async fn receive_loop(
    channel: Arc<EventChannel>,
    stream: WsStream,
    mut shutdown: watch::Receiver<bool>,
    ended: watch::Sender<bool>,
    on_headers: Option<HeaderCallback>,
) {
    let (mut write, mut read) = stream.split();

    loop {
        tokio::select! {
            frame = read.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        channel.handle_frame(text.as_str(), on_headers.as_ref());
                    }
                    Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                        Ok(text) => channel.handle_frame(text, on_headers.as_ref()),
                        Err(_) => warn!("binary event frame is not UTF-8, skipping"),
                    },
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = write.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(channel = %channel.key.channel, "server closed event connection");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!(channel = %channel.key.channel, error = %err, "event connection error");
                        break;
                    }
                    None => {
                        debug!(channel = %channel.key.channel, "event stream ended");
                        break;
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    }

    debug!(
        channel = %channel.key.channel,
        location = %channel.key.location,
        "receive loop ended"
    );
    let _ = ended.send(true);
}
