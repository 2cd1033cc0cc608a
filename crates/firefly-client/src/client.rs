//! The user-facing client handle.

use std::path::Path;
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use http::header::AUTHORIZATION;
use http::{HeaderMap, HeaderValue, StatusCode};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::action::{gen_item_id, Action, ActionType, ItemKind, ResultRecord};
use crate::dispatch::CommandDispatcher;
use crate::env;
use crate::error::{Error, Result};
use crate::events::{
    ChannelKey, ChannelOptions, ConnectionRegistry, EventCallback, HeaderCallback, ALL_EVENTS,
};
use crate::location::ServerLocation;
use crate::session::SessionHeaders;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Upload payload kinds understood by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadType {
    Fits,
    Unknown,
}

/// Layout cell element kinds for the grid viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutElement {
    Tables,
    Images,
    XyPlots,
    TableImageMeta,
    CoverageImage,
}

impl LayoutElement {
    fn as_wire(&self) -> &'static str {
        match self {
            LayoutElement::Tables => "tables",
            LayoutElement::Images => "images",
            LayoutElement::XyPlots => "xyPlots",
            LayoutElement::TableImageMeta => "tableImageMeta",
            LayoutElement::CoverageImage => "coverageImage",
        }
    }
}

/// Coordinate systems accepted by [`FireflyClient::set_pan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanCoord {
    Image,
    J2000,
}

// Non-owning index of live handles, for introspection only.
static INSTANCES: Mutex<Vec<Weak<ClientInner>>> = Mutex::new(Vec::new());

struct ClientInner {
    key: ChannelKey,
    html_file: String,
    render_tree_id: Option<String>,
    options: ChannelOptions,
    http: reqwest::Client,
    dispatcher: CommandDispatcher,
    registry: Arc<ConnectionRegistry>,
}

/// A handle on one server session. Cheap to clone; handles constructed with
/// the same URL and channel share a single event connection through the
/// registry, so they collaborate in the same server-side view.
#[derive(Clone)]
pub struct FireflyClient {
    inner: Arc<ClientInner>,
}

impl FireflyClient {
    /// Start building a client for the given server URL.
    pub fn builder(url: impl Into<String>) -> FireflyClientBuilder {
        FireflyClientBuilder::new(url)
    }

    /// Build a client from environment defaults: `FIREFLY_URL`,
    /// `FIREFLY_CHANNEL`, and `FIREFLY_HTML`, with the documented fallbacks.
    pub async fn from_env() -> Result<Self> {
        Self::builder(env::default_url()).build().await
    }

    /// All live handles in this process. The index never keeps a handle
    /// alive; dropped handles disappear from it.
    pub fn instances() -> Vec<FireflyClient> {
        let mut table = INSTANCES.lock();
        table.retain(|weak| weak.strong_count() > 0);
        table
            .iter()
            .filter_map(Weak::upgrade)
            .map(|inner| FireflyClient { inner })
            .collect()
    }

    /// The channel id this handle routes through.
    pub fn channel(&self) -> &str {
        &self.inner.key.channel
    }

    /// The parsed server location.
    pub fn location(&self) -> &ServerLocation {
        &self.inner.key.location
    }

    /// URL a human opens in a browser to join this channel's view.
    pub fn firefly_url(&self) -> String {
        self.inner
            .key
            .location
            .viewer_url(&self.inner.html_file, &self.inner.key.channel)
    }

    /// Like [`firefly_url`](Self::firefly_url) but for another channel.
    pub fn firefly_url_for(&self, channel: &str) -> String {
        self.inner
            .key
            .location
            .viewer_url(&self.inner.html_file, channel)
    }

    /// The routing headers the next request would carry: the channel's
    /// session state once an event channel is open, this handle's channel id
    /// before that.
    pub async fn current_headers(&self) -> SessionHeaders {
        self.inner
            .registry
            .session_headers(&self.inner.key)
            .await
            .unwrap_or_else(|| SessionHeaders::new(&self.inner.key.channel))
    }

    // ---------------------------------------------------------------
    // action dispatch
    // ---------------------------------------------------------------

    /// Dispatch one action to this handle's channel.
    pub async fn dispatch(
        &self,
        action_type: ActionType,
        payload: Map<String, Value>,
    ) -> Result<ResultRecord> {
        self.dispatch_to(action_type, payload, None).await
    }

    /// Dispatch one action, optionally to another channel on the same
    /// server. When this handle carries a render-tree id it is merged into
    /// the payload so the action scopes to that rendered surface.
    pub async fn dispatch_to(
        &self,
        action_type: ActionType,
        mut payload: Map<String, Value>,
        channel_override: Option<&str>,
    ) -> Result<ResultRecord> {
        if let Some(render_tree_id) = &self.inner.render_tree_id {
            payload.insert(
                "renderTreeId".to_string(),
                Value::String(render_tree_id.clone()),
            );
        }
        let headers = self.current_headers().await;
        let channel = channel_override.unwrap_or(&self.inner.key.channel);
        let action = Action::new(action_type, payload);
        self.inner.dispatcher.dispatch(channel, &action, &headers).await
    }

    // ---------------------------------------------------------------
    // event listeners
    // ---------------------------------------------------------------

    /// Register a callback for events named `name` (or [`ALL_EVENTS`]). The
    /// first registration for this handle's (channel, location) opens the
    /// shared event connection; later ones reuse it. Fails with
    /// [`Error::ResourceExhausted`] when the process channel bound is hit.
    pub async fn add_listener(&self, callback: &EventCallback, name: &str) -> Result<()> {
        self.inner
            .registry
            .add_listener(&self.inner.key, &self.inner.options, callback, name)
            .await
    }

    /// Register a callback for every event on this channel.
    pub async fn add_listener_all(&self, callback: &EventCallback) -> Result<()> {
        self.add_listener(callback, ALL_EVENTS).await
    }

    /// Remove one callback/name registration. Removing the last registration
    /// on the shared channel tears its connection down. Unknown
    /// registrations are a no-op.
    pub async fn remove_listener(&self, callback: &EventCallback, name: &str) {
        self.inner
            .registry
            .remove_listener(&self.inner.key, callback, name)
            .await;
    }

    /// Remove a callback's wildcard registration.
    pub async fn remove_listener_all(&self, callback: &EventCallback) {
        self.remove_listener(callback, ALL_EVENTS).await;
    }

    /// Block until this channel's event connection closes, for any cause.
    ///
    /// Intended for long-running scripts that exist to service callbacks; do
    /// not call it from interactive or notebook-style sessions, where events
    /// are delivered in the background anyway.
    pub async fn wait_for_events(&self) {
        self.inner.registry.wait_forever(&self.inner.key).await;
    }

    /// Tear down this handle's event connection, if one is open. Listeners
    /// registered by other handles sharing the channel stop receiving
    /// events too.
    pub async fn disconnect(&self) {
        self.inner.registry.close(&self.inner.key).await;
    }

    // ---------------------------------------------------------------
    // uploads
    // ---------------------------------------------------------------

    /// Upload a file to the server. Returns the server-side path token
    /// (beginning with the `$` marker) to reference the file in later
    /// actions.
    pub async fn upload_file(&self, path: impl AsRef<Path>) -> Result<String> {
        let path = path.as_ref();
        let data = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());

        let part = reqwest::multipart::Part::bytes(data).file_name(file_name);
        let form = reqwest::multipart::Form::new().part("file", part);
        let url = format!("{}?cmd=upload", self.inner.key.location.cmd_url());
        self.post_upload(url, form).await
    }

    /// Upload in-memory data to the server without touching the filesystem.
    pub async fn upload_data(&self, data: Bytes, kind: UploadType) -> Result<String> {
        let part = reqwest::multipart::Part::stream(reqwest::Body::from(data));
        let form = reqwest::multipart::Form::new().part("data", part);
        let query = match kind {
            UploadType::Fits => "cmd=upload&preload=true&type=FITS",
            UploadType::Unknown => "cmd=upload&preload=false&type=UNKNOWN",
        };
        let url = format!("{}?{query}", self.inner.key.location.cmd_url());
        self.post_upload(url, form).await
    }

    async fn post_upload(&self, url: String, form: reqwest::multipart::Form) -> Result<String> {
        let headers = self.current_headers().await;
        let mut request = self.inner.http.post(&url).multipart(form);
        for (name, value) in headers.header_pairs() {
            request = request.header(name, value);
        }

        let response = request.send().await?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(Error::upload_failed(status));
        }
        let body = response.text().await?;
        match body.find('$') {
            Some(index) => Ok(body[index..].trim_end().to_string()),
            None => Err(Error::protocol(
                "upload response carries no server path marker",
            )),
        }
    }

    // ---------------------------------------------------------------
    // server state
    // ---------------------------------------------------------------

    /// Whether a viewer page is currently connected to this channel.
    pub async fn is_page_connected(&self) -> Result<bool> {
        let url = format!(
            "{}?cmd=pushAliveCheck",
            self.inner.key.location.cmd_url()
        );
        let headers = self.current_headers().await;
        let record = self.inner.dispatcher.send_get(&url, &headers).await?;
        Ok(record.get("active").and_then(Value::as_bool).unwrap_or(false))
    }

    // ---------------------------------------------------------------
    // payload builders
    // ---------------------------------------------------------------

    /// Show a FITS image already on the server (for uploaded files, pass the
    /// token returned by [`upload_file`](Self::upload_file)). `additional`
    /// takes any further viewer plotting parameters.
    pub async fn show_fits(
        &self,
        file_on_server: Option<&str>,
        plot_id: Option<&str>,
        viewer_id: Option<&str>,
        additional: Map<String, Value>,
    ) -> Result<ResultRecord> {
        let mut wp_request = Map::new();
        wp_request.insert("plotGroupId".to_string(), json!("groupFromClient"));
        wp_request.insert("GroupLocked".to_string(), json!(false));
        if let Some(plot_id) = plot_id {
            wp_request.insert("plotId".to_string(), json!(plot_id));
        }
        if let Some(file) = file_on_server {
            wp_request.insert("file".to_string(), json!(file));
        }
        wp_request.extend(additional);

        let viewer_id = match viewer_id {
            Some(id) => id.to_string(),
            None => match &self.inner.render_tree_id {
                Some(tree) => format!("DEFAULT_FITS_VIEWER_ID_{tree}"),
                None => "DEFAULT_FITS_VIEWER_ID".to_string(),
            },
        };

        let mut payload = Map::new();
        payload.insert("wpRequest".to_string(), Value::Object(wp_request));
        payload.insert("useContextModifications".to_string(), json!(true));
        payload.insert("viewerId".to_string(), json!(viewer_id));

        self.dispatch(ActionType::ShowFits, payload).await
    }

    /// Show a table from a server-side file. A table id is generated when
    /// none is given; the generated/supplied id comes back in the result
    /// record under `tbl_id`.
    pub async fn show_table(
        &self,
        file_on_server: &str,
        tbl_id: Option<&str>,
        title: Option<&str>,
        page_size: u32,
        is_catalog: bool,
    ) -> Result<ResultRecord> {
        let tbl_id = tbl_id
            .map(str::to_string)
            .unwrap_or_else(|| gen_item_id(ItemKind::Table));
        let title = title.unwrap_or(&tbl_id);

        let request = table_request(file_on_server, &tbl_id, title, page_size, is_catalog);
        let mut payload = Map::new();
        payload.insert("request".to_string(), Value::Object(request));

        let mut record = self.dispatch(ActionType::ShowTable, payload).await?;
        record.extra.insert("tbl_id".to_string(), json!(tbl_id));
        Ok(record)
    }

    /// Load table data without showing it in the UI.
    pub async fn fetch_table(
        &self,
        file_on_server: &str,
        tbl_id: Option<&str>,
        page_size: u32,
    ) -> Result<ResultRecord> {
        let tbl_id = tbl_id
            .map(str::to_string)
            .unwrap_or_else(|| gen_item_id(ItemKind::Table));

        let request = table_request(file_on_server, &tbl_id, &tbl_id, page_size, false);
        let mut payload = Map::new();
        payload.insert("request".to_string(), Value::Object(request));
        payload.insert("hlRowIdx".to_string(), json!(0));

        self.dispatch(ActionType::FetchTable, payload).await
    }

    /// Add a cell to the grid layout. Table cells are pinned to the `main`
    /// cell by the server, so any other id is overridden for
    /// [`LayoutElement::Tables`]. The effective cell id comes back in the
    /// result record under `cell_id`.
    pub async fn add_cell(
        &self,
        row: u32,
        col: u32,
        width: u32,
        height: u32,
        element: LayoutElement,
        cell_id: Option<&str>,
    ) -> Result<ResultRecord> {
        let cell_id = if element == LayoutElement::Tables {
            "main".to_string()
        } else {
            cell_id
                .map(str::to_string)
                .unwrap_or_else(|| gen_item_id(ItemKind::Cell))
        };

        let mut payload = Map::new();
        payload.insert("row".to_string(), json!(row));
        payload.insert("col".to_string(), json!(col));
        payload.insert("width".to_string(), json!(width));
        payload.insert("height".to_string(), json!(height));
        payload.insert("type".to_string(), json!(element.as_wire()));
        payload.insert("cellId".to_string(), json!(cell_id));

        let mut record = self.dispatch(ActionType::AddCell, payload).await?;
        record.extra.insert("cell_id".to_string(), json!(cell_id));
        Ok(record)
    }

    /// Re-initialize the viewer.
    pub async fn reinit_viewer(&self) -> Result<ResultRecord> {
        self.dispatch(ActionType::ReinitViewer, Map::new()).await
    }

    /// Zoom one plot to the given level.
    pub async fn set_zoom(&self, plot_id: &str, factor: f64) -> Result<ResultRecord> {
        let mut payload = Map::new();
        payload.insert("plotId".to_string(), json!(plot_id));
        payload.insert("userZoomType".to_string(), json!("LEVEL"));
        payload.insert("level".to_string(), json!(factor));
        payload.insert("actionScope".to_string(), json!("SINGLE"));
        self.dispatch(ActionType::ZoomImage, payload).await
    }

    /// Recenter one plot, on the given point or on the image center when no
    /// point is given.
    pub async fn set_pan(
        &self,
        plot_id: &str,
        center: Option<(f64, f64)>,
        coord: PanCoord,
    ) -> Result<ResultRecord> {
        let mut payload = Map::new();
        payload.insert("plotId".to_string(), json!(plot_id));
        if let Some((x, y)) = center {
            let point_type = match coord {
                PanCoord::Image => "ImagePt",
                PanCoord::J2000 => "J2000",
            };
            payload.insert(
                "centerPt".to_string(),
                json!({"x": x, "y": y, "type": point_type}),
            );
        }
        self.dispatch(ActionType::PanImage, payload).await
    }
}

fn table_request(
    file_on_server: &str,
    tbl_id: &str,
    title: &str,
    page_size: u32,
    is_catalog: bool,
) -> Map<String, Value> {
    let mut request = Map::new();
    request.insert("startIdx".to_string(), json!(0));
    request.insert("pageSize".to_string(), json!(page_size));
    request.insert("tbl_id".to_string(), json!(tbl_id));
    request.insert("source".to_string(), json!(file_on_server));
    request.insert(
        "tblType".to_string(),
        json!(if is_catalog { "catalog" } else { "table" }),
    );
    request.insert("id".to_string(), json!("IpacTableFromSource"));
    request.insert(
        "META_INFO".to_string(),
        json!({"title": title, "tbl_id": tbl_id}),
    );
    request
}

/// Builder for [`FireflyClient`]. Construction validates the configuration,
/// then performs a one-time reachability check against the server before
/// returning a usable handle.
pub struct FireflyClientBuilder {
    url: String,
    channel: Option<String>,
    html_file: Option<String>,
    token: Option<String>,
    render_tree_id: Option<String>,
    registry: Option<Arc<ConnectionRegistry>>,
    on_headers: Option<HeaderCallback>,
    timeout: Duration,
}

impl FireflyClientBuilder {
    fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            channel: None,
            html_file: None,
            token: None,
            render_tree_id: None,
            registry: None,
            on_headers: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Use an explicit channel id instead of the environment-derived one.
    pub fn channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    /// Landing page appended to viewer URLs.
    pub fn html_file(mut self, html_file: impl Into<String>) -> Self {
        self.html_file = Some(html_file.into());
        self
    }

    /// Bearer token for servers requiring authentication. Requires an
    /// `https` server URL.
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Correlation id scoping this handle's actions to one rendered surface.
    pub fn render_tree_id(mut self, render_tree_id: impl Into<String>) -> Self {
        self.render_tree_id = Some(render_tree_id.into());
        self
    }

    /// Route event channels through a specific registry instead of the
    /// process-wide one.
    pub fn registry(mut self, registry: Arc<ConnectionRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Observer invoked when the event-channel handshake updates the routing
    /// headers.
    pub fn on_headers(mut self, callback: HeaderCallback) -> Self {
        self.on_headers = Some(callback);
        self
    }

    /// Transport-level timeout for HTTP requests.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Validate, check reachability, and construct the client.
    pub async fn build(self) -> Result<FireflyClient> {
        let location = ServerLocation::parse(&self.url)?;
        if self.token.is_some() && !location.is_secure() {
            return Err(Error::invalid_config(
                "a bearer token requires an https server URL",
            ));
        }

        let channel = env::resolve_channel(self.channel.as_deref());
        let html_file = self.html_file.unwrap_or_else(env::default_html_file);

        let mut http_builder = reqwest::Client::builder().timeout(self.timeout);
        if self.token.is_none() {
            // without a token, a redirecting health check is reported, not followed
            http_builder = http_builder.redirect(reqwest::redirect::Policy::none());
        }
        let mut default_headers = HeaderMap::new();
        if let Some(token) = &self.token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| Error::invalid_config("token contains non-header characters"))?;
            default_headers.insert(AUTHORIZATION, value);
        }
        let http = http_builder.default_headers(default_headers).build()?;

        let health_url = location.health_url();
        debug!(url = %health_url, "checking server reachability");
        match http.get(&health_url).send().await {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => {
                return Err(Error::unreachable(
                    &self.url,
                    Some(response.status()),
                    self.token.is_some(),
                ));
            }
            Err(_) => {
                return Err(Error::unreachable(&self.url, None, self.token.is_some()));
            }
        }
        info!(url = %self.url, channel = %channel, "server reachable");

        let key = ChannelKey::new(channel, location.clone());
        let options = ChannelOptions {
            bearer_token: self.token,
            on_headers: self.on_headers,
        };
        let inner = Arc::new(ClientInner {
            dispatcher: CommandDispatcher::new(http.clone(), location),
            key,
            html_file,
            render_tree_id: self.render_tree_id,
            options,
            http,
            registry: self
                .registry
                .unwrap_or_else(|| Arc::clone(ConnectionRegistry::global())),
        });
        INSTANCES.lock().push(Arc::downgrade(&inner));

        Ok(FireflyClient { inner })
    }
}
