//! A local stand-in for the Firefly server: plain HTTP (health check,
//! command endpoint, uploads) and WebSocket upgrades for the event
//! connection, on one ephemeral port.

// each test binary uses its own subset of this harness
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::handshake::server::{
    Request as WsRequest, Response as WsResponse,
};
use tokio_tungstenite::tungstenite::Message;

pub type Responder = Arc<dyn Fn(&CapturedRequest) -> (u16, String) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    /// header names lowercased
    pub headers: HashMap<String, String>,
    pub body: String,
}

/// One accepted event connection.
pub struct EventServerConn {
    tx: mpsc::UnboundedSender<Message>,
    closed: watch::Receiver<bool>,
    pub headers: HashMap<String, String>,
    pub path: String,
}

impl EventServerConn {
    pub fn send_event(&self, value: &Value) {
        let _ = self.tx.send(Message::text(value.to_string()));
    }

    pub fn send_raw(&self, text: &str) {
        let _ = self.tx.send(Message::text(text.to_string()));
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Wait up to three seconds for the client side to close.
    pub async fn wait_closed(&self) -> bool {
        let mut closed = self.closed.clone();
        tokio::time::timeout(Duration::from_secs(3), async move {
            while !*closed.borrow() {
                if closed.changed().await.is_err() {
                    break;
                }
            }
        })
        .await
        .is_ok()
    }
}

pub struct MockFireflyServer {
    /// Base URL to hand to the client builder.
    pub url: String,
    pub requests: Arc<Mutex<Vec<CapturedRequest>>>,
    pub conns: Arc<Mutex<Vec<Arc<EventServerConn>>>>,
    pub accepted: Arc<AtomicUsize>,
    /// When set, incoming event-connection upgrades are dropped on the floor.
    pub reject_ws: Arc<AtomicBool>,
}

/// Route library logs through `RUST_LOG` when debugging a test run.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

impl MockFireflyServer {
    pub async fn start(responder: Responder) -> Self {
        init_tracing();
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");

        let requests: Arc<Mutex<Vec<CapturedRequest>>> = Arc::new(Mutex::new(Vec::new()));
        let conns: Arc<Mutex<Vec<Arc<EventServerConn>>>> = Arc::new(Mutex::new(Vec::new()));
        let accepted = Arc::new(AtomicUsize::new(0));
        let reject_ws = Arc::new(AtomicBool::new(false));

        {
            let requests = Arc::clone(&requests);
            let conns = Arc::clone(&conns);
            let accepted = Arc::clone(&accepted);
            let reject_ws = Arc::clone(&reject_ws);
            tokio::spawn(async move {
                loop {
                    let (stream, _) = match listener.accept().await {
                        Ok(pair) => pair,
                        Err(_) => return,
                    };
                    let requests = Arc::clone(&requests);
                    let conns = Arc::clone(&conns);
                    let accepted = Arc::clone(&accepted);
                    let reject_ws = Arc::clone(&reject_ws);
                    let responder = Arc::clone(&responder);
                    tokio::spawn(async move {
                        serve_stream(stream, requests, conns, accepted, reject_ws, responder).await;
                    });
                }
            });
        }

        Self {
            url: format!("http://{addr}/firefly"),
            requests,
            conns,
            accepted,
            reject_ws,
        }
    }

    /// The captured requests whose path ends with the command endpoint.
    pub fn cmd_requests(&self) -> Vec<CapturedRequest> {
        self.requests
            .lock()
            .iter()
            .filter(|req| req.path.ends_with("/sticky/CmdSrv"))
            .cloned()
            .collect()
    }

    /// Wait up to three seconds for the `index`-th event connection.
    pub async fn wait_for_conn(&self, index: usize) -> Arc<EventServerConn> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
        loop {
            if let Some(conn) = self.conns.lock().get(index) {
                return Arc::clone(conn);
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "event connection {index} never arrived"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

async fn serve_stream(
    stream: TcpStream,
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
    conns: Arc<Mutex<Vec<Arc<EventServerConn>>>>,
    accepted: Arc<AtomicUsize>,
    reject_ws: Arc<AtomicBool>,
    responder: Responder,
) {
    // peek (without consuming) until the request head is buffered, so the
    // stream can be routed to hyper or to the websocket acceptor intact
    let mut head = [0u8; 1024];
    let mut peeked = 0;
    for _ in 0..100 {
        peeked = match stream.peek(&mut head).await {
            Ok(n) => n,
            Err(_) => return,
        };
        if head[..peeked].windows(4).any(|window| window == b"\r\n\r\n") || peeked == head.len() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    let head = String::from_utf8_lossy(&head[..peeked]);
    let is_event_upgrade = head.starts_with("GET") && head.contains("/sticky/firefly/events");

    if is_event_upgrade {
        if reject_ws.load(Ordering::SeqCst) {
            // drop the stream: the client sees a failed handshake
            return;
        }
        serve_event_connection(stream, conns, accepted).await;
    } else {
        let service = service_fn(move |req: Request<Incoming>| {
            let requests = Arc::clone(&requests);
            let responder = Arc::clone(&responder);
            async move { handle_http(req, requests, responder).await }
        });
        let _ = http1::Builder::new()
            .serve_connection(TokioIo::new(stream), service)
            .await;
    }
}

async fn handle_http(
    req: Request<Incoming>,
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
    responder: Responder,
) -> Result<Response<Full<Bytes>>, std::convert::Infallible> {
    let (parts, body) = req.into_parts();
    let body = body
        .collect()
        .await
        .map(|collected| collected.to_bytes())
        .unwrap_or_default();

    let captured = CapturedRequest {
        method: parts.method.to_string(),
        path: parts.uri.path().to_string(),
        query: parts.uri.query().map(str::to_string),
        headers: parts
            .headers
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_lowercase(),
                    value.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect(),
        body: String::from_utf8_lossy(&body).into_owned(),
    };

    let (status, response_body) = responder(&captured);
    requests.lock().push(captured);

    Ok(Response::builder()
        .status(status)
        .body(Full::new(Bytes::from(response_body)))
        .expect("response"))
}

async fn serve_event_connection(
    stream: TcpStream,
    conns: Arc<Mutex<Vec<Arc<EventServerConn>>>>,
    accepted: Arc<AtomicUsize>,
) {
    let captured: Arc<Mutex<Option<(String, HashMap<String, String>)>>> =
        Arc::new(Mutex::new(None));
    let capture = Arc::clone(&captured);
    let callback = move |req: &WsRequest, resp: WsResponse| {
        let headers = req
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_lowercase(),
                    value.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect();
        *capture.lock() = Some((req.uri().to_string(), headers));
        Ok(resp)
    };

    let ws = match tokio_tungstenite::accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(_) => return,
    };
    let (path, headers) = captured.lock().take().unwrap_or_default();

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let (closed_tx, closed_rx) = watch::channel(false);
    conns.lock().push(Arc::new(EventServerConn {
        tx,
        closed: closed_rx,
        headers,
        path,
    }));
    accepted.fetch_add(1, Ordering::SeqCst);

    let (mut write, mut read) = ws.split();
    loop {
        tokio::select! {
            outbound = rx.recv() => match outbound {
                Some(message) => {
                    if write.send(message).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            inbound = read.next() => match inbound {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(Message::Ping(payload))) => {
                    let _ = write.send(Message::Pong(payload)).await;
                }
                Some(Ok(_)) => {}
                Some(Err(_)) => break,
            },
        }
    }
    let _ = closed_tx.send(true);
}

/// Decode an `application/x-www-form-urlencoded` body.
pub fn form_fields(body: &str) -> HashMap<String, String> {
    url::form_urlencoded::parse(body.as_bytes())
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect()
}

/// Health check passes; every pushed action is echoed back as
/// `[{"success": true, "echo": <payload>}]`.
pub fn echo_responder() -> Responder {
    Arc::new(|req| {
        if req.path.ends_with("/healthz") {
            return (200, "ok".to_string());
        }
        if req.path.ends_with("/sticky/CmdSrv") {
            let payload = form_fields(&req.body)
                .get("action")
                .and_then(|action| serde_json::from_str::<Value>(action).ok())
                .and_then(|action| action.get("payload").cloned())
                .unwrap_or(Value::Null);
            return (200, json!([{"success": true, "echo": payload}]).to_string());
        }
        (404, "not found".to_string())
    })
}

/// Health check passes; every command answers `[{"success": true}]`.
pub fn ok_responder() -> Responder {
    Arc::new(|req| {
        if req.path.ends_with("/healthz") {
            return (200, "ok".to_string());
        }
        (200, json!([{"success": true}]).to_string())
    })
}

/// Poll `condition` until it holds or three seconds pass.
pub async fn wait_until(condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
