//! # firefly-client
//!
//! Remote-control client for the Firefly visualization server (tables,
//! FITS/HiPS image viewers, charts). Commands travel as structured actions
//! over HTTP; server events arrive over a persistent WebSocket shared by
//! every client handle on the same (channel, location) pair and fan out to
//! registered listeners.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use firefly_client::{EventCallback, FireflyClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = FireflyClient::builder("http://localhost:8080/firefly")
//!         .channel("my-session")
//!         .build()
//!         .await?;
//!
//!     // upload a file and show it
//!     let token = client.upload_file("image.fits").await?;
//!     client
//!         .show_fits(Some(&token), Some("plot-1"), None, Default::default())
//!         .await?;
//!
//!     // react to viewer events
//!     let on_point: EventCallback = Arc::new(|event| {
//!         println!("point selected: {}", event.data);
//!     });
//!     client.add_listener(&on_point, "POINT").await?;
//!     client.wait_for_events().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────┐   dispatch (HTTP POST)   ┌──────────────┐
//! │ FireflyClient │─────────────────────────▶│              │
//! │   (Clone)     │                          │    Server    │
//! └──────┬────────┘                          │              │
//!        │ add_listener                      └──────┬───────┘
//!        ▼                                          │ events (WebSocket)
//! ┌────────────────────┐    one per (channel,      ▼
//! │ ConnectionRegistry │──▶ location) pair ──▶ EventChannel ──▶ listeners
//! └────────────────────┘                      (receive loop)
//! ```
//!
//! Handles sharing a channel and location multiplex over exactly one
//! connection; at most [`MAX_CHANNELS`] channels may be open per registry.
//!
//! ## Module Structure
//!
//! - `action`: action names, the wire envelope, result records
//! - `client`: the user-facing handle, uploads, payload builders
//! - `dispatch`: HTTP command dispatch and response parsing
//! - `env`: environment-derived construction defaults
//! - `error`: the error taxonomy
//! - `events`: the event channel, listener table, and registry
//! - `location`: server location parsing and endpoint derivation
//! - `session`: routing-header state

pub mod action;
mod client;
mod dispatch;
pub mod env;
pub mod error;
pub mod events;
mod location;
mod session;

pub use action::{gen_item_id, Action, ActionType, ItemKind, ResultRecord};
pub use client::{FireflyClient, FireflyClientBuilder, LayoutElement, PanCoord, UploadType};
pub use error::{Error, Result};
pub use events::{
    ChannelKey, ChannelOptions, ConnectionRegistry, EventCallback, HeaderCallback, ServerEvent,
    ALL_EVENTS, CONNECTION_ESTABLISHED, MAX_CHANNELS,
};
pub use location::ServerLocation;
pub use session::{SessionHeaders, CHANNEL_HEADER, CONN_ID_HEADER};
