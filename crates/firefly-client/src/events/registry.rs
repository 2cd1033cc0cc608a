//! Process-wide table of open event channels.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{Error, Result};
use crate::session::SessionHeaders;

use super::channel::{ChannelKey, ChannelOptions, EventChannel};
use super::listener::EventCallback;

/// Most simultaneously open event channels per registry. Exceeding the bound
/// is a hard error, never a silent eviction.
pub const MAX_CHANNELS: usize = 3;

/// Maps (channel, location) to at most one live event channel and enforces
/// the open-channel bound. Ordinary use goes through [`ConnectionRegistry::
/// global`]; tests construct isolated registries so they can run in
/// parallel.
///
/// All mutation happens under one async mutex, held across the connect await
/// so concurrent listener registrations for the same key cannot race into
/// two connections. The receive loops never take this lock.
pub struct ConnectionRegistry {
    max_channels: usize,
    connections: Mutex<HashMap<ChannelKey, Arc<EventChannel>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::with_capacity(MAX_CHANNELS)
    }

    /// A registry with a non-default channel bound.
    pub fn with_capacity(max_channels: usize) -> Self {
        Self {
            max_channels,
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// The process-wide default registry.
    pub fn global() -> &'static Arc<ConnectionRegistry> {
        static GLOBAL: OnceLock<Arc<ConnectionRegistry>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(ConnectionRegistry::new()))
    }

    /// Return the live channel for `key`, opening one if absent. Opening a
    /// channel beyond the bound fails with [`Error::ResourceExhausted`].
    pub(crate) async fn open_or_get(
        &self,
        key: &ChannelKey,
        options: &ChannelOptions,
    ) -> Result<Arc<EventChannel>> {
        let mut connections = self.connections.lock().await;
        if let Some(existing) = connections.get(key) {
            return Ok(Arc::clone(existing));
        }
        if connections.len() >= self.max_channels {
            return Err(Error::resource_exhausted(self.max_channels));
        }
        let channel = EventChannel::connect(key.clone(), options.clone()).await?;
        debug!(key = %key, "opened event channel");
        connections.insert(key.clone(), Arc::clone(&channel));
        Ok(channel)
    }

    /// Register a callback for `name` on the channel for `key`, opening the
    /// channel on first use.
    pub async fn add_listener(
        &self,
        key: &ChannelKey,
        options: &ChannelOptions,
        callback: &EventCallback,
        name: &str,
    ) -> Result<()> {
        let channel = self.open_or_get(key, options).await?;
        channel.add_listener(callback, name);
        Ok(())
    }

    /// Remove a callback/name registration. When the channel's last
    /// registration goes away the connection is torn down and the record
    /// dropped; a later `add_listener` opens a brand-new connection. No-op
    /// for unknown keys.
    pub async fn remove_listener(&self, key: &ChannelKey, callback: &EventCallback, name: &str) {
        let mut connections = self.connections.lock().await;
        if let Some(channel) = connections.get(key) {
            channel.remove_listener(callback, name);
            if channel.listener_count() == 0 {
                debug!(key = %key, "last listener removed, closing event channel");
                channel.disconnect();
                connections.remove(key);
            }
        }
    }

    /// Unconditionally tear down the channel for `key`. Idempotent.
    pub async fn close(&self, key: &ChannelKey) {
        if let Some(channel) = self.connections.lock().await.remove(key) {
            debug!(key = %key, "closing event channel");
            channel.disconnect();
        }
    }

    /// Block until the channel's receive loop exits, for any cause. Returns
    /// immediately when no channel is open for `key`.
    pub async fn wait_forever(&self, key: &ChannelKey) {
        let ended = {
            let connections = self.connections.lock().await;
            connections.get(key).map(|channel| channel.ended())
        };
        let Some(mut ended) = ended else { return };
        while !*ended.borrow() {
            if ended.changed().await.is_err() {
                break;
            }
        }
    }

    /// Snapshot of the session routing headers for `key`, if a channel is
    /// open. Every client handle sharing the key reads this on each outgoing
    /// request.
    pub async fn session_headers(&self, key: &ChannelKey) -> Option<SessionHeaders> {
        let connections = self.connections.lock().await;
        connections.get(key).map(|channel| channel.session_snapshot())
    }

    /// Whether a live channel exists for `key`.
    pub async fn is_open(&self, key: &ChannelKey) -> bool {
        self.connections.lock().await.contains_key(key)
    }

    /// Number of live channels.
    pub async fn open_count(&self) -> usize {
        self.connections.lock().await.len()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
