//! Event-channel management: one shared persistent connection per
//! (channel, location) pair, a bounded process-wide registry, and listener
//! fan-out.
//!
//! The pieces:
//!
//! - `listener`: callback registrations and the matching rules
//! - `channel`: the connection itself plus its background receive loop
//! - `registry`: the bounded table sharing channels across client handles

mod channel;
mod listener;
mod registry;

pub use channel::{ChannelKey, ChannelOptions, HeaderCallback, CONNECTION_ESTABLISHED};
pub use listener::{EventCallback, ServerEvent, ALL_EVENTS};
pub use registry::{ConnectionRegistry, MAX_CHANNELS};
