//! # Event Emitter
//!
//! Best-effort delivery of pipeline events to the client's data channel.
//! The emitter never blocks a processor: serialization is synchronous, the
//! channel send is non-blocking, and every failure mode degrades to
//! dropping the event.
//!
//! ## Gating:
//! The channel arrives some time after the session exists (the peer opens
//! it asynchronously), so the emitter starts unattached and drops events
//! until `attach` is called. Events emitted while the channel is not open
//! are dropped silently at debug log level; send failures are logged and
//! reported to the caller but never propagate.

use crate::events::ServerEvent;
use crate::rtc::{ChannelState, DataChannel};
use std::sync::{Arc, RwLock};
use tracing::{debug, error};

/// Serializes events and forwards them to the attached data channel.
pub struct EventEmitter {
    channel: RwLock<Option<Arc<dyn DataChannel>>>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self {
            channel: RwLock::new(None),
        }
    }

    /// Attach the peer's data channel once it opens.
    pub fn attach(&self, channel: Arc<dyn DataChannel>) {
        *self.channel.write().unwrap() = Some(channel);
    }

    pub fn is_attached(&self) -> bool {
        self.channel.read().unwrap().is_some()
    }

    /// Emit one event. Returns whether it was handed to the channel.
    pub fn emit(&self, event: &ServerEvent) -> bool {
        let payload = match serde_json::to_string(event) {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, "failed to serialize event");
                return false;
            }
        };

        let guard = self.channel.read().unwrap();
        let Some(channel) = guard.as_ref() else {
            debug!("no data channel attached; dropping event");
            return false;
        };

        if channel.ready_state() != ChannelState::Open {
            debug!(state = ?channel.ready_state(), "data channel not open; dropping event");
            return false;
        }

        match channel.send_text(&payload) {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "data channel send failed");
                false
            }
        }
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new()
    }
}
