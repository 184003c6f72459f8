//! Message bridge to the rendering surface.
//!
//! The surface initializes on its own and is only reachable through serialized
//! JSON messages. Outbound messages posted before it signals readiness are
//! kept, one per message type, and flushed in order once it is ready.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::watch;

use crate::model::{Bin, CollectionCenter, UserLocation};
use crate::ports::{SurfaceError, SurfaceTransport};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
/// Messages sent to the rendering surface.
pub enum OutboundMessage {
    /// Replace the displayed collection centers.
    CollectCenters {
        /// Validated centers.
        centers: Vec<CollectionCenter>,
    },
    /// Replace the displayed bins.
    Bins {
        /// Validated bins.
        bins: Vec<Bin>,
    },
    /// Move the user marker.
    UserLocation(UserLocation),
    /// Show or hide the centers layer.
    ToggleCenters {
        /// Whether the layer is visible.
        show: bool,
    },
    /// Show or hide the bins layer.
    ToggleBins {
        /// Whether the layer is visible.
        show: bool,
    },
}

impl OutboundMessage {
    /// Wire discriminator of the message.
    #[must_use]
    pub fn message_type(&self) -> &'static str {
        match self {
            OutboundMessage::CollectCenters { .. } => "collect_centers",
            OutboundMessage::Bins { .. } => "bins",
            OutboundMessage::UserLocation(_) => "user_location",
            OutboundMessage::ToggleCenters { .. } => "toggle_centers",
            OutboundMessage::ToggleBins { .. } => "toggle_bins",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
/// Messages received from the rendering surface.
pub enum InboundMessage {
    /// The surface script is running and accepts data.
    WebReady,
    /// The map widget finished initializing.
    MapReady,
    /// Any other, well-formed message.
    #[serde(other)]
    Unknown,
}

/// What made the surface ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadySignal {
    /// The embed fired its load-complete lifecycle event.
    LoadEnd,
    /// The surface posted `web_ready`.
    WebReady,
}

#[derive(Debug)]
struct Pending {
    message_type: String,
    encoded: String,
}

#[derive(Debug, Default)]
struct BridgeState {
    ready: bool,
    pending: Vec<Pending>,
}

/// Two-way link between the data layer and the rendering surface.
pub struct SurfaceBridge {
    transport: Arc<dyn SurfaceTransport>,
    state: Mutex<BridgeState>,
    ready: watch::Sender<bool>,
}

impl SurfaceBridge {
    /// Create a bridge posting through `transport`; the surface starts unready.
    #[must_use]
    pub fn new(transport: Arc<dyn SurfaceTransport>) -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            transport,
            state: Mutex::new(BridgeState::default()),
            ready,
        }
    }

    fn state(&self) -> MutexGuard<'_, BridgeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether the surface has signalled readiness.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state().ready
    }

    /// Number of messages waiting for readiness.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.state().pending.len()
    }

    /// Receiver observing the readiness flag.
    #[must_use]
    pub fn subscribe_ready(&self) -> watch::Receiver<bool> {
        self.ready.subscribe()
    }

    /// Resolve once the surface is ready.
    pub async fn wait_ready(&self) {
        let mut ready = self.subscribe_ready();
        if ready.wait_for(|is_ready| *is_ready).await.is_err() {
            tracing::debug!("readiness channel closed");
        }
    }

    /// Send a typed message.
    pub fn send(&self, message: &OutboundMessage) {
        match serde_json::to_value(message) {
            Ok(Value::Object(fields)) => self.post(message.message_type(), fields),
            Ok(other) => tracing::warn!(%other, "outbound message is not an object"),
            Err(err) => tracing::warn!(%err, "failed to encode outbound message"),
        }
    }

    /// Send `{type: message_type, ...payload}`.
    ///
    /// Fields of a non-object payload are ignored.
    pub fn send_to_surface(&self, message_type: &str, payload: Value) {
        let mut fields = match payload {
            Value::Object(fields) => fields,
            Value::Null => Map::new(),
            other => {
                tracing::debug!(message_type, %other, "dropping non-object payload");
                Map::new()
            }
        };
        fields.insert("type".to_owned(), Value::String(message_type.to_owned()));
        self.post(message_type, fields);
    }

    /// Forward a new user position.
    pub fn send_user_location(&self, location: UserLocation) {
        self.send(&OutboundMessage::UserLocation(location));
    }

    /// Forward the centers layer visibility.
    pub fn toggle_centers(&self, show: bool) {
        self.send(&OutboundMessage::ToggleCenters { show });
    }

    /// Forward the bins layer visibility.
    pub fn toggle_bins(&self, show: bool) {
        self.send(&OutboundMessage::ToggleBins { show });
    }

    fn post(&self, message_type: &str, fields: Map<String, Value>) {
        let encoded = Value::Object(fields).to_string();
        let mut state = self.state();

        if state.ready {
            self.transmit(message_type, encoded);
            return;
        }

        // Latest message of each type wins while the surface is loading.
        if let Some(slot) = state
            .pending
            .iter_mut()
            .find(|pending| pending.message_type == message_type)
        {
            slot.encoded = encoded;
        } else {
            state.pending.push(Pending {
                message_type: message_type.to_owned(),
                encoded,
            });
        }
        tracing::trace!(message_type, "surface not ready, message buffered");
    }

    fn transmit(&self, message_type: &str, encoded: String) {
        match self.transport.post_message(encoded) {
            Ok(()) => tracing::trace!(message_type, "message posted to surface"),
            Err(SurfaceError::Closed) => {
                tracing::warn!(message_type, "surface closed, message dropped");
            }
        }
    }

    /// Mark the surface ready and flush buffered messages.
    ///
    /// Returns `true` only for the first signal; later signals change nothing.
    pub fn mark_ready(&self, signal: ReadySignal) -> bool {
        let mut state = self.state();
        if state.ready {
            tracing::trace!(?signal, "surface already ready");
            return false;
        }
        state.ready = true;

        let pending = std::mem::take(&mut state.pending);
        tracing::info!(?signal, flushed = pending.len(), "rendering surface ready");
        for message in pending {
            self.transmit(&message.message_type, message.encoded);
        }
        drop(state);

        self.ready.send_replace(true);
        true
    }

    /// Lifecycle hook for the embed's load-complete event.
    pub fn on_load_end(&self) -> bool {
        self.mark_ready(ReadySignal::LoadEnd)
    }

    /// Parse and apply one message from the surface.
    ///
    /// Malformed messages are logged and ignored.
    pub fn handle_inbound(&self, raw: &str) -> Option<InboundMessage> {
        let message = match serde_json::from_str::<InboundMessage>(raw) {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!(%err, "ignoring malformed surface message");
                return None;
            }
        };

        match message {
            InboundMessage::WebReady => {
                self.mark_ready(ReadySignal::WebReady);
            }
            InboundMessage::MapReady => tracing::info!("map widget initialized"),
            InboundMessage::Unknown => tracing::debug!(raw, "unhandled surface message"),
        }
        Some(message)
    }
}
