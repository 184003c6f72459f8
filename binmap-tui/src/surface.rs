use std::sync::{Arc, Mutex, PoisonError};

use binmap_core::{
    Bin, CollectionCenter, OutboundMessage, SurfaceBridge, SurfaceError, SurfaceTransport,
    UserLocation,
};
use tokio::sync::mpsc;

/// Transport posting serialized messages into the surface task.
pub(crate) struct ChannelTransport {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelTransport {
    pub(crate) fn new(tx: mpsc::UnboundedSender<String>) -> Self {
        Self { tx }
    }
}

impl SurfaceTransport for ChannelTransport {
    fn post_message(&self, message: String) -> Result<(), SurfaceError> {
        self.tx.send(message).map_err(|_| SurfaceError::Closed)
    }
}

/// What the rendering surface currently shows.
#[derive(Debug, Clone)]
pub(crate) struct SurfaceView {
    pub centers: Vec<CollectionCenter>,
    pub bins: Vec<Bin>,
    pub user_location: Option<UserLocation>,
    pub show_centers: bool,
    pub show_bins: bool,
    pub received: usize,
}

impl Default for SurfaceView {
    fn default() -> Self {
        Self {
            centers: Vec::new(),
            bins: Vec::new(),
            user_location: None,
            show_centers: true,
            show_bins: true,
            received: 0,
        }
    }
}

impl SurfaceView {
    /// Apply one serialized message; returns whether it was understood.
    pub(crate) fn apply(&mut self, raw: &str) -> bool {
        let message = match serde_json::from_str::<OutboundMessage>(raw) {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!(%err, "surface ignored message");
                return false;
            }
        };

        match message {
            OutboundMessage::CollectCenters { centers } => self.centers = centers,
            OutboundMessage::Bins { bins } => self.bins = bins,
            OutboundMessage::UserLocation(location) => self.user_location = Some(location),
            OutboundMessage::ToggleCenters { show } => self.show_centers = show,
            OutboundMessage::ToggleBins { show } => self.show_bins = show,
        }
        self.received += 1;
        true
    }

    /// Centers on display.
    pub(crate) fn visible_centers(&self) -> &[CollectionCenter] {
        if self.show_centers { &self.centers } else { &[] }
    }

    /// Bins on display.
    pub(crate) fn visible_bins(&self) -> &[Bin] {
        if self.show_bins { &self.bins } else { &[] }
    }
}

/// Shared handle the UI reads the surface through.
#[derive(Clone, Default)]
pub(crate) struct SharedView(Arc<Mutex<SurfaceView>>);

impl SharedView {
    pub(crate) fn snapshot(&self) -> SurfaceView {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn apply(&self, raw: &str) -> bool {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .apply(raw)
    }
}

/// Announce readiness to `bridge`, then apply messages until every sender is gone.
pub(crate) async fn run(
    mut inbox: mpsc::UnboundedReceiver<String>,
    view: SharedView,
    bridge: Arc<SurfaceBridge>,
) {
    bridge.handle_inbound(r#"{"type":"map_ready"}"#);
    bridge.handle_inbound(r#"{"type":"web_ready"}"#);
    drop(bridge);

    while let Some(raw) = inbox.recv().await {
        view.apply(&raw);
    }
    tracing::debug!("surface inbox closed");
}
