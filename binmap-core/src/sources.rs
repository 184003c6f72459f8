//! The pair of remote collection ports feeding the map.

use std::sync::Arc;
use std::time::Duration;

use crate::fetch::{FetchOutcome, fetch_or_empty};
use crate::model::EntityKind;
use crate::ports::CollectionPort;

/// Ports serving the centers and bins collections.
#[derive(Clone)]
pub struct MapSources {
    /// Source of collection centers.
    pub centers: Arc<dyn CollectionPort>,
    /// Source of bins.
    pub bins: Arc<dyn CollectionPort>,
}

impl MapSources {
    /// Bundle the two ports.
    #[must_use]
    pub fn new(centers: Arc<dyn CollectionPort>, bins: Arc<dyn CollectionPort>) -> Self {
        Self { centers, bins }
    }

    /// Port serving `kind`.
    #[must_use]
    pub fn port(&self, kind: EntityKind) -> &Arc<dyn CollectionPort> {
        match kind {
            EntityKind::Center => &self.centers,
            EntityKind::Bin => &self.bins,
        }
    }

    /// Fetch the raw records of `kind`; failures yield an empty collection.
    pub async fn fetch(&self, kind: EntityKind, timeout: Duration) -> FetchOutcome {
        fetch_or_empty(self.port(kind).as_ref(), timeout).await
    }
}
