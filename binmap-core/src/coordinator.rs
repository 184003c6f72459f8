//! Map-data coordinator: loads, merges and publishes centers and bins.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::watch;

use crate::bridge::{OutboundMessage, SurfaceBridge};
use crate::config::CoordinatorOptions;
use crate::fetch::FetchOutcome;
use crate::filter::{self, SearchResults};
use crate::geo::{self, NearbyCenter};
use crate::model::{Bin, CollectionCenter, EntityKind, Located, MapStats, UserLocation};
use crate::normalize::{Canonical, Normalized, normalize_records};
use crate::sources::MapSources;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
/// Errors surfaced to the user-visible error state.
pub enum MapDataError {
    /// Both collections are empty after validation.
    #[error("No data available")]
    NoDataAvailable,
    /// A load failed outside the fetch boundary and nothing is on the map.
    #[error("Load failed: {0}")]
    LoadFailed(String),
}

/// Lifecycle of the coordinator's data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPhase {
    /// Nothing requested yet.
    Idle,
    /// At least one load is in flight.
    Loading,
    /// The last load finished with data.
    Ready,
    /// The last load finished and [`MapState::error`] is set.
    Error,
}

/// Snapshot of everything the coordinator owns.
#[derive(Debug, Clone, PartialEq)]
pub struct MapState {
    /// Current lifecycle phase.
    pub phase: LoadPhase,
    /// Validated collection centers.
    pub centers: Vec<CollectionCenter>,
    /// Validated bins.
    pub bins: Vec<Bin>,
    /// Counts derived from `centers` and `bins`.
    pub stats: MapStats,
    /// User-visible error, if any.
    pub error: Option<MapDataError>,
    /// When a load last committed.
    pub loaded_at: Option<DateTime<Utc>>,
    in_flight: usize,
}

impl MapState {
    fn new(phase: LoadPhase) -> Self {
        Self {
            phase,
            centers: Vec::new(),
            bins: Vec::new(),
            stats: MapStats::default(),
            error: None,
            loaded_at: None,
            in_flight: 0,
        }
    }

    /// Whether a load is in flight.
    #[must_use]
    pub fn loading(&self) -> bool {
        self.phase == LoadPhase::Loading
    }

    // Errors only surface while nothing is on the map.
    fn refresh_error(&mut self, failure: Option<MapDataError>) {
        self.error = if self.centers.is_empty() && self.bins.is_empty() {
            Some(failure.unwrap_or(MapDataError::NoDataAvailable))
        } else {
            None
        };
    }
}

/// Marks a load in flight for as long as it lives.
///
/// Dropping the last guard leaves the loading phase, also when the load
/// future is cancelled.
struct LoadGuard<'state> {
    state: &'state watch::Sender<MapState>,
}

impl<'state> LoadGuard<'state> {
    fn begin(state: &'state watch::Sender<MapState>, clear_error: bool) -> Self {
        state.send_modify(|state| {
            state.in_flight += 1;
            state.phase = LoadPhase::Loading;
            if clear_error {
                state.error = None;
            }
        });
        Self { state }
    }
}

impl Drop for LoadGuard<'_> {
    fn drop(&mut self) {
        self.state.send_modify(|state| {
            state.in_flight = state.in_flight.saturating_sub(1);
            if state.in_flight == 0 {
                state.phase = if state.error.is_some() {
                    LoadPhase::Error
                } else {
                    LoadPhase::Ready
                };
            }
        });
    }
}

/// Owner of the map collections and their loading state.
pub struct MapDataCoordinator {
    sources: MapSources,
    options: CoordinatorOptions,
    state: watch::Sender<MapState>,
    centers_generation: AtomicU64,
    bins_generation: AtomicU64,
    surface: Option<Arc<SurfaceBridge>>,
}

impl MapDataCoordinator {
    /// Create a coordinator; it starts `Loading` when auto-load is on, `Idle` otherwise.
    #[must_use]
    pub fn new(sources: MapSources, options: CoordinatorOptions) -> Self {
        let phase = if options.auto_load {
            LoadPhase::Loading
        } else {
            LoadPhase::Idle
        };
        let (state, _) = watch::channel(MapState::new(phase));
        Self {
            sources,
            options,
            state,
            centers_generation: AtomicU64::new(0),
            bins_generation: AtomicU64::new(0),
            surface: None,
        }
    }

    /// Publish every committed collection to `surface`.
    #[must_use]
    pub fn with_surface(mut self, surface: Arc<SurfaceBridge>) -> Self {
        self.surface = Some(surface);
        self
    }

    /// Copy of the current state.
    #[must_use]
    pub fn state(&self) -> MapState {
        self.state.borrow().clone()
    }

    /// Receiver notified on every state transition.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<MapState> {
        self.state.subscribe()
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> MapStats {
        self.state.borrow().stats.clone()
    }

    /// Whether a load is in flight.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.state.borrow().loading()
    }

    /// Wait for the rendering surface, then load (or replay when auto-load is off).
    pub async fn load_when_ready(&self) {
        if let Some(surface) = &self.surface {
            surface.wait_ready().await;
        }
        if self.options.auto_load {
            self.load_all().await;
        } else {
            self.republish();
        }
    }

    /// Fetch both collections concurrently and commit them together.
    ///
    /// A failed source contributes an empty collection; the error state is set
    /// only when both collections end up empty.
    pub async fn load_all(&self) {
        let centers_generation = self.centers_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let bins_generation = self.bins_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = LoadGuard::begin(&self.state, true);
        tracing::info!("loading centers and bins");

        let (centers, bins) = tokio::join!(
            self.fetch_settled(EntityKind::Center),
            self.fetch_settled(EntityKind::Bin)
        );

        let mut failure = None;
        let raw_centers = records_or_failure(centers, &mut failure);
        let raw_bins = records_or_failure(bins, &mut failure);
        let centers = admit::<CollectionCenter>(&raw_centers);
        let bins = admit::<Bin>(&raw_bins);

        self.state.send_modify(|state| {
            let centers_current = self.centers_generation.load(Ordering::SeqCst) == centers_generation;
            let bins_current = self.bins_generation.load(Ordering::SeqCst) == bins_generation;
            if !centers_current && !bins_current {
                tracing::debug!("discarding superseded load");
                return;
            }

            if centers_current {
                state.centers = centers;
                self.publish(OutboundMessage::CollectCenters {
                    centers: state.centers.clone(),
                });
            }
            if bins_current {
                state.bins = bins;
                self.publish(OutboundMessage::Bins {
                    bins: state.bins.clone(),
                });
            }
            state.stats = MapStats::compute(&state.centers, &state.bins);
            state.refresh_error(failure);
            state.loaded_at = Some(Utc::now());

            tracing::info!(
                centers = state.stats.centers_count,
                bins = state.stats.bins_count,
                "map data loaded"
            );
        });
    }

    /// Reload both collections.
    pub async fn refresh(&self) {
        self.load_all().await;
    }

    /// Reload only the centers, keeping the bins and their counts.
    ///
    /// When the fetch fails the previous centers stay in place.
    pub async fn load_centers(&self) {
        let generation = self.centers_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = LoadGuard::begin(&self.state, false);

        let raw = match self.fetch_settled(EntityKind::Center).await {
            Ok(outcome) if outcome.succeeded() => outcome.records,
            Ok(_) => return,
            Err(err) => {
                self.state.send_modify(|state| state.refresh_error(Some(err)));
                return;
            }
        };
        let centers = admit::<CollectionCenter>(&raw);

        self.state.send_modify(|state| {
            if self.centers_generation.load(Ordering::SeqCst) != generation {
                tracing::debug!("discarding superseded centers load");
                return;
            }
            state.centers = centers;
            state.stats = state.stats.clone().with_centers(&state.centers);
            state.refresh_error(None);
            state.loaded_at = Some(Utc::now());
            self.publish(OutboundMessage::CollectCenters {
                centers: state.centers.clone(),
            });
        });
    }

    /// Reload only the bins, keeping the centers and their counts.
    ///
    /// When the fetch fails the previous bins stay in place.
    pub async fn load_bins(&self) {
        let generation = self.bins_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = LoadGuard::begin(&self.state, false);

        let raw = match self.fetch_settled(EntityKind::Bin).await {
            Ok(outcome) if outcome.succeeded() => outcome.records,
            Ok(_) => return,
            Err(err) => {
                self.state.send_modify(|state| state.refresh_error(Some(err)));
                return;
            }
        };
        let bins = admit::<Bin>(&raw);

        self.state.send_modify(|state| {
            if self.bins_generation.load(Ordering::SeqCst) != generation {
                tracing::debug!("discarding superseded bins load");
                return;
            }
            state.bins = bins;
            state.stats = state.stats.clone().with_bins(&state.bins);
            state.refresh_error(None);
            state.loaded_at = Some(Utc::now());
            self.publish(OutboundMessage::Bins {
                bins: state.bins.clone(),
            });
        });
    }

    /// Send the current collections to the surface again.
    pub fn republish(&self) {
        let state = self.state.borrow();
        self.publish(OutboundMessage::CollectCenters {
            centers: state.centers.clone(),
        });
        self.publish(OutboundMessage::Bins {
            bins: state.bins.clone(),
        });
    }

    /// Bins whose category contains `category`; all bins when it is empty.
    #[must_use]
    pub fn filter_bins_by_type(&self, category: Option<&str>) -> Vec<Bin> {
        filter::bins_by_type(&self.state.borrow().bins, category)
    }

    /// Centers accepting `category`; all centers when it is empty.
    #[must_use]
    pub fn filter_centers_by_type(&self, category: Option<&str>) -> Vec<CollectionCenter> {
        filter::centers_by_type(&self.state.borrow().centers, category)
    }

    /// Search both collections; a blank query returns them unfiltered.
    #[must_use]
    pub fn search_all(&self, query: &str) -> SearchResults {
        let state = self.state.borrow();
        filter::search(&state.centers, &state.bins, query)
    }

    /// The `limit` loaded centers closest to `location`.
    #[must_use]
    pub fn nearest_centers(&self, location: UserLocation, limit: usize) -> Vec<NearbyCenter> {
        geo::nearest_centers(&self.state.borrow().centers, location, limit)
    }

    fn publish(&self, message: OutboundMessage) {
        if let Some(surface) = &self.surface {
            surface.send(&message);
        }
    }

    async fn fetch_settled(&self, kind: EntityKind) -> Result<FetchOutcome, MapDataError> {
        let sources = self.sources.clone();
        let timeout = self.options.fetch_timeout;

        tokio::spawn(async move { sources.fetch(kind, timeout).await })
            .await
            .map_err(|err| {
                tracing::error!(%kind, %err, "fetch task failed");
                MapDataError::LoadFailed(format!("{kind} fetch aborted: {err}"))
            })
    }
}

fn records_or_failure(
    settled: Result<FetchOutcome, MapDataError>,
    failure: &mut Option<MapDataError>,
) -> Value {
    match settled {
        Ok(outcome) => outcome.records,
        Err(err) => {
            if failure.is_none() {
                *failure = Some(err);
            }
            Value::Null
        }
    }
}

/// Normalize, re-validate and de-duplicate a raw collection.
fn admit<T: Canonical + Located>(raw: &Value) -> Vec<T> {
    let Normalized { items, dropped } = normalize_records::<T>(raw);
    let received = items.len() + dropped;

    let mut seen = HashSet::new();
    let mut duplicates = 0_usize;
    let admitted: Vec<T> = items
        .into_iter()
        .filter(|item| item.point().is_valid())
        .filter(|item| {
            let first = seen.insert(item.id().clone());
            if !first {
                duplicates += 1;
            }
            first
        })
        .collect();

    if dropped > 0 || duplicates > 0 {
        tracing::info!(
            kind = %T::KIND,
            received,
            valid = admitted.len(),
            dropped,
            duplicates,
            "records left out of the map"
        );
    }
    admitted
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::bridge::tests::RecordingTransport;
    use crate::ports::{CollectionPort, FetchError, SurfaceTransport};

    type Response = (Duration, Result<Value, FetchError>);

    struct ScriptedPort {
        kind: EntityKind,
        responses: Mutex<VecDeque<Response>>,
        calls: AtomicUsize,
    }

    impl ScriptedPort {
        fn new(kind: EntityKind, responses: Vec<Response>) -> Arc<Self> {
            Arc::new(Self {
                kind,
                responses: Mutex::new(responses.into()),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl CollectionPort for ScriptedPort {
        fn kind(&self) -> EntityKind {
            self.kind
        }

        async fn fetch(&self) -> Result<Value, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.responses.lock().expect("responses lock").pop_front();
            let (delay, result) = next.unwrap_or((Duration::ZERO, Ok(json!([]))));
            tokio::time::sleep(delay).await;
            result
        }
    }

    struct PanickingPort;

    #[async_trait]
    impl CollectionPort for PanickingPort {
        fn kind(&self) -> EntityKind {
            EntityKind::Center
        }

        async fn fetch(&self) -> Result<Value, FetchError> {
            panic!("backend client bug");
        }
    }

    fn now(result: Result<Value, FetchError>) -> Response {
        (Duration::ZERO, result)
    }

    fn coordinator(centers: Vec<Response>, bins: Vec<Response>) -> MapDataCoordinator {
        MapDataCoordinator::new(
            MapSources::new(
                ScriptedPort::new(EntityKind::Center, centers),
                ScriptedPort::new(EntityKind::Bin, bins),
            ),
            CoordinatorOptions::default(),
        )
    }

    fn center_a() -> Value {
        json!([{"id": "c1", "name": "Center A", "latitude": 48.85, "longitude": 2.35}])
    }

    fn bin_b1() -> Value {
        json!([{"id": "b1", "latitude": 48.86, "longitude": 2.36, "garbageType": "glass"}])
    }

    fn ids<T: Located>(items: &[T]) -> Vec<&str> {
        items.iter().map(|item| item.id().0.as_str()).collect()
    }

    #[tokio::test]
    async fn load_all_merges_both_sources_into_stats() {
        let coordinator = coordinator(vec![now(Ok(center_a()))], vec![now(Ok(bin_b1()))]);
        coordinator.load_all().await;

        let state = coordinator.state();
        assert_eq!(state.phase, LoadPhase::Ready);
        assert_eq!(state.error, None);
        assert_eq!(state.stats.centers_count, 1);
        assert_eq!(state.stats.bins_count, 1);
        assert_eq!(state.stats.total_points, 2);
        assert!(state.loaded_at.is_some());
    }

    #[tokio::test]
    async fn failing_centers_do_not_hide_bins() {
        let coordinator = coordinator(
            vec![now(Err(FetchError::NetworkUnreachable("refused".to_owned())))],
            vec![now(Ok(bin_b1()))],
        );
        coordinator.load_all().await;

        let state = coordinator.state();
        assert!(state.centers.is_empty());
        assert_eq!(ids(&state.bins), ["b1"]);
        assert_eq!(state.error, None);
        assert!(!state.loading());
    }

    #[tokio::test]
    async fn empty_sources_surface_no_data() {
        let coordinator = coordinator(
            vec![now(Ok(json!([])))],
            vec![now(Ok(json!([{"id": "bad", "latitude": 120, "longitude": 0}])))],
        );
        coordinator.load_all().await;

        let state = coordinator.state();
        assert_eq!(state.error, Some(MapDataError::NoDataAvailable));
        assert_eq!(state.phase, LoadPhase::Error);
        assert!(!coordinator.is_loading());
    }

    #[tokio::test]
    async fn a_crashed_fetch_is_reported_without_blocking_the_other_source() {
        let coordinator = MapDataCoordinator::new(
            MapSources::new(
                Arc::new(PanickingPort),
                ScriptedPort::new(EntityKind::Bin, vec![now(Ok(bin_b1()))]),
            ),
            CoordinatorOptions::default(),
        );
        coordinator.load_all().await;

        let state = coordinator.state();
        assert_eq!(ids(&state.bins), ["b1"]);
        assert_eq!(state.error, None);
        assert_eq!(state.phase, LoadPhase::Ready);

        coordinator.load_bins().await;
        let state = coordinator.state();
        assert_eq!(state.error, None);
        assert_eq!(state.phase, LoadPhase::Ready);
    }

    #[tokio::test]
    async fn a_crash_with_nothing_on_the_map_is_reported_until_data_arrives() {
        let coordinator = MapDataCoordinator::new(
            MapSources::new(
                Arc::new(PanickingPort),
                ScriptedPort::new(EntityKind::Bin, vec![now(Ok(json!([]))), now(Ok(bin_b1()))]),
            ),
            CoordinatorOptions::default(),
        );
        coordinator.load_all().await;

        let state = coordinator.state();
        assert!(matches!(state.error, Some(MapDataError::LoadFailed(_))));
        assert_eq!(state.phase, LoadPhase::Error);
        assert!(!state.loading());

        coordinator.load_bins().await;
        let state = coordinator.state();
        assert_eq!(ids(&state.bins), ["b1"]);
        assert_eq!(state.error, None);
        assert_eq!(state.phase, LoadPhase::Ready);
    }

    #[tokio::test]
    async fn initial_phase_follows_auto_load() {
        let auto = coordinator(Vec::new(), Vec::new());
        assert_eq!(auto.state().phase, LoadPhase::Loading);

        let manual = MapDataCoordinator::new(
            MapSources::new(
                ScriptedPort::new(EntityKind::Center, Vec::new()),
                ScriptedPort::new(EntityKind::Bin, Vec::new()),
            ),
            CoordinatorOptions {
                auto_load: false,
                ..CoordinatorOptions::default()
            },
        );
        assert_eq!(manual.state().phase, LoadPhase::Idle);
    }

    #[tokio::test]
    async fn partial_loads_keep_the_other_source_counts() {
        let two_centers = json!([
            {"id": "c1", "latitude": 1, "longitude": 1},
            {"id": "c2", "latitude": 2, "longitude": 2},
        ]);
        let coordinator = coordinator(
            vec![now(Ok(center_a())), now(Ok(two_centers))],
            vec![now(Ok(bin_b1()))],
        );
        coordinator.load_all().await;
        coordinator.load_centers().await;

        let stats = coordinator.stats();
        assert_eq!(stats.centers_count, 2);
        assert_eq!(stats.bins_count, 1);
        assert_eq!(stats.total_points, 3);
        assert!(stats.bins_stats.is_some());
    }

    #[tokio::test]
    async fn failed_partial_load_keeps_previous_collection() {
        let coordinator = coordinator(
            vec![now(Ok(center_a()))],
            vec![
                now(Ok(bin_b1())),
                now(Err(FetchError::ServerError {
                    status: 503,
                    body: String::new(),
                })),
            ],
        );
        coordinator.load_all().await;
        coordinator.load_bins().await;

        let state = coordinator.state();
        assert_eq!(ids(&state.bins), ["b1"]);
        assert_eq!(state.phase, LoadPhase::Ready);
    }

    #[tokio::test]
    async fn stale_completions_do_not_overwrite_newer_loads() {
        let old = json!([{"id": "old", "latitude": 1, "longitude": 1}]);
        let new = json!([{"id": "new", "latitude": 2, "longitude": 2}]);
        let coordinator = Arc::new(coordinator(
            vec![(Duration::from_millis(150), Ok(old)), now(Ok(new))],
            vec![now(Ok(bin_b1())), now(Ok(bin_b1()))],
        ));

        let slow = tokio::spawn({
            let coordinator = Arc::clone(&coordinator);
            async move { coordinator.load_all().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        coordinator.load_all().await;
        assert_eq!(ids(&coordinator.state().centers), ["new"]);
        assert!(coordinator.is_loading(), "slow load still in flight");

        slow.await.expect("slow load completes");
        let state = coordinator.state();
        assert_eq!(ids(&state.centers), ["new"]);
        assert_eq!(state.phase, LoadPhase::Ready);
    }

    #[tokio::test]
    async fn duplicate_identifiers_keep_the_first_record() {
        let centers = json!([
            {"id": "c1", "name": "First", "latitude": 1, "longitude": 1},
            {"id": "c1", "name": "Second", "latitude": 2, "longitude": 2},
        ]);
        let coordinator = coordinator(vec![now(Ok(centers))], Vec::new());
        coordinator.load_all().await;

        let state = coordinator.state();
        assert_eq!(state.centers.len(), 1);
        assert_eq!(state.centers[0].name, "First");
    }

    #[tokio::test]
    async fn queries_do_not_mutate_state() {
        let coordinator = coordinator(vec![now(Ok(center_a()))], vec![now(Ok(bin_b1()))]);
        coordinator.load_all().await;
        let before = coordinator.state();

        assert_eq!(coordinator.filter_bins_by_type(Some("")), before.bins);
        assert!(coordinator.filter_bins_by_type(Some("paper")).is_empty());
        assert!(coordinator.filter_centers_by_type(Some("glass")).is_empty());
        let results = coordinator.search_all("  ");
        assert_eq!(results.centers, before.centers);
        assert_eq!(results.bins, before.bins);

        assert_eq!(coordinator.state(), before);
    }

    #[tokio::test]
    async fn loads_wait_for_the_surface_and_reach_it_after_readiness() {
        let centers = ScriptedPort::new(EntityKind::Center, vec![now(Ok(center_a()))]);
        let transport = Arc::new(RecordingTransport::default());
        let surface = Arc::new(SurfaceBridge::new(
            Arc::clone(&transport) as Arc<dyn SurfaceTransport>
        ));
        let coordinator = Arc::new(
            MapDataCoordinator::new(
                MapSources::new(
                    Arc::clone(&centers) as Arc<dyn CollectionPort>,
                    ScriptedPort::new(EntityKind::Bin, vec![now(Ok(bin_b1()))]),
                ),
                CoordinatorOptions::default(),
            )
            .with_surface(Arc::clone(&surface)),
        );

        let load = tokio::spawn({
            let coordinator = Arc::clone(&coordinator);
            async move { coordinator.load_when_ready().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(centers.calls.load(Ordering::SeqCst), 0);
        assert!(transport.messages().is_empty());

        surface.handle_inbound(r#"{"type":"web_ready"}"#);
        load.await.expect("load completes");

        let types: Vec<String> = transport
            .messages()
            .iter()
            .map(|message| message["type"].as_str().unwrap_or_default().to_owned())
            .collect();
        assert_eq!(types, ["collect_centers", "bins"]);
        assert_eq!(coordinator.state().stats.total_points, 2);
    }

    #[tokio::test]
    async fn data_loaded_before_readiness_is_buffered_for_the_surface() {
        let transport = Arc::new(RecordingTransport::default());
        let surface = Arc::new(SurfaceBridge::new(
            Arc::clone(&transport) as Arc<dyn SurfaceTransport>
        ));
        let coordinator = coordinator(vec![now(Ok(center_a()))], vec![now(Ok(bin_b1()))])
            .with_surface(Arc::clone(&surface));

        coordinator.load_all().await;
        assert!(transport.messages().is_empty());

        surface.on_load_end();
        let messages = transport.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["centers"][0]["id"], "c1");
        assert_eq!(messages[1]["bins"][0]["garbageType"], "glass");
    }
}
