use std::sync::Arc;

use binmap_core::{
    LoadPhase, MapDataCoordinator, MapState, SurfaceBridge, UserProfile,
    filter::{self, SearchResults},
    geo::{self, DEFAULT_NEAREST, NearbyCenter},
};
use binmap_provider_http::ApiClient;

use crate::surface::{SharedView, SurfaceView};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Pane {
    Centers,
    Bins,
    Nearby,
}

impl Pane {
    pub(crate) fn next(self) -> Self {
        match self {
            Pane::Centers => Pane::Bins,
            Pane::Bins => Pane::Nearby,
            Pane::Nearby => Pane::Centers,
        }
    }

    pub(crate) fn title(self) -> &'static str {
        match self {
            Pane::Centers => "Collection centers",
            Pane::Bins => "Bins",
            Pane::Nearby => "Nearest centers",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    Browse,
    Search,
    Scan,
}

pub(crate) struct App {
    pub coordinator: Arc<MapDataCoordinator>,
    pub bridge: Arc<SurfaceBridge>,
    pub api: ApiClient,
    pub view: SharedView,
    pub user: Option<UserProfile>,

    pub pane: Pane,
    pub mode: Mode,
    pub search_input: String,
    pub scan_input: String,
    pub list_index: usize,

    pub show_centers: bool,
    pub show_bins: bool,

    pub notice: Option<String>,
}

impl App {
    pub(crate) fn new(
        coordinator: Arc<MapDataCoordinator>,
        bridge: Arc<SurfaceBridge>,
        api: ApiClient,
        view: SharedView,
        user: Option<UserProfile>,
    ) -> Self {
        Self {
            coordinator,
            bridge,
            api,
            view,
            user,
            pane: Pane::Centers,
            mode: Mode::Browse,
            search_input: String::new(),
            scan_input: String::new(),
            list_index: 0,
            show_centers: true,
            show_bins: true,
            notice: None,
        }
    }

    pub(crate) fn map_state(&self) -> MapState {
        self.coordinator.state()
    }

    pub(crate) fn surface(&self) -> SurfaceView {
        self.view.snapshot()
    }

    /// Entities on display, narrowed by the search box.
    pub(crate) fn search_results(&self, surface: &SurfaceView) -> SearchResults {
        filter::search(
            surface.visible_centers(),
            surface.visible_bins(),
            &self.search_input,
        )
    }

    pub(crate) fn nearby(&self, surface: &SurfaceView) -> Vec<NearbyCenter> {
        surface.user_location.map_or_else(Vec::new, |location| {
            geo::nearest_centers(surface.visible_centers(), location, DEFAULT_NEAREST)
        })
    }

    pub(crate) fn row_count(&self) -> usize {
        let surface = self.surface();
        match self.pane {
            Pane::Centers => self.search_results(&surface).centers.len(),
            Pane::Bins => self.search_results(&surface).bins.len(),
            Pane::Nearby => self.nearby(&surface).len(),
        }
    }

    pub(crate) fn next_pane(&mut self) {
        self.pane = self.pane.next();
        self.list_index = 0;
    }

    pub(crate) fn move_selection(&mut self, down: bool) {
        if down {
            if self.list_index + 1 < self.row_count() {
                self.list_index += 1;
            }
        } else {
            self.list_index = self.list_index.saturating_sub(1);
        }
    }

    pub(crate) fn toggle_centers(&mut self) {
        self.show_centers = !self.show_centers;
        self.bridge.toggle_centers(self.show_centers);
        self.list_index = 0;
    }

    pub(crate) fn toggle_bins(&mut self) {
        self.show_bins = !self.show_bins;
        self.bridge.toggle_bins(self.show_bins);
        self.list_index = 0;
    }

    pub(crate) fn refresh(&mut self) {
        if self.coordinator.is_loading() {
            self.notice = Some("A load is already running".into());
            return;
        }
        self.notice = None;
        let coordinator = Arc::clone(&self.coordinator);
        tokio::spawn(async move { coordinator.refresh().await });
    }

    pub(crate) fn phase_label(state: &MapState) -> &'static str {
        match state.phase {
            LoadPhase::Idle => "idle",
            LoadPhase::Loading => "loading",
            LoadPhase::Ready => "ready",
            LoadPhase::Error => "error",
        }
    }
}
