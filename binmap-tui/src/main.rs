//! Terminal map of waste collection centers and bins.

mod app;
mod input;
mod position;
mod surface;
mod ui;

use std::{
    fs::File,
    io,
    sync::{Arc, Mutex},
    time::Duration as StdDuration,
};

use anyhow::{Context, Result};
use binmap_core::{
    ApiConfig, AppSession, CoordinatorOptions, LocationOptions, MapDataCoordinator,
    SurfaceBridge, location,
};
use binmap_provider_http::{ApiClient, HttpProfilePort};
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event as CEvent},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{Terminal, backend::CrosstermBackend};
use reqwest::Client;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use crate::app::App;
use crate::input::Action;
use crate::position::FixedPosition;
use crate::surface::{ChannelTransport, SharedView};

const DEFAULT_LOG_FILE: &str = "binmap.log";

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;

    // Configuration
    let api_config = ApiConfig::from_env()?;
    let location_options = LocationOptions::from_env()?;
    let position = FixedPosition::from_env()?;
    let coordinator_options = CoordinatorOptions {
        fetch_timeout: api_config.timeout,
        ..CoordinatorOptions::default()
    };

    // Session + HTTP setup
    let session = Arc::new(AppSession::new());
    if let Some(token) = std::env::var("BINMAP_TOKEN").ok().filter(|token| !token.is_empty()) {
        session.login(token, None).await;
    }

    let api = api_client(api_config, &session)?;

    let user = match session.ensure_user(&HttpProfilePort::new(api.clone())).await {
        Ok(user) => user,
        Err(err) => {
            tracing::warn!(%err, "profile unavailable");
            None
        }
    };

    // Rendering surface
    let (surface_tx, surface_rx) = mpsc::unbounded_channel();
    let bridge = Arc::new(SurfaceBridge::new(Arc::new(ChannelTransport::new(surface_tx))));
    let view = SharedView::default();

    let coordinator = Arc::new(
        MapDataCoordinator::new(binmap_provider_http::sources(&api), coordinator_options)
            .with_surface(Arc::clone(&bridge)),
    );
    let loader = {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move { coordinator.load_when_ready().await })
    };
    let surface = tokio::spawn(surface::run(surface_rx, view.clone(), Arc::clone(&bridge)));

    let mut subscription = {
        let bridge = Arc::clone(&bridge);
        location::subscribe(Arc::new(position), location_options, move |location| {
            bridge.send_user_location(location);
        })
    };

    // App state
    let app = App::new(coordinator, Arc::clone(&bridge), api, view, user);

    // Terminal init
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    // Run event loop
    let res = run(&mut terminal, app).await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    // Teardown
    subscription.unsubscribe();
    loader.abort();
    surface.abort();
    session.logout().await;

    res
}

fn api_client(config: ApiConfig, session: &Arc<AppSession>) -> Result<ApiClient> {
    let client = Client::builder()
        .user_agent(config.user_agent.clone())
        .timeout(config.timeout)
        .build()?;
    Ok(ApiClient::new(client, config, Arc::<AppSession>::clone(session)))
}

fn init_tracing() -> Result<()> {
    let path = std::env::var("BINMAP_LOG_FILE").unwrap_or_else(|_| DEFAULT_LOG_FILE.to_owned());
    let file = File::create(&path).with_context(|| format!("cannot create log file {path}"))?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .init();
    Ok(())
}

async fn run(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>, mut app: App) -> Result<()> {
    loop {
        // Draw current UI
        terminal.draw(|frame| ui::draw(frame, &app))?;

        // Poll for input (non-blocking, small timeout to keep CPU low)
        if event::poll(StdDuration::from_millis(100))?
            && let CEvent::Key(key) = event::read()?
        {
            match input::handle_key_event(key, &mut app) {
                Action::Quit => break,
                Action::None => {}
                Action::ResolveQr(payload) => {
                    app.notice = Some("Resolving QR code…".into());
                    terminal.draw(|frame| ui::draw(frame, &app))?;

                    app.notice = Some(match app.api.resolve_qr(&payload).await {
                        Ok(bin) => format!(
                            "Bin {}: {} in {} ({:.5}, {:.5})",
                            bin.point.id,
                            bin.waste_category,
                            bin.community,
                            bin.point.latitude,
                            bin.point.longitude
                        ),
                        Err(err) => format!("QR code not resolved: {err}"),
                    });
                }
            }
        }
    }

    Ok(())
}
