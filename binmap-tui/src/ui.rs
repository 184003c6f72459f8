use binmap_core::{MapState, filter::WasteClass};
use ratatui::{
    prelude::*,
    widgets::{Block, Borders, Cell, List, ListItem, ListState, Paragraph, Row, Table, Wrap},
};

use crate::app::{App, Mode, Pane};
use crate::surface::SurfaceView;

pub(crate) fn draw(frame: &mut Frame<'_>, app: &App) {
    let area = frame.area();
    let state = app.map_state();
    let surface = app.surface();

    // Outer layout: title, main content, status line
    let layout_chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(0),
            Constraint::Length(3),
        ])
        .split(area);

    let chunks = layout_chunks.as_ref();
    let [header_area, content_area, status_area] = chunks else {
        return;
    };

    draw_header(frame, app, &state, *header_area);

    let content_chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(65), Constraint::Percentage(35)])
        .split(*content_area);
    let [list_area, side_area] = content_chunks.as_ref() else {
        return;
    };

    draw_lists(frame, app, &surface, *list_area);
    draw_breakdown(frame, &state, *side_area);
    draw_status(frame, app, &state, &surface, *status_area);
}

fn draw_header(frame: &mut Frame<'_>, app: &App, state: &MapState, area: Rect) {
    let stats = &state.stats;
    let user = app
        .user
        .as_ref()
        .map_or("signed out", |user| user.display_name());
    let loaded = state
        .loaded_at
        .map_or_else(|| "never".to_owned(), |at| at.format("%H:%M:%S").to_string());

    let text = format!(
        "{} centers · {} bins · {} points · last load {loaded} · {user}",
        stats.centers_count, stats.bins_count, stats.total_points
    );
    let header = Paragraph::new(text).block(
        Block::default()
            .borders(Borders::ALL)
            .title("binmap – waste collection map"),
    );
    frame.render_widget(header, area);
}

fn draw_lists(frame: &mut Frame<'_>, app: &App, surface: &SurfaceView, area: Rect) {
    let layout_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // search
            Constraint::Min(0),    // rows
        ])
        .split(area);

    let chunks = layout_chunks.as_ref();
    let [input_area, rows_area] = chunks else {
        return;
    };

    let (input_title, input_text) = match app.mode {
        Mode::Scan => ("QR payload (Enter resolve, Esc cancel)", app.scan_input.as_str()),
        Mode::Search => ("Search (Enter/Esc done)", app.search_input.as_str()),
        Mode::Browse => ("Search (/ to edit, Esc clear)", app.search_input.as_str()),
    };
    let mut input = Paragraph::new(input_text)
        .block(Block::default().borders(Borders::ALL).title(input_title))
        .wrap(Wrap { trim: true });
    if app.mode != Mode::Browse {
        input = input.style(Style::default().fg(Color::Yellow));
    }
    frame.render_widget(input, *input_area);

    let items: Vec<ListItem<'_>> = match app.pane {
        Pane::Centers => app
            .search_results(surface)
            .centers
            .iter()
            .map(|center| {
                let kinds = if center.accepted_waste.is_empty() {
                    String::new()
                } else {
                    format!(" [{}]", center.accepted_waste.join(", "))
                };
                ListItem::new(format!(
                    "{} · {} · {}{kinds}",
                    center.name, center.address, center.community
                ))
            })
            .collect(),
        Pane::Bins => app
            .search_results(surface)
            .bins
            .iter()
            .map(|bin| {
                let color = waste_color(WasteClass::classify(&bin.waste_category));
                ListItem::new(Line::from(vec![
                    Span::styled("● ", Style::default().fg(color)),
                    Span::raw(format!(
                        "{} · {} ({:.5}, {:.5})",
                        bin.waste_category, bin.community, bin.point.latitude, bin.point.longitude
                    )),
                ]))
            })
            .collect(),
        Pane::Nearby => app
            .nearby(surface)
            .iter()
            .map(|nearby| {
                ListItem::new(format!(
                    "{:>6.2} km · {} · {}",
                    nearby.distance_km, nearby.center.name, nearby.center.address
                ))
            })
            .collect(),
    };

    let empty = items.is_empty();
    let items = if empty {
        let hint = match app.pane {
            Pane::Nearby if surface.user_location.is_none() => "Location unavailable.",
            _ => "Nothing to show.",
        };
        vec![ListItem::new(hint)]
    } else {
        items
    };

    let list = List::new(items)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(format!("{} (Tab to switch, ↑/↓ move)", app.pane.title())),
        )
        .highlight_style(
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        );

    let mut list_state = ListState::default();
    if !empty {
        list_state.select(Some(app.list_index));
    }
    frame.render_stateful_widget(list, *rows_area, &mut list_state);
}

fn draw_breakdown(frame: &mut Frame<'_>, state: &MapState, area: Rect) {
    let Some(breakdown) = &state.stats.bins_stats else {
        let paragraph = Paragraph::new("No bins loaded.")
            .block(Block::default().borders(Borders::ALL).title("Bins by type"))
            .wrap(Wrap { trim: true });
        frame.render_widget(paragraph, area);
        return;
    };

    let rows = breakdown.by_type.iter().map(|(category, count)| {
        let style = Style::default().fg(waste_color(WasteClass::classify(category)));
        Row::new(vec![Cell::from(category.clone()), Cell::from(count.to_string())]).style(style)
    });

    let table = Table::new(rows, [Constraint::Min(12), Constraint::Length(6)])
        .header(
            Row::new(vec!["Type", "Count"]).style(Style::default().add_modifier(Modifier::BOLD)),
        )
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(format!("Bins by type ({})", breakdown.total)),
        )
        .column_spacing(1);

    frame.render_widget(table, area);
}

fn draw_status(
    frame: &mut Frame<'_>,
    app: &App,
    state: &MapState,
    surface: &SurfaceView,
    area: Rect,
) {
    let nav_hint = "r refresh · c/b toggle centers/bins · s scan QR · q/Ctrl-C quit";

    let location = surface.user_location.map_or_else(
        || "no location".to_owned(),
        |location| format!("at {:.4}, {:.4}", location.lat, location.lng),
    );
    let surface_label = if app.bridge.is_ready() {
        "surface ready"
    } else {
        "surface loading"
    };
    let phase = App::phase_label(state);

    let status_text = if let Some(err) = &state.error {
        format!("{err} · {location} · {nav_hint}")
    } else if let Some(notice) = &app.notice {
        format!("{notice} · {location} · {nav_hint}")
    } else {
        format!("{phase} · {surface_label} · {location} · {nav_hint}")
    };

    let status_style = if state.error.is_some() {
        Style::default().fg(Color::Red)
    } else if state.loading() {
        Style::default().fg(Color::Yellow)
    } else {
        Style::default()
    };

    let status = Paragraph::new(status_text)
        .block(Block::default().borders(Borders::ALL).title("Status"))
        .style(status_style)
        .wrap(Wrap { trim: true });

    frame.render_widget(status, area);
}

fn waste_color(class: WasteClass) -> Color {
    match class {
        WasteClass::Glass => Color::Cyan,
        WasteClass::Plastic => Color::Yellow,
        WasteClass::Paper => Color::Blue,
        WasteClass::Metal => Color::LightBlue,
        WasteClass::Organic => Color::Green,
        WasteClass::Other => Color::Magenta,
    }
}
