use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

use crate::app::{App, Mode};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Action {
    None,
    Quit,
    /// Resolve the typed QR payload to a bin.
    ResolveQr(String),
}

pub(crate) fn handle_key_event(key: KeyEvent, app: &mut App) -> Action {
    use KeyCode::{Backspace, Char, Down, Enter, Esc, Tab, Up};

    if key.code == Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        return Action::Quit;
    }

    let typing = !key.modifiers.contains(KeyModifiers::CONTROL)
        && !key.modifiers.contains(KeyModifiers::ALT);

    match app.mode {
        Mode::Browse => match key.code {
            Char('q') if key.modifiers.is_empty() => return Action::Quit,
            Up | Char('k') => app.move_selection(false),
            Down | Char('j') => app.move_selection(true),
            Tab => app.next_pane(),
            Char('r') => app.refresh(),
            Char('c') => app.toggle_centers(),
            Char('b') => app.toggle_bins(),
            Char('/') => app.mode = Mode::Search,
            Char('s') => {
                app.scan_input.clear();
                app.mode = Mode::Scan;
            }
            Esc => {
                app.search_input.clear();
                app.list_index = 0;
            }
            _ => {}
        },

        Mode::Search => match key.code {
            Char(character) if typing => {
                app.search_input.push(character);
                app.list_index = 0;
            }
            Backspace => {
                app.search_input.pop();
                app.list_index = 0;
            }
            Enter | Esc => app.mode = Mode::Browse,
            _ => {}
        },

        Mode::Scan => match key.code {
            Char(character) if typing => app.scan_input.push(character),
            Backspace => {
                app.scan_input.pop();
            }
            Enter => {
                app.mode = Mode::Browse;
                let payload = app.scan_input.trim().to_owned();
                if !payload.is_empty() {
                    return Action::ResolveQr(payload);
                }
            }
            Esc => app.mode = Mode::Browse,
            _ => {}
        },
    }
    Action::None
}
