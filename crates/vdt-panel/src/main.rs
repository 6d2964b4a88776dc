use std::io;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use crossterm::event::{
    DisableFocusChange, EnableFocusChange, Event, EventStream, KeyCode, KeyEvent, KeyEventKind,
};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use futures_util::StreamExt;
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use vdt_panel::app::{DiagnosticSink, FileDiagnostics, SharedTheme, TracingDiagnostics};
use vdt_panel::config::{load_config, parse_bool_flag, Args};
use vdt_panel::session::{HostSignal, Session, SessionInput, SessionOptions, UiCommand};
use vdt_panel::store::Tab;
use vdt_panel::transport::UdsConnector;
use vdt_panel::ui::render_panel;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config(Args::parse());
    init_logging();
    install_panic_hook();

    let theme = SharedTheme::default();
    let diagnostics: Arc<dyn DiagnosticSink> = match config.diagnostics_dir.clone() {
        Some(dir) => Arc::new(FileDiagnostics::new(dir)),
        None => Arc::new(TracingDiagnostics),
    };
    let connector = UdsConnector::new(config.socket_path.clone(), config.max_frame_bytes);
    info!(
        event = "panel_start",
        socket = %connector.socket_path().display(),
        embedded = config.embedded
    );
    let (mut session, mut inbox) = Session::new(
        connector,
        SessionOptions {
            embedded: config.embedded,
            dark_theme: config.dark_theme,
            theme: Arc::new(theme.clone()),
            diagnostics,
        },
    );

    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableFocusChange)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    let mut events = EventStream::new();

    session.start();
    let result = loop {
        if let Err(err) = terminal.draw(|frame| render_panel(frame, &session.view(), theme.is_dark()))
        {
            break Err(err.into());
        }
        tokio::select! {
            Some(input) = inbox.recv() => {
                if !session.handle(input) {
                    break Ok(());
                }
            }
            maybe_event = events.next() => {
                match maybe_event {
                    Some(Ok(event)) => {
                        let Some(input) = map_terminal_event(event, session.store().tab()) else {
                            continue;
                        };
                        if !session.handle(input) {
                            break Ok(());
                        }
                    }
                    Some(Err(err)) => break Err(anyhow::Error::from(err)),
                    None => break Ok(()),
                }
            }
        }
    };

    session.stop();
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        DisableFocusChange,
        LeaveAlternateScreen
    )?;
    terminal.show_cursor()?;
    result
}

fn map_terminal_event(event: Event, current_tab: Tab) -> Option<SessionInput> {
    match event {
        Event::Key(key) if key.kind == KeyEventKind::Press => map_key(key, current_tab),
        Event::FocusGained => Some(SessionInput::Host(HostSignal::Shown)),
        Event::FocusLost => Some(SessionInput::Host(HostSignal::Hidden)),
        _ => None,
    }
}

fn map_key(key: KeyEvent, current_tab: Tab) -> Option<SessionInput> {
    let input = match key.code {
        KeyCode::Char('q') => SessionInput::Stop,
        KeyCode::Char('r') => SessionInput::Reload { generation: None },
        KeyCode::Char('1') => SessionInput::Ui(UiCommand::SwitchTab(Tab::Components)),
        KeyCode::Char('2') => SessionInput::Ui(UiCommand::SwitchTab(Tab::Vuex)),
        KeyCode::Char('3') => SessionInput::Ui(UiCommand::SwitchTab(Tab::Events)),
        KeyCode::Tab => SessionInput::Ui(UiCommand::SwitchTab(current_tab.next())),
        KeyCode::Char('v') => SessionInput::Ui(UiCommand::ToggleVuexRecording),
        KeyCode::Char('e') => SessionInput::Ui(UiCommand::ToggleEventsRecording),
        KeyCode::Char('t') => SessionInput::Ui(UiCommand::ToggleDarkTheme),
        KeyCode::Char('c') => SessionInput::Host(HostSignal::ContextMenuTarget),
        _ => return None,
    };
    Some(input)
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout_enabled = std::env::var("VDT_LOG_STDOUT")
        .ok()
        .and_then(|value| parse_bool_flag(&value))
        .unwrap_or(false);
    if stdout_enabled {
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    } else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::sink)
            .try_init();
    }
}

/// Render faults are caught per section; this keeps the default hook from
/// scribbling over the alternate screen.
fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        error!(event = "panic", detail = %info);
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::KeyModifiers;

    fn press(code: KeyCode) -> Event {
        Event::Key(KeyEvent::new(code, KeyModifiers::NONE))
    }

    #[test]
    fn keys_map_to_session_inputs() {
        assert!(matches!(
            map_terminal_event(press(KeyCode::Char('q')), Tab::Components),
            Some(SessionInput::Stop)
        ));
        assert!(matches!(
            map_terminal_event(press(KeyCode::Char('r')), Tab::Components),
            Some(SessionInput::Reload { generation: None })
        ));
        assert!(matches!(
            map_terminal_event(press(KeyCode::Char('2')), Tab::Components),
            Some(SessionInput::Ui(UiCommand::SwitchTab(Tab::Vuex)))
        ));
        assert!(matches!(
            map_terminal_event(press(KeyCode::Char('c')), Tab::Components),
            Some(SessionInput::Host(HostSignal::ContextMenuTarget))
        ));
        assert!(matches!(
            map_terminal_event(press(KeyCode::Tab), Tab::Events),
            Some(SessionInput::Ui(UiCommand::SwitchTab(Tab::Components)))
        ));
        assert!(map_terminal_event(press(KeyCode::Char('z')), Tab::Components).is_none());
    }

    #[test]
    fn focus_changes_map_to_visibility_signals() {
        assert!(matches!(
            map_terminal_event(Event::FocusGained, Tab::Vuex),
            Some(SessionInput::Host(HostSignal::Shown))
        ));
        assert!(matches!(
            map_terminal_event(Event::FocusLost, Tab::Vuex),
            Some(SessionInput::Host(HostSignal::Hidden))
        ));
    }
}
