//! TUI controller for managing the display lifecycle.
//!
//! The controller owns the terminal while a run is live. It consumes the
//! engine's progress channel, redraws on every event and on a short tick,
//! and watches the keyboard for a quit request.

use std::io::{self, Stdout};
use std::time::Duration;

use crossterm::{
    cursor,
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use log::debug;
use ratatui::{backend::CrosstermBackend, Terminal};
use tokio::sync::mpsc::UnboundedReceiver;

use super::display_mode::DisplayMode;
use super::renderer::render_frame;
use super::state::TuiState;
use crate::errors::{error_headline, DiagnosticError, ErrorKind};
use crate::progress::ProgressEvent;
use crate::results::ConnectionInfo;
use crate::services::ServiceRegistry;

const TICK: Duration = Duration::from_millis(100);

/// How long a fatal error stays on screen unless a key is pressed.
const ERROR_HOLD: Duration = Duration::from_secs(5);

/// Why the event loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiExit {
    /// Every progress sender is gone; the run is over.
    Finished,
    /// The user asked to stop.
    Quit,
}

pub struct TuiController {
    mode: DisplayMode,
    state: TuiState,
    /// Only present in TUI mode after `init`
    terminal: Option<Terminal<CrosstermBackend<Stdout>>>,
}

impl TuiController {
    pub fn new(mode: DisplayMode, registry: &ServiceRegistry) -> Self {
        Self {
            mode,
            state: TuiState::with_services(registry),
            terminal: None,
        }
    }

    pub fn mode(&self) -> DisplayMode {
        self.mode
    }

    pub fn state(&self) -> &TuiState {
        &self.state
    }

    /// Enter the alternate screen and hide the cursor. A no-op outside
    /// TUI mode.
    pub fn init(&mut self) -> Result<(), DiagnosticError> {
        if !self.mode.is_live() || self.terminal.is_some() {
            return Ok(());
        }

        enable_raw_mode().map_err(terminal_error)?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen, cursor::Hide).map_err(terminal_error)?;

        let terminal = Terminal::new(CrosstermBackend::new(stdout)).map_err(terminal_error)?;
        self.terminal = Some(terminal);
        Ok(())
    }

    /// Restore the terminal. Safe to call more than once.
    pub fn cleanup(&mut self) -> Result<(), DiagnosticError> {
        let Some(mut terminal) = self.terminal.take() else {
            return Ok(());
        };

        execute!(terminal.backend_mut(), LeaveAlternateScreen, cursor::Show)
            .map_err(terminal_error)?;
        disable_raw_mode().map_err(terminal_error)?;
        Ok(())
    }

    pub fn set_connection(&mut self, connection: Option<ConnectionInfo>) {
        self.state.set_connection(connection);
    }

    /// Replace the service list with `error` and keep it on screen until a
    /// key is pressed or five seconds pass. Outside TUI mode only the
    /// state changes.
    pub async fn show_error(&mut self, error: &DiagnosticError) -> Result<(), DiagnosticError> {
        self.state.set_error(error_headline(error), error.suggestion.clone());
        self.render()?;
        if self.terminal.is_none() {
            return Ok(());
        }

        let deadline = tokio::time::Instant::now() + ERROR_HOLD;
        while tokio::time::Instant::now() < deadline {
            if self.pending_key()?.is_some() {
                break;
            }
            tokio::time::sleep(TICK).await;
        }
        Ok(())
    }

    pub fn apply(&mut self, event: &ProgressEvent) {
        self.state.update_from_event(event);
    }

    pub fn render(&mut self) -> Result<(), DiagnosticError> {
        let Some(ref mut terminal) = self.terminal else {
            return Ok(());
        };
        let state = &self.state;
        terminal
            .draw(|frame| render_frame(frame, state))
            .map_err(terminal_error)?;
        Ok(())
    }

    /// Drive the display until the channel closes or the user quits.
    ///
    /// Outside TUI mode the events are still applied to the state, so the
    /// caller can rely on it either way.
    pub async fn run(
        &mut self,
        events: &mut UnboundedReceiver<ProgressEvent>,
    ) -> Result<UiExit, DiagnosticError> {
        let mut tick = tokio::time::interval(TICK);
        self.render()?;

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => {
                        debug!("Progress event: {:?}", event);
                        self.apply(&event);
                        self.render()?;
                    }
                    None => return Ok(UiExit::Finished),
                },
                _ = tick.tick() => {
                    if self.quit_requested()? {
                        return Ok(UiExit::Quit);
                    }
                    self.render()?;
                }
            }
        }
    }

    /// Next key press already queued, without blocking.
    fn pending_key(&self) -> Result<Option<KeyEvent>, DiagnosticError> {
        if self.terminal.is_none() {
            return Ok(None);
        }

        while event::poll(Duration::ZERO).map_err(terminal_error)? {
            if let Event::Key(key) = event::read().map_err(terminal_error)? {
                if key.kind == KeyEventKind::Press {
                    return Ok(Some(key));
                }
            }
        }
        Ok(None)
    }

    /// Non-blocking check for q, Esc or Ctrl+C. Raw mode swallows the
    /// interrupt signal, so Ctrl+C arrives here as a key.
    fn quit_requested(&self) -> Result<bool, DiagnosticError> {
        while let Some(key) = self.pending_key()? {
            let ctrl_c = key.code == KeyCode::Char('c')
                && key.modifiers.contains(KeyModifiers::CONTROL);
            if ctrl_c || matches!(key.code, KeyCode::Char('q') | KeyCode::Esc) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl Drop for TuiController {
    /// Restore the terminal even if `cleanup` was never called.
    fn drop(&mut self) {
        let _ = self.cleanup();
    }
}

fn terminal_error(e: io::Error) -> DiagnosticError {
    DiagnosticError::new(ErrorKind::Unknown, format!("terminal error: {}", e)).with_source(e)
}
