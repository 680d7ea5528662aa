//! Output mode selection.
//!
//! Chooses between the live full-screen view, a plain printed summary and
//! JSON from CLI flags and whether stdout is a terminal.

/// How results reach the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayMode {
    /// Live progress in the alternate screen, summary printed afterwards
    Tui,
    /// No live output; a coloured summary once the run ends
    Plain,
    /// A single JSON document on stdout
    Json,
}

impl DisplayMode {
    /// `--json` always wins. Otherwise the live view needs a terminal and
    /// can be refused with `--plain`.
    pub fn detect(json_flag: bool, plain_flag: bool, is_tty: bool) -> Self {
        if json_flag {
            DisplayMode::Json
        } else if is_tty && !plain_flag {
            DisplayMode::Tui
        } else {
            DisplayMode::Plain
        }
    }

    /// Whether progress events have a consumer in this mode.
    pub fn is_live(&self) -> bool {
        matches!(self, DisplayMode::Tui)
    }
}
