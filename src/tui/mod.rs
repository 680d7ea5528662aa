//! Live terminal view of a diagnostics run.
//!
//! The view is a plain subscriber of the engine's progress channel; nothing
//! in the core knows it exists.

pub mod controller;
pub mod display_mode;
pub mod renderer;
pub mod state;

pub use controller::{TuiController, UiExit};
pub use display_mode::DisplayMode;
pub use state::TuiState;
