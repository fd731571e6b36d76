//! Client module for the stylemail CLI.
//!
//! The client:
//! - Renders a minimal TUI prompt when a prompt is missing
//! - Sends requests to the daemon via Unix socket

pub mod socket;
pub mod tui;

pub use socket::send_request;
pub use tui::run_tui;
