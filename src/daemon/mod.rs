//! Daemon module for the stylemail daemon.
//!
//! The daemon is a long-running process that:
//! - Holds one configured style backend and its worker pool
//! - Listens on a Unix domain socket
//! - Serves seed and generate requests from many clients

pub mod server;

pub use server::DaemonServer;
