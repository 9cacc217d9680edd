//! Unix socket IPC between the CLI and the daemon (one JSON line each way).

pub mod client;
pub mod protocol;
pub mod server;

pub use client::send_command;
pub use protocol::{Command, Response};
pub use server::{CommandHandler, IpcServer};
