//! Local IPC between requesters and the approval daemon.

pub mod client;
pub mod protocol;
pub mod server;

pub use client::DaemonClient;
pub use server::IpcServer;
