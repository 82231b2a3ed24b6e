//! Out-of-band approval daemon: library crate shared by the binary and the
//! integration tests in `tests/`.

pub mod api;
pub mod config;
pub mod crypto;
pub mod errors;
pub mod gate;
pub mod ipc;
pub mod jobs;
pub mod models;
pub mod notification;
pub mod queue;
pub mod setup;
pub mod store;
