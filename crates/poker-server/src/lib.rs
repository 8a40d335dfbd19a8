// Library root: re-exports all modules so integration tests can start the
// server pieces individually.

pub mod app;
pub mod config;
pub mod http_server;
pub mod ws_server;
