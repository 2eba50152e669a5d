//! Task service: persistent store, auth gateway, REST handlers and the
//! realtime channel, assembled into one axum server.

pub mod api;
pub mod auth;
pub mod db;
pub mod server;
pub mod ws;

pub use api::{AppState, SharedState};
pub use db::{DbHandle, TaskDb};
pub use server::{build_router, serve, start_server};
