//! Read-only query API
//!
//! Serves random and ranked proxy selections and accepts per-destination
//! feedback from consumers.

pub mod handlers;
pub mod routes;
pub mod server;

pub use server::{ApiServer, AppState};
