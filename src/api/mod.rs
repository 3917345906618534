//! HTTP API exposing the fulfillment engine.

pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod server;
