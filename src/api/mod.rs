//! HTTP and WebSocket surface
//!
//! A thin REST layer over meetings and chat history, plus the meeting socket
//! endpoint that admits connections into the hub.

pub mod handlers;
pub mod routes;
pub mod server;
pub mod websocket;

pub use server::{ApiServer, AppState};
