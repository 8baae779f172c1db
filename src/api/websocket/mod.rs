//! WebSocket handlers

pub mod meeting;
