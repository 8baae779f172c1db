//! Huddle - meeting chat and signaling relay
//!
//! A real-time hub for browser meetings. Participants connect over a
//! WebSocket, chat messages are persisted before they are fanned out, and
//! WebRTC signaling frames are relayed between participants of the same
//! meeting.
//!
//! ## Features
//!
//! - Per-meeting connection registry with reconnect supersession
//! - Bounded per-connection outbound queues; slow consumers are evicted
//! - Ping/pong liveness with a receive deadline
//! - Durable chat history in PostgreSQL

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod hub;
pub mod models;
pub mod repository;
pub mod services;

pub use config::Config;
pub use database::Database;
pub use error::{HuddleError, Result};
