//! Background services

pub mod connection_sweep;

pub use connection_sweep::{ConnectionSweepHandle, ConnectionSweepService};
