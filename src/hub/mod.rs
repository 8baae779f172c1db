//! Real-time meeting hub
//!
//! Connections are grouped by meeting in a [`Registry`]. Each connection runs
//! a [`Session`]: a reader loop that hands frames to the [`MessageRouter`]
//! and a writer loop that drains the connection's bounded outbound queue.

pub mod connection;
pub mod frame;
pub mod gateway;
pub mod registry;
pub mod router;
pub mod session;

pub use connection::{Connection, ConnectionState, EnqueueError, Identity, OutboundQueue};
pub use frame::{Frame, FrameKind};
pub use gateway::{PersistenceGateway, PgGateway};
pub use registry::{BroadcastOutcome, BroadcastRequest, Registry, SweepStats};
pub use router::{MessageRouter, RouteOutcome};
pub use session::{LoopExit, Session};
