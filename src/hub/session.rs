//! Reader and writer loops for one connection
//!
//! Each connection runs two tasks for as long as it is open. The reader owns
//! the inbound half of the transport and feeds the router; the writer owns
//! the outbound half, drains the queue and sends liveness probes. Whichever
//! exits first closes the connection, which stops the other one.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::task::JoinError;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument};

use super::connection::{Connection, OutboundQueue};
use super::gateway::PersistenceGateway;
use super::registry::Registry;
use super::router::MessageRouter;
use crate::config::HubConfig;

/// Queued messages coalesced into a single flush
const MAX_WRITE_BATCH: usize = 64;

/// Why a connection loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// The connection was closed from elsewhere
    Closed,
    /// The peer sent a close frame or ended the stream
    PeerClosed,
    /// Nothing arrived within the receive deadline
    DeadlineExpired,
    /// A read or write failed
    TransportError,
}

impl fmt::Display for LoopExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LoopExit::Closed => "closed",
            LoopExit::PeerClosed => "peer closed",
            LoopExit::DeadlineExpired => "read deadline expired",
            LoopExit::TransportError => "transport error",
        };
        write!(f, "{}", s)
    }
}

pub struct Session {
    conn: Arc<Connection>,
    registry: Arc<Registry>,
    gateway: Arc<dyn PersistenceGateway>,
    config: HubConfig,
}

impl Session {
    pub fn new(
        conn: Arc<Connection>,
        registry: Arc<Registry>,
        gateway: Arc<dyn PersistenceGateway>,
        config: HubConfig,
    ) -> Self {
        Self {
            conn,
            registry,
            gateway,
            config,
        }
    }

    /// Drive the connection until it closes, then unregister it.
    ///
    /// A panic in either loop is contained in its task and treated like any
    /// other exit.
    #[instrument(skip_all, fields(connection_id = %self.conn.id(), meeting_id = %self.conn.meeting_id()))]
    pub async fn run<S, R, E>(self, queue: OutboundQueue, sink: S, stream: R)
    where
        S: Sink<Message> + Unpin + Send + 'static,
        S::Error: fmt::Display + Send,
        R: Stream<Item = Result<Message, E>> + Unpin + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let router = MessageRouter::new(
            self.conn.clone(),
            self.registry.clone(),
            self.gateway.clone(),
            self.config.persist_timeout,
        );

        let mut writer = tokio::spawn(write_loop(
            self.conn.clone(),
            queue,
            sink,
            self.config.ping_period,
            self.config.write_wait,
        ));
        let mut reader = tokio::spawn(read_loop(
            router,
            self.conn.clone(),
            stream,
            self.config.pong_wait,
        ));

        let (first, rest, rest_name) = tokio::select! {
            res = &mut writer => (("writer", res), reader, "reader"),
            res = &mut reader => (("reader", res), writer, "writer"),
        };
        self.log_exit(first.0, first.1);

        self.registry.unregister(&self.conn);
        self.log_exit(rest_name, rest.await);

        info!(
            participant_id = self.conn.participant_id().unwrap_or("-"),
            "Connection finished"
        );
    }

    fn log_exit(&self, name: &str, result: Result<LoopExit, JoinError>) {
        match result {
            Ok(exit) => debug!(task = name, "Loop exited: {}", exit),
            Err(e) if e.is_panic() => error!(
                task = name,
                participant_id = self.conn.participant_id().unwrap_or("-"),
                "Connection task panicked; closing connection"
            ),
            Err(e) => debug!(task = name, "Loop cancelled: {}", e),
        }
    }
}

async fn read_loop<R, E>(
    router: MessageRouter,
    conn: Arc<Connection>,
    mut stream: R,
    pong_wait: Duration,
) -> LoopExit
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: fmt::Display,
{
    loop {
        // The deadline restarts on every frame, pongs included
        let next = tokio::select! {
            _ = conn.closed() => return LoopExit::Closed,
            next = timeout(pong_wait, stream.next()) => next,
        };

        let msg = match next {
            Err(_) => return LoopExit::DeadlineExpired,
            Ok(None) => return LoopExit::PeerClosed,
            Ok(Some(Err(e))) => {
                debug!("Read error: {}", e);
                return LoopExit::TransportError;
            }
            Ok(Some(Ok(msg))) => msg,
        };

        match msg {
            Message::Text(text) => {
                router.dispatch(&text).await;
            }
            Message::Binary(bytes) => match String::from_utf8(bytes) {
                Ok(text) => {
                    router.dispatch(&text).await;
                }
                Err(_) => debug!("Ignoring non-UTF-8 binary frame"),
            },
            Message::Ping(_) | Message::Pong(_) => {}
            Message::Close(_) => return LoopExit::PeerClosed,
        }
    }
}

async fn write_loop<S>(
    conn: Arc<Connection>,
    mut queue: OutboundQueue,
    mut sink: S,
    ping_period: Duration,
    write_wait: Duration,
) -> LoopExit
where
    S: Sink<Message> + Unpin,
    S::Error: fmt::Display,
{
    let mut ticker = interval_at(Instant::now() + ping_period, ping_period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let exit = loop {
        tokio::select! {
            biased;
            _ = conn.closed() => break LoopExit::Closed,
            next = queue.recv() => {
                let Some(first) = next else { break LoopExit::Closed };
                if let Err(e) = write_batch(&mut sink, &mut queue, first, write_wait).await {
                    debug!("Write failed: {}", e);
                    break LoopExit::TransportError;
                }
            }
            _ = ticker.tick() => {
                match timeout(write_wait, sink.send(Message::Ping(Vec::new()))).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        debug!("Ping failed: {}", e);
                        break LoopExit::TransportError;
                    }
                    Err(_) => {
                        debug!("Ping write deadline exceeded");
                        break LoopExit::TransportError;
                    }
                }
            }
        }
    };

    // Sole place the transport is released
    let _ = timeout(write_wait, async {
        let _ = sink.send(Message::Close(None)).await;
        let _ = sink.close().await;
    })
    .await;

    exit
}

/// Write `first` plus whatever else is already queued, then flush once
async fn write_batch<S>(
    sink: &mut S,
    queue: &mut OutboundQueue,
    first: String,
    write_wait: Duration,
) -> Result<(), String>
where
    S: Sink<Message> + Unpin,
    S::Error: fmt::Display,
{
    let batch = async {
        sink.feed(Message::Text(first)).await?;
        for _ in 1..MAX_WRITE_BATCH {
            match queue.try_recv() {
                Ok(next) => sink.feed(Message::Text(next)).await?,
                Err(_) => break,
            }
        }
        sink.flush().await
    };

    match timeout(write_wait, batch).await {
        Ok(result) => result.map_err(|e| e.to_string()),
        Err(_) => Err("write deadline exceeded".to_string()),
    }
}
