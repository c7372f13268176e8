//! Realtime push channel.
//!
//! One socket per session. After connecting the client joins the message
//! table's channel, sends a heartbeat on a fixed interval and forwards every
//! inserted record over an mpsc channel. When the socket drops it reconnects
//! with exponential backoff and jitter, replaying the join each time.

use std::future::Future;
use std::time::Duration;

use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::{RealtimeConfig, RemoteConfig};

use super::message::RemoteRecord;
use super::protocol::{self, Inbound};

/// Delay before the first reconnect attempt.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Share of the delay added as random jitter at most.
const JITTER_RATIO: f64 = 0.25;

#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeEvent {
    /// Joined the channel. `reconnect` is true on every connection after the first.
    Connected { reconnect: bool },
    Insert(RemoteRecord),
    Disconnected { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Backoff { attempt: u32, delay: Duration },
    Closed,
}

#[derive(Debug, Clone)]
pub struct RealtimeOptions {
    pub schema: String,
    pub table: String,
    pub heartbeat: Duration,
    pub reconnect: bool,
    pub max_backoff: Duration,
}

impl RealtimeOptions {
    pub fn from_config(remote: &RemoteConfig, realtime: &RealtimeConfig) -> Self {
        Self {
            schema: remote.schema.clone(),
            table: remote.table.clone(),
            heartbeat: Duration::from_secs(realtime.heartbeat_secs.max(1)),
            reconnect: realtime.reconnect,
            max_backoff: Duration::from_secs(realtime.max_backoff_secs.max(1)),
        }
    }
}

/// Exponential reconnect delay: 1s, 2s, 4s, ... capped, plus up to 25% jitter.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(max: Duration) -> Self {
        Self {
            initial: Duration::from_millis(INITIAL_BACKOFF_MS),
            max,
            attempt: 0,
        }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay for a given attempt; `jitter` is a sample from `[0, 1)`.
    pub fn delay_for(&self, attempt: u32, jitter: f64) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        let base = self.initial.saturating_mul(factor).min(self.max);
        base + base.mul_f64(JITTER_RATIO * jitter.clamp(0.0, 1.0))
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.delay_for(self.attempt, rand::random::<f64>());
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// Realtime endpoint for a store base URL: `wss://host/realtime/v1/websocket`.
pub fn endpoint(base: &Url, api_key: &str) -> Result<Url, url::ParseError> {
    let mut url = base.join("realtime/v1/websocket")?;
    let scheme = if url.scheme() == "http" { "ws" } else { "wss" };
    // Switching between special schemes cannot fail
    let _ = url.set_scheme(scheme);
    url.query_pairs_mut()
        .clear()
        .append_pair("apikey", api_key)
        .append_pair("vsn", "1.0.0");
    Ok(url)
}

/// Handle to a running subscription.
pub struct Subscription {
    shutdown: watch::Sender<bool>,
    state: watch::Receiver<ConnectionState>,
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Close the socket and wait for the task to finish.
    pub async fn unsubscribe(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Realtime task ended abnormally");
        }
    }
}

/// Open the push channel. Inserted records and connection changes arrive
/// on `events` in receipt order.
pub fn subscribe(
    url: Url,
    options: RealtimeOptions,
    events: mpsc::Sender<RealtimeEvent>,
) -> Subscription {
    let connect = move || {
        let url = url.clone();
        async move {
            tokio_tungstenite::connect_async(url.as_str())
                .await
                .map(|(socket, _)| socket)
        }
    };
    spawn_with(connect, options, events)
}

/// Run a subscription over sockets produced by `connect`, called once per attempt.
fn spawn_with<C, Fut, S>(
    connect: C,
    options: RealtimeOptions,
    events: mpsc::Sender<RealtimeEvent>,
) -> Subscription
where
    C: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<S, tungstenite::Error>> + Send + 'static,
    S: Stream<Item = Result<Message, tungstenite::Error>>
        + Sink<Message, Error = tungstenite::Error>
        + Unpin
        + Send
        + 'static,
{
    let (shutdown, shutdown_rx) = watch::channel(false);
    let (state_tx, state) = watch::channel(ConnectionState::Connecting);
    let task = tokio::spawn(run(connect, options, events, state_tx, shutdown_rx));
    Subscription {
        shutdown,
        state,
        task,
    }
}

#[derive(Debug)]
enum SessionEnd {
    Shutdown,
    Dropped(String),
}

async fn run<C, Fut, S>(
    mut connect: C,
    options: RealtimeOptions,
    events: mpsc::Sender<RealtimeEvent>,
    state: watch::Sender<ConnectionState>,
    mut shutdown: watch::Receiver<bool>,
) where
    C: FnMut() -> Fut,
    Fut: Future<Output = Result<S, tungstenite::Error>>,
    S: Stream<Item = Result<Message, tungstenite::Error>>
        + Sink<Message, Error = tungstenite::Error>
        + Unpin,
{
    let mut backoff = Backoff::new(options.max_backoff);
    let mut connected_before = false;

    loop {
        state.send_replace(ConnectionState::Connecting);

        let connected = tokio::select! {
            result = connect() => result,
            _ = shutdown.changed() => break,
        };

        match connected {
            Ok(socket) => {
                backoff.reset();
                state.send_replace(ConnectionState::Open);
                info!(reconnect = connected_before, "Realtime connected");

                let event = RealtimeEvent::Connected {
                    reconnect: connected_before,
                };
                connected_before = true;
                if events.send(event).await.is_err() {
                    break;
                }

                match run_session(socket, &options, &events, &mut shutdown).await {
                    SessionEnd::Shutdown => break,
                    SessionEnd::Dropped(reason) => {
                        warn!(reason = %reason, "Realtime connection dropped");
                        if events
                            .send(RealtimeEvent::Disconnected { reason })
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "Realtime connection failed");
            }
        }

        if !options.reconnect || *shutdown.borrow() {
            break;
        }

        let attempt = backoff.attempt();
        let delay = backoff.next_delay();
        debug!(attempt, delay_ms = delay.as_millis() as u64, "Reconnecting after backoff");
        state.send_replace(ConnectionState::Backoff { attempt, delay });

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => break,
        }
    }

    state.send_replace(ConnectionState::Closed);
    debug!("Realtime subscription closed");
}

async fn run_session<S>(
    socket: S,
    options: &RealtimeOptions,
    events: &mpsc::Sender<RealtimeEvent>,
    shutdown: &mut watch::Receiver<bool>,
) -> SessionEnd
where
    S: Stream<Item = Result<Message, tungstenite::Error>>
        + Sink<Message, Error = tungstenite::Error>
        + Unpin,
{
    let (mut sink, mut stream) = socket.split();
    let mut next_ref: u64 = 1;
    let mut reference = || {
        let current = next_ref.to_string();
        next_ref += 1;
        current
    };

    let join = protocol::join_frame(&options.schema, &options.table, &reference());
    if let Err(reason) = send_frame(&mut sink, &join).await {
        return SessionEnd::Dropped(reason);
    }

    let mut heartbeat = interval_at(Instant::now() + options.heartbeat, options.heartbeat);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                let frame = protocol::heartbeat_frame(&reference());
                if let Err(reason) = send_frame(&mut sink, &frame).await {
                    return SessionEnd::Dropped(reason);
                }
            }
            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => match protocol::decode(&text) {
                    Ok(Inbound::Insert(record)) => {
                        if events.send(RealtimeEvent::Insert(record)).await.is_err() {
                            return SessionEnd::Shutdown;
                        }
                    }
                    Ok(Inbound::Reply { topic, status }) => {
                        debug!(topic = %topic, status = ?status, "Realtime reply");
                    }
                    Ok(Inbound::Other(event)) => {
                        debug!(event = %event, "Ignoring realtime event");
                    }
                    Err(e) => {
                        debug!(error = %e, "Discarding malformed realtime frame");
                    }
                },
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| f.reason.to_string())
                        .filter(|r| !r.is_empty())
                        .unwrap_or_else(|| "closed by server".to_string());
                    return SessionEnd::Dropped(reason);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return SessionEnd::Dropped(e.to_string()),
                None => return SessionEnd::Dropped("stream ended".to_string()),
            },
            _ = shutdown.changed() => {
                let _ = sink.send(Message::Close(None)).await;
                return SessionEnd::Shutdown;
            }
        }
    }
}

async fn send_frame<K>(sink: &mut K, frame: &protocol::Frame) -> Result<(), String>
where
    K: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let text = frame.encode().map_err(|e| e.to_string())?;
    sink.send(Message::Text(text)).await.map_err(|e| e.to_string())
}
