//! Resilient streaming feeds.
//!
//! `StreamingFeed` owns one background receive task per instance. The
//! task connects, sends the protocol's subscription, parses frames into
//! the feed's state and reconnects with exponential backoff for as long
//! as the feed is running. Readers get non-blocking snapshots through a
//! `watch` channel; only the receive task ever writes.
//!
//! Two protocols plug into it:
//! - [`ticker::TickerProtocol`]: single-symbol last-trade price (lead source)
//! - [`order_book::OrderBookProtocol`]: best bid/ask for a two-token venue

pub mod backoff;
pub mod order_book;
pub mod ticker;

pub use backoff::Backoff;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, timeout, Instant, MissedTickBehavior};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{protocol::Message, Error as WsError},
};
use tracing::{debug, info, warn};

use crate::config::FeedTuning;

/// Poll step while `start()` waits for a first value.
const FIRST_VALUE_POLL: Duration = Duration::from_millis(100);

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("WebSocket connection failed: {0}")]
    Connection(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    #[error("Connection timeout")]
    Timeout,

    #[error("Stream ended unexpectedly")]
    StreamEnded,

    #[error("Malformed message: {0}")]
    Malformed(String),
}

impl From<serde_json::Error> for FeedError {
    fn from(e: serde_json::Error) -> Self {
        FeedError::Malformed(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Protocol seam
// ---------------------------------------------------------------------------

/// Wire protocol of one feed: what to subscribe to and how to fold a
/// text frame into the feed's state.
pub trait FeedProtocol: Send + Sync + 'static {
    type State: Clone + Default + fmt::Debug + Send + Sync + 'static;

    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Message sent right after the connection opens.
    fn subscription(&self) -> Option<String> {
        None
    }

    /// Apply one text frame.
    ///
    /// `Ok(true)` if the state changed, `Ok(false)` if the frame was
    /// irrelevant or implausible, `Err` if it could not be parsed. On
    /// error the state must be left untouched.
    fn apply(&self, text: &str, state: &mut Self::State) -> Result<bool, FeedError>;

    /// Whether the state holds a usable value yet.
    fn has_value(state: &Self::State) -> bool;
}

// ---------------------------------------------------------------------------
// Settings & snapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct FeedSettings {
    pub url: String,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub connect_timeout: Duration,
    pub ping_interval: Duration,
    pub first_value_timeout: Duration,
    pub stop_timeout: Duration,
}

impl FeedSettings {
    pub fn from_tuning(url: &str, tuning: &FeedTuning) -> Self {
        Self {
            url: url.to_string(),
            backoff_base: Duration::from_millis(tuning.backoff_base_ms),
            backoff_max: Duration::from_millis(tuning.backoff_max_ms),
            connect_timeout: Duration::from_millis(tuning.connect_timeout_ms),
            ping_interval: Duration::from_secs(tuning.ping_interval_secs.max(1)),
            first_value_timeout: Duration::from_millis(tuning.first_value_timeout_ms),
            stop_timeout: Duration::from_millis(tuning.stop_timeout_ms),
        }
    }
}

/// Point-in-time copy of a feed's state.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FeedSnapshot<S> {
    pub value: S,
    /// Delay the next reconnect would wait.
    pub backoff: Duration,
    pub reconnects: u64,
    pub connected: bool,
    pub last_update: Option<DateTime<Utc>>,
}

/// Invoked from the receive task after every accepted update.
pub type UpdateCallback<S> = Arc<dyn Fn(&S) + Send + Sync>;

// ---------------------------------------------------------------------------
// Feed
// ---------------------------------------------------------------------------

pub struct StreamingFeed<P: FeedProtocol> {
    protocol: Arc<P>,
    settings: FeedSettings,
    state: Arc<watch::Sender<FeedSnapshot<P::State>>>,
    on_update: Option<UpdateCallback<P::State>>,
    shutdown: Option<broadcast::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl<P: FeedProtocol> StreamingFeed<P> {
    pub fn new(protocol: P, settings: FeedSettings) -> Self {
        let initial = FeedSnapshot {
            backoff: settings.backoff_base,
            ..FeedSnapshot::default()
        };
        let (tx, _rx) = watch::channel(initial);
        Self {
            protocol: Arc::new(protocol),
            settings,
            state: Arc::new(tx),
            on_update: None,
            shutdown: None,
            task: None,
        }
    }

    /// Register a callback fired on every accepted update.
    pub fn with_callback(mut self, callback: UpdateCallback<P::State>) -> Self {
        self.on_update = Some(callback);
        self
    }

    pub fn protocol(&self) -> &P {
        &self.protocol
    }

    /// Spawn the receive loop and wait (bounded) for a first value.
    ///
    /// Returns whether a value arrived in time. A `false` is not fatal:
    /// the loop keeps running and reconnecting in the background.
    pub async fn start(&mut self) -> bool {
        if self.task.is_some() {
            return self.has_value();
        }

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(run_loop(
            Arc::clone(&self.protocol),
            self.settings.clone(),
            Arc::clone(&self.state),
            self.on_update.clone(),
            shutdown_rx,
        ));
        self.shutdown = Some(shutdown_tx);
        self.task = Some(handle);

        info!(feed = self.protocol.name(), url = %self.settings.url, "Feed started");

        let deadline = Instant::now() + self.settings.first_value_timeout;
        loop {
            if self.has_value() {
                return true;
            }
            if Instant::now() >= deadline {
                warn!(
                    feed = self.protocol.name(),
                    waited_ms = self.settings.first_value_timeout.as_millis() as u64,
                    "No first value yet, continuing in background"
                );
                return false;
            }
            sleep(FIRST_VALUE_POLL).await;
        }
    }

    /// Request shutdown and wait (bounded) for the loop to exit.
    ///
    /// Safe to call repeatedly or before `start()`.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(mut handle) = self.task.take() {
            match timeout(self.settings.stop_timeout, &mut handle).await {
                Ok(_) => debug!(feed = self.protocol.name(), "Feed task joined"),
                Err(_) => {
                    warn!(feed = self.protocol.name(), "Feed task did not exit in time, aborting");
                    handle.abort();
                }
            }
            info!(feed = self.protocol.name(), "Feed stopped");
        }
        self.state.send_modify(|s| s.connected = false);
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Latest state, never blocks on the network.
    pub fn snapshot(&self) -> FeedSnapshot<P::State> {
        self.state.borrow().clone()
    }

    pub fn value(&self) -> P::State {
        self.state.borrow().value.clone()
    }

    pub fn has_value(&self) -> bool {
        P::has_value(&self.state.borrow().value)
    }

    /// Receiver notified on every state change.
    pub fn subscribe(&self) -> watch::Receiver<FeedSnapshot<P::State>> {
        self.state.subscribe()
    }
}

impl<P: FeedProtocol> Drop for StreamingFeed<P> {
    fn drop(&mut self) {
        if let Some(handle) = self.task.take() {
            handle.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Receive loop
// ---------------------------------------------------------------------------

async fn run_loop<P: FeedProtocol>(
    protocol: Arc<P>,
    settings: FeedSettings,
    state: Arc<watch::Sender<FeedSnapshot<P::State>>>,
    on_update: Option<UpdateCallback<P::State>>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut backoff = Backoff::new(settings.backoff_base, settings.backoff_max);

    loop {
        let result = run_connection(
            protocol.as_ref(),
            &settings,
            &state,
            on_update.as_ref(),
            &mut backoff,
            &mut shutdown,
        )
        .await;

        match result {
            Ok(()) => {
                info!(feed = protocol.name(), "Feed shutdown requested");
                return;
            }
            Err(e) => {
                let delay = backoff.next_delay();
                let next = backoff.current();
                let mut attempt = 0;
                state.send_modify(|s| {
                    s.connected = false;
                    s.reconnects += 1;
                    s.backoff = next;
                    attempt = s.reconnects;
                });
                warn!(
                    feed = protocol.name(),
                    error = %e,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Feed disconnected, reconnecting after backoff"
                );

                tokio::select! {
                    _ = sleep(delay) => {}
                    _ = shutdown.recv() => {
                        info!(feed = protocol.name(), "Feed shutdown during backoff");
                        return;
                    }
                }
            }
        }
    }
}

/// One connection lifetime. `Ok` only on requested shutdown.
async fn run_connection<P: FeedProtocol>(
    protocol: &P,
    settings: &FeedSettings,
    state: &watch::Sender<FeedSnapshot<P::State>>,
    on_update: Option<&UpdateCallback<P::State>>,
    backoff: &mut Backoff,
    shutdown: &mut broadcast::Receiver<()>,
) -> Result<(), FeedError> {
    debug!(feed = protocol.name(), url = %settings.url, "Connecting");

    let connect = timeout(settings.connect_timeout, connect_async(settings.url.as_str()));
    let (ws_stream, _response) = tokio::select! {
        res = connect => match res {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => return Err(FeedError::Connection(e.to_string())),
            Err(_) => return Err(FeedError::Timeout),
        },
        _ = shutdown.recv() => return Ok(()),
    };

    let (mut write, mut read) = ws_stream.split();

    if let Some(sub) = protocol.subscription() {
        write.send(Message::Text(sub.into())).await?;
        debug!(feed = protocol.name(), "Subscription sent");
    }

    state.send_modify(|s| s.connected = true);
    info!(feed = protocol.name(), "Connected");

    let mut ping = interval(settings.ping_interval);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ping.tick().await;

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_frame(protocol, state, on_update, backoff, text.as_str());
                    }
                    Some(Ok(Message::Ping(data))) => {
                        write.send(Message::Pong(data)).await?;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!(feed = protocol.name(), ?frame, "Closed by server");
                        return Err(FeedError::StreamEnded);
                    }
                    Some(Ok(_)) => {
                        // Pong, binary and raw frames carry nothing we use
                    }
                    Some(Err(e)) => return Err(FeedError::WebSocket(e)),
                    None => return Err(FeedError::StreamEnded),
                }
            }
            _ = ping.tick() => {
                write.send(Message::Ping(Vec::new().into())).await?;
            }
            _ = shutdown.recv() => {
                let _ = write.send(Message::Close(None)).await;
                return Ok(());
            }
        }
    }
}

/// Fold one frame into the shared state; malformed frames are dropped.
fn handle_frame<P: FeedProtocol>(
    protocol: &P,
    state: &watch::Sender<FeedSnapshot<P::State>>,
    on_update: Option<&UpdateCallback<P::State>>,
    backoff: &mut Backoff,
    text: &str,
) {
    let mut accepted = false;
    state.send_if_modified(|snapshot| match protocol.apply(text, &mut snapshot.value) {
        Ok(true) => {
            backoff.reset();
            snapshot.backoff = backoff.current();
            snapshot.last_update = Some(Utc::now());
            accepted = true;
            true
        }
        Ok(false) => false,
        Err(e) => {
            debug!(feed = protocol.name(), error = %e, "Dropping frame");
            false
        }
    });

    if accepted {
        if let Some(callback) = on_update {
            let value = state.borrow().value.clone();
            callback(&value);
        }
    }
}
