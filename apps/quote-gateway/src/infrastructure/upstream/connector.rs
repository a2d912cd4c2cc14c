//! Upstream Connector
//!
//! Owns the one logical connection to a provider's realtime feed.
//!
//! # State machine
//!
//! `Disconnected → Connecting → Connected → Disconnected → ...` for the life
//! of the process. Each pass through `Connecting` obtains a fresh approval
//! key and tries the codec's candidate endpoints in order.
//!
//! # Commands
//!
//! Registry commands queue on an unbounded channel. While connected they are
//! applied to the route table and written through. While not connected they
//! stay queued; on the next connect the queue is discarded and the registry's
//! active route set is replayed instead, so nothing is lost and a subscribe
//! followed by an unsubscribe during an outage cancels out.
//!
//! # Failures
//!
//! - Transport errors, auth failures, heartbeat timeouts: exponential backoff.
//! - Approval key conflicts: a fixed cool-down, then after repeated conflicts
//!   the provider is marked unavailable and parked for a recovery window.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::codec::{CodecError, DecodedFrame, FeedCodec};
use super::heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatManager, HeartbeatState};
use super::provider::Provider;
use super::reconnect::{
    ConflictAction, ConflictConfig, ConflictTracker, ReconnectConfig, ReconnectPolicy,
};
use super::routes::RouteTable;
use super::state::{ConnectionState, FeedState};
use super::transport::{Connection, Transport, TransportError, WireMessage, WireSink};
use crate::application::ports::{ApprovalKey, ApprovalKeyError, ApprovalKeyIssuer};
use crate::domain::subscription::UpstreamCommand;
use crate::infrastructure::broadcast::SubscriptionRegistry;
use crate::infrastructure::config::UpstreamSettings;
use crate::infrastructure::metrics;

// =============================================================================
// Error Type
// =============================================================================

/// Errors that end one upstream connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    /// Approval key issuance failed.
    #[error("approval key unavailable: {0}")]
    Auth(#[from] ApprovalKeyError),

    /// Approval key issuance timed out.
    #[error("approval key request timed out")]
    AuthTimeout,

    /// Every candidate endpoint failed.
    #[error("all {attempted} endpoints failed, last error: {last_error}")]
    NoEndpoint {
        /// Number of endpoints tried.
        attempted: usize,
        /// Error from the last endpoint.
        last_error: String,
    },

    /// Transport error on an open connection.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Command encoding failed.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The approval key is in use by another session.
    #[error("approval key already in use")]
    Conflict,

    /// Nothing heard within the heartbeat idle timeout.
    #[error("heartbeat timeout")]
    HeartbeatTimeout,

    /// The provider closed the connection.
    #[error("connection closed")]
    Closed,
}

// =============================================================================
// Configuration
// =============================================================================

/// Connector configuration.
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    /// Backoff for transient failures.
    pub reconnect: ReconnectConfig,
    /// Keepalive and idle detection.
    pub heartbeat: HeartbeatConfig,
    /// Approval key conflict handling.
    pub conflict: ConflictConfig,
    /// Bound on one approval key request.
    pub auth_timeout: Duration,
    /// Registrations allowed per provider session.
    pub max_routes: usize,
    /// Gap between unsubscribes on shutdown.
    pub shutdown_spacing: Duration,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            conflict: ConflictConfig::default(),
            auth_timeout: Duration::from_secs(8),
            max_routes: usize::MAX,
            shutdown_spacing: Duration::from_millis(100),
        }
    }
}

impl ConnectorConfig {
    /// Create configuration from `UpstreamSettings`.
    #[must_use]
    pub fn from_settings(settings: &UpstreamSettings) -> Self {
        Self {
            reconnect: ReconnectConfig::from_settings(settings),
            heartbeat: HeartbeatConfig::from_settings(settings),
            conflict: ConflictConfig::from_settings(settings),
            auth_timeout: settings.auth_timeout,
            max_routes: usize::MAX,
            shutdown_spacing: Duration::from_millis(100),
        }
    }

    /// Limit registrations per session.
    #[must_use]
    pub const fn with_max_routes(mut self, max_routes: usize) -> Self {
        self.max_routes = max_routes;
        self
    }
}

// =============================================================================
// Connector
// =============================================================================

/// Generic upstream connector driven by a provider codec.
pub struct UpstreamConnector {
    codec: Arc<dyn FeedCodec>,
    transport: Arc<dyn Transport>,
    issuer: Arc<dyn ApprovalKeyIssuer>,
    registry: Arc<SubscriptionRegistry>,
    config: ConnectorConfig,
    commands: Mutex<Option<mpsc::UnboundedReceiver<UpstreamCommand>>>,
    task: Mutex<Option<JoinHandle<()>>>,
    state: Arc<FeedState>,
    cancel: CancellationToken,
}

/// Per-run bookkeeping carried across connections.
struct RunState {
    commands: mpsc::UnboundedReceiver<UpstreamCommand>,
    table: RouteTable,
    policy: ReconnectPolicy,
    conflicts: ConflictTracker,
}

impl UpstreamConnector {
    /// Create a connector. Nothing happens until [`Self::ensure_connected`].
    #[must_use]
    pub fn new(
        codec: Arc<dyn FeedCodec>,
        transport: Arc<dyn Transport>,
        issuer: Arc<dyn ApprovalKeyIssuer>,
        registry: Arc<SubscriptionRegistry>,
        commands: mpsc::UnboundedReceiver<UpstreamCommand>,
        config: ConnectorConfig,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        let state = Arc::new(FeedState::new(codec.provider()));
        Arc::new(Self {
            codec,
            transport,
            issuer,
            registry,
            config,
            commands: Mutex::new(Some(commands)),
            task: Mutex::new(None),
            state,
            cancel,
        })
    }

    /// Provider this connector serves.
    #[must_use]
    pub fn provider(&self) -> Provider {
        self.codec.provider()
    }

    /// Shared feed state.
    #[must_use]
    pub fn state(&self) -> Arc<FeedState> {
        Arc::clone(&self.state)
    }

    /// Registry this connector dispatches into.
    #[must_use]
    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    /// Whether new subscriptions should be routed here.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.state.is_available()
    }

    /// Whether the connection loop has been started.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task.lock().is_some()
    }

    /// Start the connection loop if it is not already running.
    pub fn ensure_connected(self: &Arc<Self>) {
        let mut task = self.task.lock();
        if task.is_some() || self.cancel.is_cancelled() {
            return;
        }
        let Some(commands) = self.commands.lock().take() else {
            return;
        };

        tracing::info!(provider = %self.provider(), "Starting upstream connector");
        *task = Some(tokio::spawn(Arc::clone(self).run(commands)));
    }

    /// Wait up to `wait` for the connection loop to finish after cancellation.
    ///
    /// Returns `false` if it was still running when the wait elapsed.
    pub async fn join(&self, wait: Duration) -> bool {
        let handle = self.task.lock().take();
        match handle {
            Some(handle) => tokio::time::timeout(wait, handle).await.is_ok(),
            None => true,
        }
    }

    async fn run(self: Arc<Self>, commands: mpsc::UnboundedReceiver<UpstreamCommand>) {
        let provider = self.provider();
        let mut run = RunState {
            commands,
            table: RouteTable::new(self.config.max_routes),
            policy: ReconnectPolicy::new(self.config.reconnect.clone()),
            conflicts: ConflictTracker::new(self.config.conflict.clone()),
        };

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let result = self.connect_and_run(&mut run).await;
            self.state.set_state(ConnectionState::Disconnected);
            self.state.set_routes(0, 0);

            let delay = match result {
                Ok(()) => break,
                Err(ConnectorError::Conflict) => {
                    self.state.increment_conflicts();
                    self.state.set_error(ConnectorError::Conflict.to_string());
                    match run.conflicts.record() {
                        ConflictAction::CoolDown { retry, delay } => {
                            tracing::warn!(
                                provider = %provider,
                                retry,
                                delay_secs = delay.as_secs(),
                                "Approval key already in use, cooling down before reconnect"
                            );
                            delay
                        }
                        ConflictAction::Unavailable { delay } => {
                            tracing::error!(
                                provider = %provider,
                                delay_secs = delay.as_secs(),
                                "Approval key conflict retries exhausted, provider unavailable"
                            );
                            self.state.set_available(false);
                            delay
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(provider = %provider, error = %e, "Upstream connection error");
                    self.state.set_error(e.to_string());
                    self.state.increment_reconnect_attempts();
                    let delay = run.policy.next_delay();
                    tracing::info!(
                        provider = %provider,
                        attempt = run.policy.attempt_count(),
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Reconnecting to upstream"
                    );
                    delay
                }
            };

            tokio::select! {
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        self.state.set_state(ConnectionState::Disconnected);
        tracing::info!(provider = %provider, "Upstream connector stopped");
    }

    /// Connect and serve one session until it ends.
    ///
    /// `Ok(())` means the connector should stop; any error means reconnect.
    async fn connect_and_run(&self, run: &mut RunState) -> Result<(), ConnectorError> {
        let provider = self.provider();
        self.state.set_state(ConnectionState::Connecting);

        let key = tokio::time::timeout(self.config.auth_timeout, self.issuer.issue())
            .await
            .map_err(|_| ConnectorError::AuthTimeout)??;
        let Connection {
            mut sink,
            mut stream,
        } = self.dial(&key).await?;

        self.state.set_state(ConnectionState::Connected);
        run.policy.reset();

        let heartbeat_state = Arc::new(HeartbeatState::new());
        let (heartbeat_tx, mut heartbeat_rx) = mpsc::channel::<HeartbeatEvent>(10);
        let heartbeat_cancel = self.cancel.child_token();
        let _heartbeat_guard = heartbeat_cancel.clone().drop_guard();
        tokio::spawn(
            HeartbeatManager::new(
                self.config.heartbeat.clone(),
                Arc::clone(&heartbeat_state),
                heartbeat_tx,
                heartbeat_cancel,
            )
            .run(),
        );

        let settle = self.codec.settle_delay();
        if !settle.is_zero() {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    let _ = sink.send(WireMessage::Close).await;
                    return Ok(());
                }
                () = tokio::time::sleep(settle) => {}
            }
        }

        // The registry snapshot supersedes anything queued while disconnected.
        let mut discarded = 0_usize;
        while run.commands.try_recv().is_ok() {
            discarded += 1;
        }
        let replay = run.table.reset(self.registry.active_routes());
        tracing::info!(
            provider = %provider,
            routes = replay.len(),
            parked = run.table.parked_len(),
            discarded,
            "Replaying subscriptions"
        );
        for route in replay {
            self.send_command(&mut sink, &key, &UpstreamCommand::Subscribe(route))
                .await?;
        }
        self.publish_routes(&run.table);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    self.shutdown(&mut sink, &key, &run.table).await;
                    return Ok(());
                }
                event = heartbeat_rx.recv() => {
                    match event {
                        Some(HeartbeatEvent::SendPing) => {
                            let ping = self
                                .codec
                                .keepalive()
                                .map_or_else(|| WireMessage::Ping(Vec::new()), WireMessage::Text);
                            sink.send(ping).await?;
                        }
                        Some(HeartbeatEvent::Timeout) => return Err(ConnectorError::HeartbeatTimeout),
                        None => return Err(ConnectorError::Closed),
                    }
                }
                command = run.commands.recv() => {
                    let Some(command) = command else {
                        tracing::info!(provider = %provider, "Registry dropped, stopping connector");
                        self.shutdown(&mut sink, &key, &run.table).await;
                        return Ok(());
                    };
                    for outbound in run.table.apply(command) {
                        self.send_command(&mut sink, &key, &outbound).await?;
                    }
                    self.publish_routes(&run.table);
                }
                frame = stream.next() => {
                    match frame {
                        Some(Ok(WireMessage::Text(text))) => {
                            heartbeat_state.record_activity();
                            self.handle_text(&text, &mut sink, &mut run.conflicts).await?;
                        }
                        Some(Ok(WireMessage::Ping(data))) => {
                            heartbeat_state.record_activity();
                            sink.send(WireMessage::Pong(data)).await?;
                        }
                        Some(Ok(WireMessage::Pong(_))) => heartbeat_state.record_activity(),
                        Some(Ok(WireMessage::Close)) => {
                            tracing::info!(provider = %provider, "Provider sent close frame");
                            return Err(ConnectorError::Closed);
                        }
                        Some(Err(e)) => return Err(e.into()),
                        None => {
                            tracing::info!(provider = %provider, "Upstream stream ended");
                            return Err(ConnectorError::Closed);
                        }
                    }
                }
            }
        }
    }

    async fn dial(&self, key: &ApprovalKey) -> Result<Connection, ConnectorError> {
        let provider = self.provider();
        let endpoints = self.codec.endpoints(key);
        let mut last_error = String::from("no candidate endpoints");

        for endpoint in &endpoints {
            tracing::debug!(provider = %provider, url = %endpoint.url, "Dialing upstream endpoint");
            match self.transport.connect(endpoint).await {
                Ok(connection) => {
                    tracing::info!(provider = %provider, url = %endpoint.url, "Upstream connected");
                    return Ok(connection);
                }
                Err(e) => {
                    tracing::warn!(provider = %provider, url = %endpoint.url, error = %e, "Upstream endpoint failed");
                    last_error = e.to_string();
                }
            }
        }

        Err(ConnectorError::NoEndpoint {
            attempted: endpoints.len(),
            last_error,
        })
    }

    async fn handle_text(
        &self,
        text: &str,
        sink: &mut WireSink,
        conflicts: &mut ConflictTracker,
    ) -> Result<(), ConnectorError> {
        let provider = self.provider();
        let started = Instant::now();
        self.state.increment_messages();

        let frame = self.codec.decode(text);
        metrics::record_frame(provider, frame.kind());

        match frame {
            DecodedFrame::Ticks(ticks) => {
                conflicts.reset();
                for tick in &ticks {
                    self.registry.dispatch(tick);
                }
            }
            DecodedFrame::Ack => {
                conflicts.reset();
                tracing::debug!(provider = %provider, frame = text, "Upstream acknowledged");
            }
            DecodedFrame::ControlError { code, message } => {
                tracing::warn!(provider = %provider, code = %code, message = %message, "Upstream error response");
            }
            DecodedFrame::Conflict => {
                tracing::warn!(provider = %provider, "Approval key already in use, forcing disconnect");
                let _ = sink.send(WireMessage::Close).await;
                return Err(ConnectorError::Conflict);
            }
            DecodedFrame::KeepAlive(raw) => {
                sink.send(WireMessage::Text(raw)).await?;
            }
            DecodedFrame::Ignored => {
                tracing::trace!(provider = %provider, "Ignoring upstream frame");
            }
            DecodedFrame::Malformed { reason } => {
                self.state.increment_malformed();
                metrics::record_malformed(provider);
                tracing::debug!(provider = %provider, reason = %reason, "Dropping malformed frame");
            }
        }

        metrics::record_frame_processing(provider, started.elapsed());
        Ok(())
    }

    async fn send_command(
        &self,
        sink: &mut WireSink,
        key: &ApprovalKey,
        command: &UpstreamCommand,
    ) -> Result<(), ConnectorError> {
        let text = self.codec.encode(key, command)?;
        sink.send(WireMessage::Text(text)).await?;
        metrics::record_upstream_command(self.provider(), command.action());
        tracing::debug!(
            provider = %self.provider(),
            action = command.action(),
            route = %command.route(),
            "Upstream command sent"
        );
        Ok(())
    }

    async fn shutdown(&self, sink: &mut WireSink, key: &ApprovalKey, table: &RouteTable) {
        let routes = table.live().to_vec();
        tracing::info!(provider = %self.provider(), routes = routes.len(), "Unsubscribing before shutdown");

        for route in routes {
            if self
                .send_command(sink, key, &UpstreamCommand::Unsubscribe(route))
                .await
                .is_err()
            {
                break;
            }
            tokio::time::sleep(self.config.shutdown_spacing).await;
        }
        let _ = sink.send(WireMessage::Close).await;
    }

    fn publish_routes(&self, table: &RouteTable) {
        self.state.set_routes(table.live().len(), table.parked_len());
    }
}

impl std::fmt::Debug for UpstreamConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamConnector")
            .field("provider", &self.provider())
            .field("state", &self.state.state())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}
