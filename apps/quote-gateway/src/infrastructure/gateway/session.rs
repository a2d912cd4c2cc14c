//! One client session: resolve, subscribe, stream, release.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::Instrument;
use uuid::Uuid;

use super::GatewayState;
use crate::application::services::{TickDeduplicator, resolve_tickers};
use crate::domain::quote::{ClientFrame, Tick};
use crate::infrastructure::broadcast::SubscriptionLease;
use crate::infrastructure::metrics;
use crate::infrastructure::upstream::Provider;

/// Merged tick buffer between forwarders and the socket writer.
const FORWARD_BUFFER: usize = 256;

/// Message sent when the ticker list is empty.
pub const EMPTY_TICKERS_ERROR: &str = "tickers required";

/// What a client asked for, already parsed from the query string.
#[derive(Debug, Clone)]
pub struct SessionRequest {
    /// Raw tickers, trimmed, blanks removed.
    pub tickers: Vec<String>,
    /// Exchange override.
    pub exchange: Option<String>,
    /// Heartbeat period.
    pub heartbeat: Duration,
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    ClientClosed,
    SendFailed,
    Shutdown,
    Rejected,
}

/// Subscriptions held by one session.
///
/// Dropping it aborts the forwarders and releases every lease, whatever the
/// exit path.
struct Subscriptions {
    leases: Vec<SubscriptionLease>,
    forwarders: JoinSet<()>,
}

/// Counts the session in the active gauge while alive.
struct ActiveSession {
    state: Arc<GatewayState>,
}

impl ActiveSession {
    fn open(state: Arc<GatewayState>) -> Self {
        state.session_opened();
        metrics::session_opened();
        Self { state }
    }
}

impl Drop for ActiveSession {
    fn drop(&mut self) {
        self.state.session_closed();
        metrics::session_closed();
    }
}

/// Serve one upgraded client socket until it goes away.
pub async fn run(socket: WebSocket, request: SessionRequest, state: Arc<GatewayState>) {
    let session_id = Uuid::new_v4();
    let span = tracing::info_span!("session", session_id = %session_id);
    let (sender, receiver) = socket.split();
    serve(sender, receiver, request, state).instrument(span).await;
}

async fn serve<S, R>(
    mut sender: S,
    mut receiver: R,
    request: SessionRequest,
    state: Arc<GatewayState>,
) -> Exit
where
    S: Sink<Message, Error = axum::Error> + Unpin,
    R: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let _active = ActiveSession::open(Arc::clone(&state));

    if request.tickers.is_empty() {
        tracing::info!("Rejecting session without tickers");
        let frame = ClientFrame::error(EMPTY_TICKERS_ERROR).to_json();
        let _ = sender.send(Message::Text(frame.into())).await;
        let _ = sender.send(Message::Close(None)).await;
        log_exit(Exit::Rejected, 0);
        return Exit::Rejected;
    }

    let resolved = resolve_tickers(
        state.resolver.as_ref(),
        &request.tickers,
        request.exchange.as_deref(),
        state.limits,
    )
    .await;

    tracing::info!(
        requested = request.tickers.len(),
        symbols = resolved.symbols.len(),
        fallbacks = resolved.fallbacks,
        heartbeat_secs = request.heartbeat.as_secs(),
        "Session started"
    );

    let (tick_tx, mut ticks) = mpsc::channel::<Tick>(FORWARD_BUFFER);
    let subscriptions = subscribe_all(&state, &resolved.symbols, &tick_tx);
    drop(tick_tx);

    let mut dedup = TickDeduplicator::new();
    let mut heartbeat = interval_at(Instant::now() + request.heartbeat, request.heartbeat);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let exit = loop {
        tokio::select! {
            () = state.cancel.cancelled() => {
                let _ = sender.send(Message::Close(None)).await;
                break Exit::Shutdown;
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_)) | Err(_)) | None => break Exit::ClientClosed,
                    Some(Ok(_)) => {}
                }
            }
            Some(tick) = ticks.recv() => {
                if !dedup.admit(&tick) {
                    continue;
                }
                if send_frame(&mut sender, &ClientFrame::from(&tick)).await.is_err() {
                    break Exit::SendFailed;
                }
            }
            _ = heartbeat.tick() => {
                if send_frame(&mut sender, &ClientFrame::heartbeat()).await.is_err() {
                    break Exit::SendFailed;
                }
            }
        }
    };

    let held = subscriptions.leases.len();
    drop(subscriptions);
    tracing::debug!(suppressed = dedup.suppressed(), "Duplicate ticks suppressed");
    log_exit(exit, held);
    exit
}

/// Subscribe every symbol on every provider that covers it.
fn subscribe_all(
    state: &GatewayState,
    symbols: &[String],
    tick_tx: &mpsc::Sender<Tick>,
) -> Subscriptions {
    let mut subscriptions = Subscriptions {
        leases: Vec::new(),
        forwarders: JoinSet::new(),
    };

    for symbol in symbols {
        let mut covered = false;
        for handle in state.providers.iter().filter(|h| h.accepts(symbol)) {
            handle.connector.ensure_connected();
            let (lease, rx) = handle.registry.lease(symbol);
            tracing::debug!(provider = %handle.provider(), symbol = %symbol, "Subscribed");
            subscriptions.leases.push(lease);
            subscriptions
                .forwarders
                .spawn(forward(handle.provider(), rx, tick_tx.clone()).in_current_span());
            covered = true;
        }
        if !covered {
            tracing::debug!(symbol = %symbol, "No available provider covers symbol");
        }
    }

    subscriptions
}

/// Copy one symbol channel into the session's merged buffer.
async fn forward(provider: Provider, mut rx: broadcast::Receiver<Tick>, tx: mpsc::Sender<Tick>) {
    loop {
        match rx.recv().await {
            Ok(tick) => {
                if tx.send(tick).await.is_err() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(provider = %provider, skipped, "Session lagging, ticks dropped");
                metrics::record_ticks_lagged(provider, skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn send_frame<S>(sender: &mut S, frame: &ClientFrame) -> Result<(), axum::Error>
where
    S: Sink<Message, Error = axum::Error> + Unpin,
{
    sender.send(Message::Text(frame.to_json().into())).await
}

fn log_exit(exit: Exit, released: usize) {
    tracing::info!(reason = ?exit, released, "Session ended");
}
