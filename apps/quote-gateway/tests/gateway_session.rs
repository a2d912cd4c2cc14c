//! Gateway Session Integration Tests
//!
//! Real WebSocket clients against the gateway router, backed by a KIS
//! provider and optionally a Finnhub provider, each on its own in-memory
//! transport.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;

use quote_gateway::application::ports::StaticApprovalKey;
use quote_gateway::application::services::ResolutionLimits;
use quote_gateway::domain::symbol::{FinnhubRouter, KisRouter};
use quote_gateway::infrastructure::finnhub::FinnhubCodec;
use quote_gateway::infrastructure::kis::KisCodec;
use quote_gateway::infrastructure::resolver::RuleBasedTickerResolver;
use quote_gateway::infrastructure::upstream::heartbeat::HeartbeatConfig;
use quote_gateway::infrastructure::upstream::reconnect::ReconnectConfig;
use quote_gateway::infrastructure::upstream::{
    ConnectorConfig, Coverage, MemoryPeer, MemoryTransport, Provider, ProviderHandle,
    UpstreamConnector,
};
use quote_gateway::{GatewayServer, GatewayState, SubscriptionRegistry};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(3);

struct Gateway {
    addr: SocketAddr,
    state: Arc<GatewayState>,
    transport: MemoryTransport,
    finnhub: MemoryTransport,
    registry: Arc<SubscriptionRegistry>,
    cancel: CancellationToken,
}

fn connector_config() -> ConnectorConfig {
    ConnectorConfig {
        reconnect: ReconnectConfig::new(
            Duration::from_millis(10),
            Duration::from_millis(50),
            2.0,
            0.0,
        ),
        heartbeat: HeartbeatConfig::new(Duration::from_secs(3600), Duration::from_secs(3600)),
        shutdown_spacing: Duration::from_millis(1),
        ..ConnectorConfig::default()
    }
}

fn kis_provider(transport: &MemoryTransport, cancel: &CancellationToken) -> ProviderHandle {
    let (registry, commands) = SubscriptionRegistry::new(Provider::Kis, Arc::new(KisRouter), 64);
    let connector = UpstreamConnector::new(
        Arc::new(KisCodec::new("mem://kis", "app-key").with_settle_delay(Duration::ZERO)),
        Arc::new(transport.clone()),
        Arc::new(StaticApprovalKey::new("approval")),
        Arc::clone(&registry),
        commands,
        connector_config(),
        cancel.child_token(),
    );
    ProviderHandle {
        registry,
        connector,
        coverage: Coverage::All,
    }
}

fn finnhub_provider(transport: &MemoryTransport, cancel: &CancellationToken) -> ProviderHandle {
    let (registry, commands) =
        SubscriptionRegistry::new(Provider::Finnhub, Arc::new(FinnhubRouter), 64);
    let connector = UpstreamConnector::new(
        Arc::new(FinnhubCodec::new("mem://finnhub")),
        Arc::new(transport.clone()),
        Arc::new(StaticApprovalKey::new("finnhub-token")),
        Arc::clone(&registry),
        commands,
        connector_config(),
        cancel.child_token(),
    );
    ProviderHandle {
        registry,
        connector,
        coverage: Coverage::ForeignOnly,
    }
}

impl Gateway {
    async fn start() -> Self {
        let transport = MemoryTransport::new();
        let cancel = CancellationToken::new();
        let kis = kis_provider(&transport, &cancel);
        let registry = Arc::clone(&kis.registry);
        Self::serve(vec![kis], transport, MemoryTransport::new(), registry, cancel).await
    }

    /// KIS first, Finnhub second, as the binary wires them.
    async fn start_with_finnhub() -> Self {
        let transport = MemoryTransport::new();
        let finnhub = MemoryTransport::new();
        let cancel = CancellationToken::new();
        let kis = kis_provider(&transport, &cancel);
        let registry = Arc::clone(&kis.registry);
        let providers = vec![kis, finnhub_provider(&finnhub, &cancel)];
        Self::serve(providers, transport, finnhub, registry, cancel).await
    }

    async fn start_without_providers() -> Self {
        let (registry, _commands) =
            SubscriptionRegistry::new(Provider::Kis, Arc::new(KisRouter), 4);
        Self::serve(
            Vec::new(),
            MemoryTransport::new(),
            MemoryTransport::new(),
            registry,
            CancellationToken::new(),
        )
        .await
    }

    async fn serve(
        providers: Vec<ProviderHandle>,
        transport: MemoryTransport,
        finnhub: MemoryTransport,
        registry: Arc<SubscriptionRegistry>,
        cancel: CancellationToken,
    ) -> Self {
        let state = Arc::new(GatewayState::new(
            providers,
            Arc::new(RuleBasedTickerResolver::new()),
            ResolutionLimits::default(),
            Duration::from_secs(15),
            cancel.clone(),
        ));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = GatewayServer::new(addr.port(), Arc::clone(&state), cancel.clone());
        tokio::spawn(server.serve(listener));

        Self {
            addr,
            state,
            transport,
            finnhub,
            registry,
            cancel,
        }
    }

    async fn connect(&self, query: &str) -> Client {
        let url = format!("ws://{}/ws/quotes?{query}", self.addr);
        let (client, _) = timeout(WAIT, connect_async(url)).await.unwrap().unwrap();
        client
    }

    async fn accept(&self) -> MemoryPeer {
        timeout(WAIT, self.transport.accept()).await.unwrap().unwrap()
    }

    async fn accept_finnhub(&self) -> MemoryPeer {
        timeout(WAIT, self.finnhub.accept()).await.unwrap().unwrap()
    }

    fn finnhub_registry(&self) -> &SubscriptionRegistry {
        &self.state.providers()[1].registry
    }
}

/// Next text frame as JSON, or `None` once the server closed.
async fn next_json(client: &mut Client) -> Option<Value> {
    loop {
        let message = timeout(WAIT, client.next()).await.expect("no frame received")?;
        match message {
            Ok(Message::Text(text)) => return Some(serde_json::from_str(text.as_str()).unwrap()),
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => {}
        }
    }
}

/// Next frame the provider peer received, as JSON.
async fn next_upstream(peer: &mut MemoryPeer) -> Value {
    let text = timeout(WAIT, peer.next_text()).await.unwrap().unwrap();
    serde_json::from_str(&text).unwrap()
}

/// `(tr_type, tr_key)` of the next KIS command.
async fn next_command(peer: &mut MemoryPeer) -> (String, String) {
    let frame = next_upstream(peer).await;
    (
        frame["header"]["tr_type"].as_str().unwrap().to_string(),
        frame["body"]["input"]["tr_key"].as_str().unwrap().to_string(),
    )
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached");
}

#[tokio::test]
async fn empty_ticker_list_is_rejected() {
    let gateway = Gateway::start().await;
    let mut client = gateway.connect("tickers=%20,%20").await;

    assert_eq!(
        next_json(&mut client).await,
        Some(json!({"error": "tickers required"}))
    );
    assert_eq!(next_json(&mut client).await, None);
    assert!(gateway.transport.attempts().is_empty());
}

#[tokio::test]
async fn heartbeat_follows_interval_hint() {
    let gateway = Gateway::start_without_providers().await;
    let mut client = gateway.connect("tickers=AAPL&intervalSec=1").await;

    // The hint is clamped to two seconds.
    let started = tokio::time::Instant::now();
    assert_eq!(next_json(&mut client).await, Some(json!({"hb": 1})));
    assert!(started.elapsed() >= Duration::from_millis(1500));
    assert_eq!(gateway.state.active_sessions(), 1);
}

#[tokio::test]
async fn ticks_are_streamed_and_deduplicated() {
    let gateway = Gateway::start().await;
    let mut client = gateway.connect("tickers=005930").await;

    let mut peer = gateway.accept().await;
    assert_eq!(next_command(&mut peer).await, ("1".to_string(), "005930".to_string()));
    assert_eq!(gateway.registry.refcount("005930.KS"), 1);

    peer.send_text("0|H0STCNT0|001|005930^093000^71200^5^-300^-0.42");
    peer.send_text("0|H0STCNT0|001|005930^093001^71200^5^-300^-0.42");
    peer.send_text("0|H0STCNT0|001|005930^093002^71300^5^-200^-0.28");

    let first = next_json(&mut client).await.unwrap();
    assert_eq!(first["symbol"], "005930.KS");
    assert_eq!(first["price"], 71200.0);
    assert!((first["dp"].as_f64().unwrap() + 0.0042).abs() < 1e-9);

    let second = next_json(&mut client).await.unwrap();
    assert_eq!(second["price"], 71300.0);
}

#[tokio::test]
async fn exchange_override_changes_subscribed_symbol() {
    let gateway = Gateway::start().await;
    let _client = gateway.connect("tickers=035720&exchange=KQ").await;

    let mut peer = gateway.accept().await;
    assert_eq!(next_command(&mut peer).await, ("1".to_string(), "035720".to_string()));
    assert_eq!(gateway.registry.refcount("035720.KQ"), 1);
    assert_eq!(gateway.registry.refcount("035720.KS"), 0);
}

#[tokio::test]
async fn sessions_share_one_upstream_registration() {
    let gateway = Gateway::start().await;
    let mut first = gateway.connect("tickers=AAPL").await;
    let mut peer = gateway.accept().await;
    assert_eq!(next_command(&mut peer).await, ("1".to_string(), "AAPL".to_string()));

    let mut second = gateway.connect("tickers=aapl").await;
    wait_until(|| gateway.registry.refcount("AAPL") == 2).await;

    first.close(None).await.unwrap();
    wait_until(|| gateway.registry.refcount("AAPL") == 1).await;
    assert!(peer.drain_texts().is_empty());

    peer.send_text("0|HDFSCNT0|001|AAPL^093000^190.5^5^1.2^0.63");
    let tick = next_json(&mut second).await.unwrap();
    assert_eq!(tick["symbol"], "AAPL");

    second.close(None).await.unwrap();
    assert_eq!(next_command(&mut peer).await, ("2".to_string(), "AAPL".to_string()));
    wait_until(|| gateway.state.active_sessions() == 0).await;
    assert!(!gateway.registry.has_channel("AAPL"));
}

#[tokio::test]
async fn client_messages_are_ignored() {
    let gateway = Gateway::start_without_providers().await;
    let mut client = gateway.connect("tickers=AAPL&intervalSec=2").await;

    client
        .send(Message::Text(r#"{"subscribe":"MSFT"}"#.into()))
        .await
        .unwrap();
    assert_eq!(next_json(&mut client).await, Some(json!({"hb": 1})));
}

#[tokio::test]
async fn shutdown_closes_open_sessions() {
    let gateway = Gateway::start().await;
    let mut client = gateway.connect("tickers=AAPL").await;
    let mut peer = gateway.accept().await;
    next_command(&mut peer).await;

    gateway.cancel.cancel();
    assert_eq!(next_json(&mut client).await, None);
    wait_until(|| gateway.registry.refcount("AAPL") == 0).await;
}

fn commands(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(tr_type, tr_key)| ((*tr_type).to_string(), (*tr_key).to_string()))
        .collect()
}

#[tokio::test]
async fn dropped_client_releases_each_symbol_once() {
    let gateway = Gateway::start().await;
    let client = gateway.connect("tickers=005930,AAPL").await;
    let mut peer = gateway.accept().await;

    let mut subscribed = vec![next_command(&mut peer).await, next_command(&mut peer).await];
    subscribed.sort();
    assert_eq!(subscribed, commands(&[("1", "005930"), ("1", "AAPL")]));

    // No close frame: the socket just goes away.
    drop(client);

    let mut released = vec![next_command(&mut peer).await, next_command(&mut peer).await];
    released.sort();
    assert_eq!(released, commands(&[("2", "005930"), ("2", "AAPL")]));

    wait_until(|| gateway.state.active_sessions() == 0).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(peer.drain_texts().is_empty());
    assert_eq!(gateway.registry.refcount("005930.KS"), 0);
    assert_eq!(gateway.registry.refcount("AAPL"), 0);
}

#[tokio::test]
async fn client_vanishing_mid_stream_releases_each_symbol_once() {
    let gateway = Gateway::start().await;
    let mut client = gateway.connect("tickers=005930,AAPL").await;
    let mut peer = gateway.accept().await;
    next_command(&mut peer).await;
    next_command(&mut peer).await;

    peer.send_text("0|H0STCNT0|001|005930^093000^71200^5^-300^-0.42");
    assert_eq!(next_json(&mut client).await.unwrap()["symbol"], "005930.KS");

    drop(client);
    for price in 1..=20 {
        peer.send_text(format!("0|HDFSCNT0|001|AAPL^093000^{price}^5^0^0"));
        peer.send_text(format!("0|H0STCNT0|001|005930^093000^{price}^5^0^0"));
    }

    let mut released = vec![next_command(&mut peer).await, next_command(&mut peer).await];
    released.sort();
    assert_eq!(released, commands(&[("2", "005930"), ("2", "AAPL")]));

    wait_until(|| gateway.state.active_sessions() == 0).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(peer.drain_texts().is_empty());
}

#[tokio::test]
async fn both_providers_feed_one_session_without_repeats() {
    let gateway = Gateway::start_with_finnhub().await;
    let mut client = gateway.connect("tickers=AAPL").await;

    let mut kis = gateway.accept().await;
    let mut finnhub = gateway.accept_finnhub().await;
    assert_eq!(next_command(&mut kis).await, ("1".to_string(), "AAPL".to_string()));
    assert_eq!(
        next_upstream(&mut finnhub).await,
        json!({"type": "subscribe", "symbol": "AAPL"})
    );
    assert_eq!(finnhub.url, "mem://finnhub?token=finnhub-token");
    assert_eq!(gateway.registry.refcount("AAPL"), 1);
    assert_eq!(gateway.finnhub_registry().refcount("AAPL"), 1);

    kis.send_text("0|HDFSCNT0|001|AAPL^093000^190.5^5^1.2^0.63");
    let first = next_json(&mut client).await.unwrap();
    assert_eq!(first["symbol"], "AAPL");
    assert_eq!(first["price"], 190.5);
    assert!((first["dp"].as_f64().unwrap() - 0.0063).abs() < 1e-9);

    // Same price from the second provider is a repeat; the next one is news.
    finnhub.send_text(r#"{"type":"trade","data":[{"s":"AAPL","p":190.5}]}"#);
    finnhub.send_text(r#"{"type":"trade","data":[{"s":"AAPL","p":191.0}]}"#);
    let second = next_json(&mut client).await.unwrap();
    assert_eq!(second, json!({"symbol": "AAPL", "price": 191.0, "dp": null}));

    client.close(None).await.unwrap();
    assert_eq!(next_command(&mut kis).await, ("2".to_string(), "AAPL".to_string()));
    assert_eq!(
        next_upstream(&mut finnhub).await,
        json!({"type": "unsubscribe", "symbol": "AAPL"})
    );
}

#[tokio::test]
async fn unavailable_provider_is_skipped() {
    let gateway = Gateway::start_with_finnhub().await;
    gateway.state.providers()[0]
        .connector
        .state()
        .set_available(false);

    let mut client = gateway.connect("tickers=005930,AAPL&intervalSec=2").await;
    let mut finnhub = gateway.accept_finnhub().await;
    assert_eq!(
        next_upstream(&mut finnhub).await,
        json!({"type": "subscribe", "symbol": "AAPL"})
    );

    // 005930 has no other provider; the session stays up regardless.
    assert_eq!(next_json(&mut client).await, Some(json!({"hb": 1})));
    assert!(gateway.transport.attempts().is_empty());
    assert_eq!(gateway.registry.stats().symbols, 0);
    assert_eq!(gateway.finnhub_registry().refcount("AAPL"), 1);
    assert_eq!(gateway.finnhub_registry().refcount("005930.KS"), 0);
    assert!(finnhub.drain_texts().is_empty());
}
