//! Finnhub trade feed: codec and provider wiring.

pub mod codec;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

pub use codec::FinnhubCodec;

use crate::application::ports::StaticApprovalKey;
use crate::domain::symbol::FinnhubRouter;
use crate::infrastructure::broadcast::SubscriptionRegistry;
use crate::infrastructure::config::{FinnhubSettings, UpstreamSettings};
use crate::infrastructure::upstream::{
    ConnectorConfig, Coverage, Provider, ProviderHandle, Transport, UpstreamConnector,
};

/// Interval between JSON keepalive frames.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Wire the Finnhub registry and connector.
///
/// Finnhub only covers foreign symbols and has no registration cap.
#[must_use]
pub fn build_provider(
    settings: &FinnhubSettings,
    upstream: &UpstreamSettings,
    channel_capacity: usize,
    transport: Arc<dyn Transport>,
    cancel: CancellationToken,
) -> ProviderHandle {
    let (registry, commands) =
        SubscriptionRegistry::new(Provider::Finnhub, Arc::new(FinnhubRouter), channel_capacity);

    let mut config = ConnectorConfig::from_settings(upstream);
    config.heartbeat.ping_interval = KEEPALIVE_INTERVAL;

    let connector = UpstreamConnector::new(
        Arc::new(FinnhubCodec::new(settings.ws_url.clone())),
        transport,
        Arc::new(StaticApprovalKey::new(settings.api_key.clone())),
        Arc::clone(&registry),
        commands,
        config,
        cancel,
    );

    tracing::info!(ws_url = %settings.ws_url, "Finnhub provider configured");

    ProviderHandle {
        registry,
        connector,
        coverage: Coverage::ForeignOnly,
    }
}
