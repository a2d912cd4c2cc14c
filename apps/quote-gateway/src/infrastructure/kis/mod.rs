//! KIS realtime feed: codec, approval key issuer, and provider wiring.

pub mod auth;
pub mod codec;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

pub use auth::{AppCredentials, HttpApprovalKeyIssuer};
pub use codec::KisCodec;

use crate::application::ports::ApprovalKeyError;
use crate::domain::symbol::KisRouter;
use crate::infrastructure::broadcast::SubscriptionRegistry;
use crate::infrastructure::config::{KisSettings, UpstreamSettings};
use crate::infrastructure::upstream::{
    ConnectorConfig, Coverage, Provider, ProviderHandle, Transport, UpstreamConnector,
};

/// Wire the KIS registry and connector.
///
/// KIS covers every symbol. The connector is idle until the first session
/// asks for it.
///
/// # Errors
///
/// Returns an error if the approval key HTTP client cannot be built.
pub fn build_provider(
    settings: &KisSettings,
    upstream: &UpstreamSettings,
    channel_capacity: usize,
    transport: Arc<dyn Transport>,
    cancel: CancellationToken,
) -> Result<ProviderHandle, ApprovalKeyError> {
    let issuer = HttpApprovalKeyIssuer::new(
        &settings.rest_url,
        &settings.approval_path,
        settings.credentials.clone(),
        upstream.auth_timeout,
    )?;
    let codec = KisCodec::new(settings.ws_url.clone(), settings.credentials.app_key.clone());

    let (registry, commands) =
        SubscriptionRegistry::new(Provider::Kis, Arc::new(KisRouter), channel_capacity);
    let config = ConnectorConfig::from_settings(upstream).with_max_routes(settings.max_symbols);
    let connector = UpstreamConnector::new(
        Arc::new(codec),
        transport,
        Arc::new(issuer),
        Arc::clone(&registry),
        commands,
        config,
        cancel,
    );

    tracing::info!(
        ws_url = %settings.ws_url,
        max_symbols = settings.max_symbols,
        "KIS provider configured"
    );

    Ok(ProviderHandle {
        registry,
        connector,
        coverage: Coverage::All,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::upstream::MemoryTransport;

    #[tokio::test]
    async fn build_provider_wires_registry_and_connector() {
        let settings = KisSettings {
            credentials: AppCredentials::new("key", "secret"),
            ..KisSettings::default()
        };
        let handle = build_provider(
            &settings,
            &UpstreamSettings::default(),
            16,
            Arc::new(MemoryTransport::new()),
            CancellationToken::new(),
        )
        .unwrap();

        assert_eq!(handle.provider(), Provider::Kis);
        assert_eq!(handle.coverage, Coverage::All);
        assert!(handle.accepts("005930.KS"));
        assert!(!handle.connector.is_running());
    }
}
