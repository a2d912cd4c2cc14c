//! Upstream Provider Connectivity
//!
//! Everything needed to hold one realtime connection per provider:
//!
//! - `codec`: the provider wire-format interface
//! - `transport`: WebSocket and in-memory connection factories
//! - `reconnect`: backoff and approval-key conflict policy
//! - `heartbeat`: keepalive and idle detection
//! - `routes`: per-session registration limit
//! - `state`: shared connection state for health reporting
//! - `connector`: the connection state machine

pub mod codec;
pub mod connector;
pub mod heartbeat;
pub mod provider;
pub mod reconnect;
pub mod routes;
pub mod state;
pub mod transport;

pub use codec::{CodecError, DecodedFrame, FeedCodec, RawTick};
pub use connector::{ConnectorConfig, ConnectorError, UpstreamConnector};
pub use provider::{Coverage, Provider, ProviderHandle};
pub use state::{ConnectionState, FeedSnapshot, FeedState};
pub use transport::{
    Endpoint, MemoryPeer, MemoryTransport, Transport, TransportError, WireMessage, WsTransport,
};
