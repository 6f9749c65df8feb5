//! Real-time resource synchronization for OctoFHIR clients.
//!
//! One [`RealtimeClient`] per session owns a single push connection,
//! multiplexes logical subscriptions over it, recovers from network drops and
//! token expiry, and reconciles pushed updates into an authoritative
//! [`ResourceCache`].
//!
//! ```text
//! frame ─► TransportManager ─► parse_frame ─► EventDispatcher ─┬─► ResourceCache ─► updates()
//!                                                              ├─► subscription handlers
//!                                                              └─► message listeners
//! ```

pub mod auth;
pub mod backoff;
pub mod cache;
mod client;
pub mod config;
mod dispatcher;
pub mod error;
mod listeners;
pub mod protocol;
pub mod queue;
pub mod registry;
pub mod state;
pub mod transport;

pub use auth::TokenProvider;
pub use backoff::BackoffPolicy;
pub use cache::{CacheOutcome, CollectionKey, EchoPolicy, ResourceCache};
pub use client::{RealtimeClient, RealtimeClientBuilder};
pub use config::RealtimeConfig;
pub use error::{AuthError, ConfigError, ProtocolError, RealtimeError, RealtimeResult, TransportError};
pub use listeners::ListenerHandle;
pub use protocol::{InboundKind, InboundMessage, ServerError, ServerErrorCode};
pub use registry::{SubscriptionFilter, SubscriptionId, SubscriptionInfo, UpdateHandler};
pub use state::{ConnectionSnapshot, ConnectionState, ConnectionStatus};
pub use transport::{Connection, Connector, TransportFrame, WsConnector};

// Re-export the event model consumers receive.
pub use octofhir_core::{ResourceUpdateEvent, UpdateAction};
