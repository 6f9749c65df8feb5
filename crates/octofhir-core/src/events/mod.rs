//! Resource update events shared between the realtime layer and its consumers.
//!
//! # Architecture
//!
//! ```text
//! push frame ──► RealtimeClient ──► ResourceCache
//!                                     │ (changed?)
//!                                     ▼
//!                              EventBroadcaster
//!                      (tokio::sync::broadcast channel)
//!                     │            │            │
//!                     ▼            ▼            ▼
//!                 workflow bus   UI state    audit log
//! ```
//!
//! # Module Structure
//!
//! - [`types`]: Event type definitions (`ResourceUpdateEvent`, `UpdateAction`)
//! - [`broadcaster`]: Event broadcasting infrastructure

pub mod broadcaster;
pub mod types;

pub use broadcaster::EventBroadcaster;
pub use types::{ResourceUpdateEvent, UpdateAction, resource_id_of, resource_type_of};
