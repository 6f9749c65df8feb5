//! Event dispatcher.
//!
//! Classifies decoded frames and fans updates out. Every update is applied to
//! the cache first, whether or not any handler matches, then delivered to
//! each matching subscription and finally to `update` message listeners.

use std::sync::Arc;

use octofhir_core::ResourceUpdateEvent;
use tracing::{debug, warn};

use crate::client::Shared;
use crate::listeners::invoke_isolated;
use crate::protocol::{InboundMessage, ServerError};

/// Follow-up work the connection task owns.
#[derive(Debug)]
pub(crate) enum Routed {
    Delivered,
    /// Session established. Listeners are notified by the caller once
    /// resubscription has completed.
    Welcome(String),
    AuthRejected(ServerError),
}

pub(crate) struct EventDispatcher {
    shared: Arc<Shared>,
}

impl EventDispatcher {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Route one inbound message. `client_id` is the current session id.
    pub(crate) fn route(&self, message: &InboundMessage, client_id: Option<&str>) -> Routed {
        match message {
            InboundMessage::Welcome { client_id } => return Routed::Welcome(client_id.clone()),
            InboundMessage::Error(error) if error.is_auth() => {
                warn!(code = %error.code.as_str(), "Server rejected credentials");
                return Routed::AuthRejected(error.clone());
            }
            InboundMessage::Error(error) => {
                warn!(
                    code = %error.code.as_str(),
                    message = error.message.as_deref().unwrap_or(""),
                    "Server reported error"
                );
            }
            InboundMessage::Update(event) => self.deliver_update(event, client_id),
            InboundMessage::SubscriptionAck(ack) => {
                debug!(ack = %ack, "Subscription acknowledged");
            }
            InboundMessage::Ping | InboundMessage::Pong => {}
        }
        self.notify(message);
        Routed::Delivered
    }

    pub(crate) fn notify(&self, message: &InboundMessage) {
        self.shared.listeners.emit_message(message);
    }

    fn deliver_update(&self, event: &ResourceUpdateEvent, client_id: Option<&str>) {
        let outcome = self.shared.cache.apply(event, client_id);
        if outcome.changed() {
            self.shared.updates.send(event.clone());
        }

        let handlers = self.shared.registry.read().matching(event);
        debug!(
            reference = %event.reference(),
            action = %event.action,
            outcome = ?outcome,
            handlers = handlers.len(),
            "Update dispatched"
        );
        for (id, handler) in handlers {
            invoke_isolated(id.as_str(), || handler.handle(event));
        }
    }
}
