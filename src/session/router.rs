//! Routing of out-of-band messages onto open sessions.

use std::sync::Arc;
use std::time::Duration;

use tracing::instrument;

use crate::error::RelayError;

use super::connection::{CloseReason, StreamingConnection};
use super::handler::ProtocolHandler;
use super::lifecycle::LifecycleManager;
use super::registry::SessionRegistry;

/// Resolves inbound messages to a connection and hands them to its handler.
#[derive(Debug, Clone)]
pub struct MessageRouter {
    registry: SessionRegistry,
    lifecycle: LifecycleManager,
    handler: Arc<dyn ProtocolHandler>,
    delivery_timeout: Option<Duration>,
}

impl MessageRouter {
    pub fn new(
        registry: SessionRegistry,
        lifecycle: LifecycleManager,
        handler: Arc<dyn ProtocolHandler>,
    ) -> Self {
        Self {
            registry,
            lifecycle,
            handler,
            delivery_timeout: None,
        }
    }

    /// Bound each delivery; `None` waits as long as the handler takes.
    #[must_use]
    pub fn with_delivery_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.delivery_timeout = timeout;
        self
    }

    /// Deliver `payload` to the session named by `session_id`.
    ///
    /// Without an id, the payload goes to an arbitrary open session (see
    /// [`SessionRegistry::lookup_or_fallback`]).
    #[instrument(skip(self, payload), fields(resolved = tracing::field::Empty))]
    pub async fn route(
        &self,
        session_id: Option<&str>,
        payload: serde_json::Value,
    ) -> Result<Arc<StreamingConnection>, RelayError> {
        let Some(connection) = self.registry.lookup_or_fallback(session_id) else {
            tracing::warn!("No active connection for message");
            return Err(RelayError::NoActiveConnection(session_id.map(str::to_string)));
        };
        tracing::Span::current().record("resolved", tracing::field::display(connection.id()));

        if session_id.is_none() {
            tracing::debug!(
                session_id = %connection.id(),
                "Message without session id routed by fallback"
            );
        }

        self.deliver(&connection, payload).await?;
        Ok(connection)
    }

    async fn deliver(
        &self,
        connection: &StreamingConnection,
        payload: serde_json::Value,
    ) -> Result<(), RelayError> {
        if !connection.is_open() {
            return Err(RelayError::DeliveryFailed {
                session_id: connection.id().clone(),
                source: anyhow::anyhow!("connection closed before delivery"),
            });
        }

        let delivery = self.handler.handle(connection, payload);
        let outcome = match self.delivery_timeout {
            Some(limit) => match tokio::time::timeout(limit, delivery).await {
                Ok(result) => result,
                Err(_elapsed) => Err(anyhow::anyhow!(
                    "delivery timed out after {}s",
                    limit.as_secs_f32()
                )),
            },
            None => delivery.await,
        };

        outcome.map_err(|source| {
            // Only a dead channel takes the connection down with it.
            if !connection.is_writable() {
                self.lifecycle.close(connection, CloseReason::NotWritable);
            }
            tracing::error!(
                session_id = %connection.id(),
                error = %source,
                "Message delivery failed"
            );
            RelayError::DeliveryFailed {
                session_id: connection.id().clone(),
                source,
            }
        })
    }
}
