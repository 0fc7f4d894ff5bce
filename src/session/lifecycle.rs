//! Connection establishment, liveness and teardown.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_stream::wrappers::ReceiverStream;
use tracing::instrument;

use crate::error::RelayError;

use super::connection::{CloseReason, Frame, SessionId, StreamingConnection};
use super::handler::ProtocolHandler;
use super::registry::SessionRegistry;

/// Default interval between keepalive frames.
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Default number of frames buffered per connection.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Establishes connections and guarantees their teardown.
///
/// Every connection created here ends up closed exactly once, whichever of
/// client disconnect, unwritable channel, handler bind failure or shutdown
/// happens first. Closing cancels the keepalive task, removes the registry
/// entry and drops the frame sender.
#[derive(Debug, Clone)]
pub struct LifecycleManager {
    registry: SessionRegistry,
    handler: Arc<dyn ProtocolHandler>,
    keepalive_interval: Duration,
    channel_capacity: usize,
    next_id: fn() -> SessionId,
}

impl LifecycleManager {
    pub fn new(registry: SessionRegistry, handler: Arc<dyn ProtocolHandler>) -> Self {
        Self {
            registry,
            handler,
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            next_id: SessionId::generate,
        }
    }

    /// Replace the session id source.
    #[cfg(test)]
    pub(crate) fn with_id_generator(mut self, next_id: fn() -> SessionId) -> Self {
        self.next_id = next_id;
        self
    }

    #[must_use]
    pub fn with_keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = interval;
        self
    }

    #[must_use]
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Open, register and start a new streaming connection.
    ///
    /// The returned stream yields the connection's frames, starting with a
    /// keepalive. Dropping it closes the connection.
    #[instrument(skip(self), fields(session_id = tracing::field::Empty))]
    pub fn establish(&self) -> Result<SessionStream, RelayError> {
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let id = (self.next_id)();
        tracing::Span::current().record("session_id", tracing::field::display(&id));

        let connection = Arc::new(StreamingConnection::new(id.clone(), tx));
        connection.mark_open();

        if let Err(e) = self.registry.register(id.clone(), Arc::clone(&connection)) {
            connection.close();
            tracing::error!(error = %e, "Session registration failed");
            return Err(e);
        }

        // Force header delivery before any protocol traffic.
        if connection.try_send_keepalive().is_err() {
            self.close(&connection, CloseReason::NotWritable);
        }

        self.spawn_keepalive(Arc::clone(&connection));
        self.spawn_attach(Arc::clone(&connection));

        tracing::info!(
            name: "session.opened",
            session_id = %id,
            active_sessions = self.registry.len(),
            "Session opened"
        );

        Ok(SessionStream {
            connection,
            frames: ReceiverStream::new(rx),
            lifecycle: self.clone(),
        })
    }

    /// Move `connection` to `Closed` and release everything it holds.
    ///
    /// Safe to call from any trigger, any number of times.
    pub fn close(&self, connection: &StreamingConnection, reason: CloseReason) {
        let transitioned = connection.close();
        self.registry.remove(connection.id().as_str());
        if !transitioned {
            return;
        }

        let age = (chrono::Utc::now() - connection.opened_at())
            .to_std()
            .unwrap_or_default();
        tracing::info!(
            name: "session.closed",
            session_id = %connection.id(),
            reason = reason.as_str(),
            age_ms = age.as_millis() as u64,
            active_sessions = self.registry.len(),
            "Session closed"
        );
    }

    /// Close every registered connection.
    pub fn shutdown(&self) {
        let connections = self.registry.drain();
        tracing::info!(count = connections.len(), "Closing all sessions");
        for connection in connections {
            self.close(&connection, CloseReason::Shutdown);
        }
    }

    fn spawn_keepalive(&self, connection: Arc<StreamingConnection>) {
        let lifecycle = self.clone();
        let token = connection.keepalive_token();
        let period = self.keepalive_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if connection.is_writable() && connection.try_send_keepalive().is_ok() {
                            tracing::trace!(session_id = %connection.id(), "Keepalive sent");
                        } else {
                            lifecycle.close(&connection, CloseReason::NotWritable);
                            break;
                        }
                    }
                }
            }
        });
    }

    fn spawn_attach(&self, connection: Arc<StreamingConnection>) {
        let lifecycle = self.clone();
        let handler = Arc::clone(&self.handler);

        tokio::spawn(async move {
            match handler.attach(&connection).await {
                Ok(()) => {
                    tracing::debug!(session_id = %connection.id(), "Protocol handler attached");
                }
                Err(source) => {
                    let err = RelayError::HandlerBind {
                        session_id: connection.id().clone(),
                        source,
                    };
                    tracing::error!(error = %err, "Protocol handler bind failed");
                    lifecycle.close(&connection, CloseReason::HandlerBindFailed);
                }
            }
        });
    }
}

/// Frames of one established connection, in write order.
///
/// Owned by the HTTP response body. When the client goes away the body is
/// dropped, which closes the connection.
#[derive(Debug)]
pub struct SessionStream {
    connection: Arc<StreamingConnection>,
    frames: ReceiverStream<Frame>,
    lifecycle: LifecycleManager,
}

impl SessionStream {
    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        self.connection.id()
    }

    #[must_use]
    pub fn connection(&self) -> &Arc<StreamingConnection> {
        &self.connection
    }

    /// Stop accepting frames without dropping the stream (a half-closed client).
    #[cfg(test)]
    pub(crate) fn close_channel(&mut self) {
        self.frames.close();
    }
}

impl Stream for SessionStream {
    type Item = Frame;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Frame>> {
        self.frames.poll_next_unpin(cx)
    }
}

impl Drop for SessionStream {
    fn drop(&mut self) {
        self.lifecycle
            .close(&self.connection, CloseReason::ClientDisconnected);
    }
}
