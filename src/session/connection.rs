//! A single client-facing streaming connection.

use std::borrow::Borrow;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Opaque identifier naming one open streaming connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh random identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl Borrow<str> for SessionId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// One unit written onto a streaming connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// No-op frame that keeps intermediaries from timing the stream out.
    Keepalive,
    /// A named event carrying a data payload.
    Event { event: String, data: String },
}

impl Frame {
    pub fn event(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self::Event {
            event: event.into(),
            data: data.into(),
        }
    }
}

/// Lifecycle state of a [`StreamingConnection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

/// Why a connection entered the `Closed` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The client went away and the response stream was dropped.
    ClientDisconnected,
    /// The liveness timer found the channel no longer writable.
    NotWritable,
    /// Binding the protocol handler failed.
    HandlerBindFailed,
    /// The server is shutting down.
    Shutdown,
}

impl CloseReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClientDisconnected => "client_disconnected",
            Self::NotWritable => "not_writable",
            Self::HandlerBindFailed => "handler_bind_failed",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Returned when writing to a connection whose channel is gone.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("connection '{0}' is closed")]
pub struct ConnectionClosed(pub SessionId);

#[derive(Debug)]
struct ConnectionInner {
    state: ConnectionState,
    sender: Option<mpsc::Sender<Frame>>,
}

/// A long-lived server-to-client channel.
///
/// The connection owns the sending half of its frame channel and the
/// cancellation token of its liveness timer. Both are released exactly once,
/// by [`StreamingConnection::close`].
#[derive(Debug)]
pub struct StreamingConnection {
    id: SessionId,
    opened_at: DateTime<Utc>,
    keepalive: CancellationToken,
    inner: Mutex<ConnectionInner>,
}

impl StreamingConnection {
    /// Create a connection in the `Connecting` state around `sender`.
    pub(crate) fn new(id: SessionId, sender: mpsc::Sender<Frame>) -> Self {
        Self {
            id,
            opened_at: Utc::now(),
            keepalive: CancellationToken::new(),
            inner: Mutex::new(ConnectionInner {
                state: ConnectionState::Connecting,
                sender: Some(sender),
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    #[must_use]
    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.lock().state
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Whether a frame written now could still reach the client.
    #[must_use]
    pub fn is_writable(&self) -> bool {
        let guard = self.lock();
        guard.state == ConnectionState::Open
            && guard.sender.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Token cancelled when the connection closes.
    pub(crate) fn keepalive_token(&self) -> CancellationToken {
        self.keepalive.clone()
    }

    pub(crate) fn mark_open(&self) -> bool {
        let mut guard = self.lock();
        if guard.state == ConnectionState::Connecting {
            guard.state = ConnectionState::Open;
            true
        } else {
            false
        }
    }

    /// Write a frame, waiting for channel capacity if needed.
    ///
    /// A close that happens while waiting fails the write; nothing reaches the
    /// channel once the connection is `Closed`.
    pub async fn send(&self, frame: Frame) -> Result<(), ConnectionClosed> {
        // Never hold the state lock across the await.
        let sender = {
            let guard = self.lock();
            match (&guard.state, &guard.sender) {
                (ConnectionState::Open, Some(tx)) => tx.clone(),
                _ => return Err(ConnectionClosed(self.id.clone())),
            }
        };

        let permit = tokio::select! {
            biased;
            () = self.keepalive.cancelled() => return Err(ConnectionClosed(self.id.clone())),
            permit = sender.reserve() => {
                permit.map_err(|_send_err| ConnectionClosed(self.id.clone()))?
            }
        };

        // Commit under the lock so a concurrent close wins or loses atomically.
        let guard = self.lock();
        if guard.state != ConnectionState::Open {
            return Err(ConnectionClosed(self.id.clone()));
        }
        permit.send(frame);
        Ok(())
    }

    /// Write a keepalive frame without waiting.
    ///
    /// A full channel means frames are already pending for the client, so the
    /// keepalive is skipped rather than queued.
    pub(crate) fn try_send_keepalive(&self) -> Result<(), ConnectionClosed> {
        let guard = self.lock();
        let Some(tx) = guard.sender.as_ref() else {
            return Err(ConnectionClosed(self.id.clone()));
        };
        match tx.try_send(Frame::Keepalive) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => Ok(()),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(ConnectionClosed(self.id.clone())),
        }
    }

    /// Enter `Closed`, cancel the timer and release the channel.
    ///
    /// Returns `true` only for the call that performed the transition.
    pub(crate) fn close(&self) -> bool {
        let sender = {
            let mut guard = self.lock();
            if guard.state == ConnectionState::Closed {
                return false;
            }
            guard.state = ConnectionState::Closed;
            guard.sender.take()
        };
        self.keepalive.cancel();
        drop(sender);
        true
    }

    fn lock(&self) -> MutexGuard<'_, ConnectionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_connection() -> (StreamingConnection, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(4);
        let conn = StreamingConnection::new(SessionId::from("test"), tx);
        assert!(conn.mark_open());
        (conn, rx)
    }

    #[tokio::test]
    async fn test_send_while_open() {
        let (conn, mut rx) = open_connection();
        conn.send(Frame::event("message", "{}")).await.unwrap();
        assert_eq!(rx.recv().await, Some(Frame::event("message", "{}")));
    }

    #[tokio::test]
    async fn test_close_is_exactly_once() {
        let (conn, mut rx) = open_connection();
        let token = conn.keepalive_token();

        assert!(conn.close());
        assert!(!conn.close());
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(token.is_cancelled());

        // Sender released: the receiving side sees end-of-stream.
        assert_eq!(rx.recv().await, None);
        assert_eq!(
            conn.send(Frame::Keepalive).await,
            Err(ConnectionClosed(SessionId::from("test")))
        );
    }

    #[tokio::test]
    async fn test_close_fails_blocked_send() {
        let (tx, mut rx) = mpsc::channel(1);
        let conn = std::sync::Arc::new(StreamingConnection::new(SessionId::from("busy"), tx));
        conn.mark_open();
        conn.send(Frame::Keepalive).await.unwrap();

        // Channel full: this write waits for capacity.
        let writer = tokio::spawn({
            let conn = std::sync::Arc::clone(&conn);
            async move { conn.send(Frame::event("message", "late")).await }
        });
        tokio::task::yield_now().await;
        assert!(!writer.is_finished());

        assert!(conn.close());
        assert_eq!(
            writer.await.unwrap(),
            Err(ConnectionClosed(SessionId::from("busy")))
        );

        // Only the frame written before the close is delivered.
        assert_eq!(rx.recv().await, Some(Frame::Keepalive));
        assert_eq!(rx.recv().await, None);
    }

    #[test]
    fn test_writable_tracks_receiver() {
        let (conn, rx) = open_connection();
        assert!(conn.is_writable());
        drop(rx);
        assert!(!conn.is_writable());
        assert!(conn.try_send_keepalive().is_err());
    }

    #[test]
    fn test_keepalive_skipped_when_full() {
        let (tx, _rx) = mpsc::channel(1);
        let conn = StreamingConnection::new(SessionId::from("full"), tx);
        conn.mark_open();
        assert!(conn.try_send_keepalive().is_ok());
        assert!(conn.try_send_keepalive().is_ok());
    }

    #[test]
    fn test_connecting_is_not_writable() {
        let (tx, _rx) = mpsc::channel(1);
        let conn = StreamingConnection::new(SessionId::generate(), tx);
        assert_eq!(conn.state(), ConnectionState::Connecting);
        assert!(!conn.is_writable());
    }
}
