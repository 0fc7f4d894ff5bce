use async_trait::async_trait;

use super::connection::StreamingConnection;

/// Protocol spoken over a streaming connection.
///
/// The relay core calls [`attach`](ProtocolHandler::attach) once per new
/// connection and [`handle`](ProtocolHandler::handle) for each routed
/// payload. Replies are written onto the connection by the handler itself.
#[async_trait]
pub trait ProtocolHandler: Send + Sync + std::fmt::Debug {
    /// Bind the handler to a freshly opened connection.
    async fn attach(&self, connection: &StreamingConnection) -> anyhow::Result<()>;

    /// Process one inbound payload addressed to `connection`.
    async fn handle(
        &self,
        connection: &StreamingConnection,
        payload: serde_json::Value,
    ) -> anyhow::Result<()>;
}
