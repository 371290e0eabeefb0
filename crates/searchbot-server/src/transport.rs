use async_trait::async_trait;
use searchbot_contracts::OutgoingMessage;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport http error: {0}")]
    Http(String),
    #[error("chat api error: {0}")]
    Api(String),
    #[error("file unavailable: {0}")]
    File(String),
}

/// Delivery side of a chat platform.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    fn name(&self) -> &str;

    /// Sends a message, or edits `edit_message_id` in place when set.
    async fn send(&self, message: &OutgoingMessage) -> Result<(), TransportError>;

    /// Acknowledges a button press so the client stops its progress indicator.
    async fn answer_button(&self, callback_id: &str) -> Result<(), TransportError>;

    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>, TransportError>;
}
