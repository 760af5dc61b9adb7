use std::fmt;

#[derive(Debug)]
pub enum NotificationError {
    /// The request never got a response
    DeliveryFailed(String),
    /// The callback answered with a non-success status
    Rejected { status: u16 },
    SerializationError(String),
}

impl fmt::Display for NotificationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotificationError::DeliveryFailed(msg) => write!(f, "Webhook delivery failed: {}", msg),
            NotificationError::Rejected { status } => {
                write!(f, "Webhook rejected with HTTP status {}", status)
            }
            NotificationError::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
        }
    }
}

impl std::error::Error for NotificationError {}

impl From<serde_json::Error> for NotificationError {
    fn from(e: serde_json::Error) -> Self {
        NotificationError::SerializationError(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, NotificationError>;
