pub mod error;
pub mod webhook;

pub use error::{NotificationError, Result};
pub use webhook::{HttpWebhookDispatcher, MockWebhookDispatcher, WebhookDispatcher};
