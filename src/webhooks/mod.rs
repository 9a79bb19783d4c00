/// Inbound payment provider webhooks
pub mod event;
pub mod processor;
pub mod signature;

pub use processor::{WebhookOutcome, WebhookProcessor, WebhookSummary};
pub use signature::{SignatureError, SignatureVerifier};
