//! Downstream notifications: target resolution and retrying delivery.

pub mod notifier;
pub mod resolver;

pub use notifier::{DeliveryOutcome, DeliveryPolicy, Notifier};
pub use resolver::NotifyTargetResolver;
