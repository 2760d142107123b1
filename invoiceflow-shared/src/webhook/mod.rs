/// Outbound webhook delivery
///
/// See [`dispatcher`] for the delivery client.

pub mod dispatcher;

pub use dispatcher::{DeliveryResult, WebhookDispatcher, WebhookEvent};
