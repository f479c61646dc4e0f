//! # Transport Abstraction
//!
//! The boundary to the AMQP-compatible broker client. Connection
//! establishment, recovery, and channel lifecycle live behind this trait;
//! the bus layer only declares topology, publishes tagged payloads, and
//! consumes deliveries.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Additional declaration arguments, as string pairs.
pub type Arguments = HashMap<String, String>;

/// Errors from transport operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The named exchange has not been declared.
    #[error("Unknown exchange '{0}'")]
    UnknownExchange(String),

    /// The named queue has not been declared.
    #[error("Unknown queue '{0}'")]
    UnknownQueue(String),

    /// The consumer tag is not registered.
    #[error("Unknown consumer tag '{0}'")]
    UnknownConsumer(String),

    /// The underlying client failed.
    #[error("Transport failure: {0}")]
    Failed(String),
}

/// Wire properties attached to a published message.
///
/// `type_tag` carries the message registry id; `message_id` is a fresh
/// unique token per publish. A response copies the request's `message_id`
/// into its `correlation_id` and routes to the request's `reply_to`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageProperties {
    /// Unique token generated for each publish.
    pub message_id: Option<String>,

    /// The wire type tag: the message registry id.
    #[serde(rename = "type")]
    pub type_tag: Option<String>,

    /// For responses: the `message_id` of the request being answered.
    pub correlation_id: Option<String>,

    /// Routing key a response to this message should be published under.
    pub reply_to: Option<String>,
}

/// One inbound delivery handed to a consumer.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Transport-assigned tag, used for acknowledgment.
    pub delivery_tag: u64,

    /// The delivery's wire properties.
    pub properties: MessageProperties,

    /// The payload bytes.
    pub body: Vec<u8>,
}

/// Receives deliveries for one consumer registration.
#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    /// Called once per inbound delivery, sequentially per consumer.
    async fn on_delivery(&self, delivery: Delivery);

    /// Called when the transport cancels the consumer.
    async fn on_cancel(&self) {}
}

/// An AMQP-compatible broker client.
///
/// Implementations own connection and channel state; all methods take
/// `&self` and may be called from any task.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Declares an exchange.
    async fn declare_exchange(
        &self,
        name: &str,
        kind: &str,
        durable: bool,
        auto_delete: bool,
        internal: bool,
        arguments: &Arguments,
    ) -> Result<(), TransportError>;

    /// Declares a queue.
    async fn declare_queue(
        &self,
        name: &str,
        durable: bool,
        exclusive: bool,
        auto_delete: bool,
        arguments: &Arguments,
    ) -> Result<(), TransportError>;

    /// Binds a queue to an exchange under a routing key.
    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), TransportError>;

    /// Removes a queue-to-exchange binding.
    async fn unbind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), TransportError>;

    /// Publishes a tagged payload to an exchange.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        mandatory: bool,
        immediate: bool,
        properties: MessageProperties,
        body: Vec<u8>,
    ) -> Result<(), TransportError>;

    /// Registers a consumer on a queue; deliveries flow to `handler` until
    /// the returned consumer tag is cancelled.
    async fn consume(
        &self,
        queue: &str,
        handler: Arc<dyn DeliveryHandler>,
    ) -> Result<String, TransportError>;

    /// Acknowledges a delivery.
    async fn basic_ack(&self, delivery_tag: u64, multiple: bool) -> Result<(), TransportError>;

    /// Cancels a consumer registration.
    async fn basic_cancel(&self, consumer_tag: &str) -> Result<(), TransportError>;
}
