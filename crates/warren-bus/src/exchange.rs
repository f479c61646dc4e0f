//! # Exchange
//!
//! The publish side of the bus. An exchange resolves a message's registry
//! id, encodes the value through the document codec, stamps wire properties,
//! and hands the tagged payload to the transport.

use crate::message::{MessageRegistry, RegistryError};
use crate::transport::{Arguments, MessageProperties, Transport, TransportError};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};
use uuid::Uuid;
use warren_document::{DocumentCodec, DocumentValue};

/// The exchange kind, one of the builtin AMQP types or a custom one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeKind {
    /// Routes on an exact routing-key match.
    Direct,
    /// Routes to every bound queue, ignoring the routing key.
    Fanout,
    /// Routes on pattern-matched routing keys.
    Topic,
    /// Routes on header tables.
    Headers,
    /// A broker-specific exchange type.
    Custom(String),
}

impl ExchangeKind {
    /// Gets the wire name of this kind.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            ExchangeKind::Direct => "direct",
            ExchangeKind::Fanout => "fanout",
            ExchangeKind::Topic => "topic",
            ExchangeKind::Headers => "headers",
            ExchangeKind::Custom(kind) => kind,
        }
    }
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declaration attributes for an exchange.
#[derive(Debug, Clone, Default)]
pub struct ExchangeOptions {
    /// Survive a broker restart.
    pub durable: bool,
    /// Delete when no longer in use.
    pub auto_delete: bool,
    /// Internal exchanges cannot be published to directly by clients.
    pub internal: bool,
    /// Additional declaration arguments.
    pub arguments: Arguments,
}

/// Per-publish options.
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    /// Return the message if it cannot be routed.
    pub mandatory: bool,
    /// Return the message if it cannot be delivered immediately.
    pub immediate: bool,
    /// Correlation id to stamp on the message.
    pub correlation_id: Option<String>,
    /// Routing key responses to this message should use.
    pub reply_to: Option<String>,
}

/// Errors surfaced to publish callers.
///
/// Only caller bugs surface here; encoding and transport failures are
/// logged and the publish abandoned (see [`Exchange::publish_with`]).
#[derive(Debug, Error)]
pub enum PublishError {
    /// The message's shape (and every ancestor) is unregistered.
    #[error(transparent)]
    Unregistered(#[from] RegistryError),

    /// A response was attempted to a request that carries no `reply_to`.
    #[error("Request {message_id:?} has no reply_to, cannot respond")]
    NoReplyTo { message_id: Option<String> },
}

/// An AMQP exchange with typed publishing.
pub struct Exchange {
    name: String,
    kind: ExchangeKind,
    options: ExchangeOptions,
    transport: Arc<dyn Transport>,
    registry: Arc<MessageRegistry>,
    codec: DocumentCodec,
}

impl Exchange {
    /// Creates an exchange handle.
    ///
    /// The exchange is not declared against the broker until
    /// [`declare`](Self::declare) is called.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        kind: ExchangeKind,
        options: ExchangeOptions,
        transport: Arc<dyn Transport>,
        registry: Arc<MessageRegistry>,
        codec: DocumentCodec,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            options,
            transport,
            registry,
            codec,
        }
    }

    /// Gets the exchange name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Gets the exchange kind.
    #[must_use]
    pub fn kind(&self) -> &ExchangeKind {
        &self.kind
    }

    /// Tests if this exchange is durable (survives a broker restart).
    #[must_use]
    pub fn durable(&self) -> bool {
        self.options.durable
    }

    /// Tests if this exchange auto-deletes when no longer in use.
    #[must_use]
    pub fn auto_delete(&self) -> bool {
        self.options.auto_delete
    }

    /// Tests if this exchange is internal.
    #[must_use]
    pub fn internal(&self) -> bool {
        self.options.internal
    }

    /// Gets the additional declaration arguments.
    #[must_use]
    pub fn arguments(&self) -> &Arguments {
        &self.options.arguments
    }

    /// Declares this exchange against the transport.
    pub async fn declare(&self) -> Result<(), TransportError> {
        info!(exchange = %self.name, kind = %self.kind, "Declaring exchange");
        self.transport
            .declare_exchange(
                &self.name,
                self.kind.as_str(),
                self.options.durable,
                self.options.auto_delete,
                self.options.internal,
                &self.options.arguments,
            )
            .await
    }

    /// Publishes a message under the given routing key with default
    /// options.
    pub async fn publish(
        &self,
        message: &DocumentValue,
        routing_key: &str,
    ) -> Result<(), PublishError> {
        self.publish_with(message, routing_key, PublishOptions::default())
            .await
    }

    /// Publishes a message under the given routing key.
    ///
    /// The wire properties carry a freshly generated `message_id` and the
    /// message's registry id as the type tag.
    ///
    /// An unregistered message shape is returned to the caller; that is a
    /// registration bug to fix, not a condition to retry. Encoding and
    /// transport failures, however, are logged and the publish abandoned:
    /// the message is lost, visible only in the logs. That trade-off keeps
    /// the publish path simple at the cost of durability; integrators that
    /// need guaranteed delivery must confirm publishes out of band.
    pub async fn publish_with(
        &self,
        message: &DocumentValue,
        routing_key: &str,
        options: PublishOptions,
    ) -> Result<(), PublishError> {
        let type_tag = self.registry.id_of(message.ty())?;

        let body = match self.codec.encode(message, message.ty()) {
            Ok(body) => body,
            Err(e) => {
                error!(
                    exchange = %self.name,
                    type_tag = %type_tag,
                    error = %e,
                    "Encoding failed, publish abandoned"
                );
                return Ok(());
            }
        };

        let properties = MessageProperties {
            message_id: Some(Uuid::new_v4().to_string()),
            type_tag: Some(type_tag.clone()),
            correlation_id: options.correlation_id,
            reply_to: options.reply_to,
        };

        if let Err(e) = self
            .transport
            .publish(
                &self.name,
                routing_key,
                options.mandatory,
                options.immediate,
                properties,
                body,
            )
            .await
        {
            error!(
                exchange = %self.name,
                routing_key,
                type_tag = %type_tag,
                error = %e,
                "Transport publish failed, message abandoned"
            );
        }
        Ok(())
    }

    /// Publishes a response to a previously received request.
    ///
    /// The request's `message_id` becomes the response's `correlation_id`,
    /// and the request's `reply_to` is used as the routing key.
    pub async fn respond(
        &self,
        request: &MessageProperties,
        message: &DocumentValue,
    ) -> Result<(), PublishError> {
        let Some(reply_to) = request.reply_to.clone() else {
            return Err(PublishError::NoReplyTo {
                message_id: request.message_id.clone(),
            });
        };
        let options = PublishOptions {
            correlation_id: request.message_id.clone(),
            ..PublishOptions::default()
        };
        self.publish_with(message, &reply_to, options).await
    }
}
