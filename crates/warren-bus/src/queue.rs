//! # Queue and Subscription Dispatch
//!
//! The consume side of the bus. A queue owns a per-type dispatch table of
//! subscriptions and fans decoded messages out to every subscription
//! registered for the delivery's exact resolved type. Hierarchy fallback
//! happens only when the wire tag is resolved; the dispatch table itself is
//! keyed by exact type.
//!
//! Deliveries are acknowledged *before* decode and dispatch, trading
//! durability for freedom from redelivery storms: a failure mid-processing
//! loses the message and is visible only in the logs.
//!
//! Dispatch runs on the transport's consumer task. Subscriber callbacks are
//! invoked sequentially and synchronously; a consumer that needs to do
//! long-running work must hand off to its own task, because blocking here
//! stalls all deliveries to the queue.

use crate::exchange::Exchange;
use crate::message::MessageRegistry;
use crate::transport::{
    Arguments, Delivery, DeliveryHandler, MessageProperties, Transport, TransportError,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use thiserror::Error;
use tracing::{debug, error, info};
use warren_document::{DocumentCodec, DocumentType, DocumentValue};

/// Queue lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    /// Created, not yet declared against the transport.
    Idle,
    /// Queue declared, consumer registration underway.
    Declared,
    /// Steady state: deliveries are accepted and dispatched.
    Consuming,
    /// Terminal: no further dispatch occurs.
    Cancelled,
}

/// Errors from queue lifecycle operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// `connect` was called on a queue that is already connected.
    #[error("Queue '{0}' is already connected")]
    AlreadyConnected(String),

    /// The queue has been cancelled and cannot be reused.
    #[error("Queue '{0}' has been cancelled")]
    Cancelled(String),

    /// The transport refused an operation.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Declaration attributes for a queue.
#[derive(Debug, Clone, Default)]
pub struct QueueOptions {
    /// Survive a broker restart.
    pub durable: bool,
    /// Restricted to this connection.
    pub exclusive: bool,
    /// Delete when no longer in use.
    pub auto_delete: bool,
    /// Additional declaration arguments.
    pub arguments: Arguments,
}

/// A typed message consumer.
///
/// Failures are reported back as errors; the dispatcher logs them with the
/// delivery's metadata and continues with the remaining subscribers.
pub trait MessageConsumer: Send + Sync {
    /// Handles one decoded message.
    fn accept(
        &self,
        message: &DocumentValue,
        subscription: &Subscription,
        properties: &MessageProperties,
    ) -> anyhow::Result<()>;
}

impl<F> MessageConsumer for F
where
    F: Fn(&DocumentValue, &Subscription, &MessageProperties) -> anyhow::Result<()> + Send + Sync,
{
    fn accept(
        &self,
        message: &DocumentValue,
        subscription: &Subscription,
        properties: &MessageProperties,
    ) -> anyhow::Result<()> {
        self(message, subscription, properties)
    }
}

struct SubscriptionInner {
    id: u64,
    ty: DocumentType,
    consumer: Box<dyn MessageConsumer>,
    cancelled: AtomicBool,
    queue: Weak<QueueCore>,
}

/// A live registration of a consumer against a message type on a queue.
///
/// Cancelling is idempotent and commits immediately: once it returns, no
/// further invocation of the consumer is scheduled, including for the
/// remainder of a fan-out pass already in flight.
#[derive(Clone)]
pub struct Subscription {
    inner: Arc<SubscriptionInner>,
}

impl Subscription {
    /// Gets the message type this subscription is registered for.
    #[must_use]
    pub fn ty(&self) -> &DocumentType {
        &self.inner.ty
    }

    /// Tests if this subscription has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Removes this subscription from its queue's dispatch table.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(core) = self.inner.queue.upgrade() {
            core.remove_subscription(self.inner.id, &self.inner.ty);
            debug!(
                queue = %core.name,
                subscription = self.inner.id,
                "Subscription cancelled"
            );
        }
    }
}

struct StateCell {
    state: QueueState,
    consumer_tag: Option<String>,
}

struct QueueCore {
    name: String,
    options: QueueOptions,
    transport: Arc<dyn Transport>,
    registry: Arc<MessageRegistry>,
    codec: DocumentCodec,
    state: Mutex<StateCell>,
    /// The per-type dispatch table. All reads and writes are mutually
    /// exclusive under this lock; fan-out snapshots the bucket and invokes
    /// consumers outside it.
    subscriptions: Mutex<HashMap<DocumentType, Vec<Arc<SubscriptionInner>>>>,
    next_subscription_id: AtomicU64,
}

impl QueueCore {
    fn state(&self) -> QueueState {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .state
    }

    fn set_state(&self, state: QueueState) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .state = state;
    }

    fn remove_subscription(&self, id: u64, ty: &DocumentType) {
        let mut table = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(bucket) = table.get_mut(ty) {
            bucket.retain(|subscription| subscription.id != id);
            if bucket.is_empty() {
                table.remove(ty);
            }
        }
    }

    /// Steps 2-6 of the delivery algorithm: resolve, look up, decode, fan
    /// out. The delivery was already acked.
    fn dispatch(&self, properties: &MessageProperties, body: &[u8]) {
        let Some(type_tag) = properties.type_tag.as_deref() else {
            debug!(queue = %self.name, "Delivery carries no type tag, dropped");
            return;
        };
        let Some(ty) = self.registry.resolve(type_tag) else {
            debug!(queue = %self.name, type_tag, "Unknown type tag, dropped");
            return;
        };

        let snapshot: Vec<Arc<SubscriptionInner>> = {
            let table = self
                .subscriptions
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            table.get(&ty).cloned().unwrap_or_default()
        };
        if snapshot.is_empty() {
            debug!(queue = %self.name, type_tag, "No subscriptions for type, dropped");
            return;
        }

        let message = match self.codec.decode(&ty, body) {
            Ok(message) => message,
            Err(e) => {
                error!(
                    queue = %self.name,
                    type_tag,
                    message_id = ?properties.message_id,
                    error = %e,
                    "Failed to decode delivery, dropped"
                );
                return;
            }
        };

        for inner in snapshot {
            // cancellation may have committed since the snapshot, including
            // from an earlier consumer in this same pass
            if inner.cancelled.load(Ordering::Acquire) {
                continue;
            }
            let handle = Subscription {
                inner: Arc::clone(&inner),
            };
            if let Err(e) = inner.consumer.accept(&message, &handle, properties) {
                error!(
                    queue = %self.name,
                    subscription = inner.id,
                    message_id = ?properties.message_id,
                    type_tag,
                    error = %e,
                    "Subscriber failed, continuing delivery"
                );
            }
        }
    }
}

#[async_trait]
impl DeliveryHandler for QueueCore {
    async fn on_delivery(&self, delivery: Delivery) {
        if matches!(self.state(), QueueState::Idle | QueueState::Cancelled) {
            debug!(queue = %self.name, "Delivery outside consuming state, dropped");
            return;
        }

        // ack before processing: a crash during decode or dispatch must not
        // re-deliver this message
        if let Err(e) = self
            .transport
            .basic_ack(delivery.delivery_tag, false)
            .await
        {
            error!(
                queue = %self.name,
                delivery_tag = delivery.delivery_tag,
                error = %e,
                "Failed to ack delivery, dropped"
            );
            return;
        }

        self.dispatch(&delivery.properties, &delivery.body);
    }

    async fn on_cancel(&self) {
        info!(queue = %self.name, "Consume cancelled by transport");
        self.set_state(QueueState::Cancelled);
    }
}

/// An AMQP queue with typed subscription dispatch.
pub struct Queue {
    core: Arc<QueueCore>,
}

impl Queue {
    /// Creates a queue handle.
    ///
    /// The queue is not declared against the broker until
    /// [`connect`](Self::connect) is called.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        options: QueueOptions,
        transport: Arc<dyn Transport>,
        registry: Arc<MessageRegistry>,
        codec: DocumentCodec,
    ) -> Self {
        Self {
            core: Arc::new(QueueCore {
                name: name.into(),
                options,
                transport,
                registry,
                codec,
                state: Mutex::new(StateCell {
                    state: QueueState::Idle,
                    consumer_tag: None,
                }),
                subscriptions: Mutex::new(HashMap::new()),
                next_subscription_id: AtomicU64::new(0),
            }),
        }
    }

    /// Gets the queue name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// Tests if this queue is durable (survives a broker restart).
    #[must_use]
    pub fn durable(&self) -> bool {
        self.core.options.durable
    }

    /// Tests if this queue is exclusive (restricted to this connection).
    #[must_use]
    pub fn exclusive(&self) -> bool {
        self.core.options.exclusive
    }

    /// Tests if this queue auto-deletes when no longer in use.
    #[must_use]
    pub fn auto_delete(&self) -> bool {
        self.core.options.auto_delete
    }

    /// Gets the additional declaration arguments.
    #[must_use]
    pub fn arguments(&self) -> &Arguments {
        &self.core.options.arguments
    }

    /// Gets the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> QueueState {
        self.core.state()
    }

    /// Gets the number of live subscriptions across all types.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.core
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(Vec::len)
            .sum()
    }

    /// Declares this queue against the transport and starts consuming.
    ///
    /// # Errors
    ///
    /// `QueueError::AlreadyConnected` if called twice,
    /// `QueueError::Cancelled` if the queue reached its terminal state, or
    /// the transport's declaration/consume failure.
    pub async fn connect(&self) -> Result<(), QueueError> {
        {
            let cell = self
                .core
                .state
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            match cell.state {
                QueueState::Idle => {}
                QueueState::Declared | QueueState::Consuming => {
                    return Err(QueueError::AlreadyConnected(self.core.name.clone()));
                }
                QueueState::Cancelled => {
                    return Err(QueueError::Cancelled(self.core.name.clone()));
                }
            }
        }

        info!(queue = %self.core.name, "Declaring queue");
        self.core
            .transport
            .declare_queue(
                &self.core.name,
                self.core.options.durable,
                self.core.options.exclusive,
                self.core.options.auto_delete,
                &self.core.options.arguments,
            )
            .await?;
        self.core.set_state(QueueState::Declared);

        let handler: Arc<dyn DeliveryHandler> = Arc::clone(&self.core) as Arc<dyn DeliveryHandler>;
        let tag = self.core.transport.consume(&self.core.name, handler).await?;
        info!(queue = %self.core.name, consumer = %tag, "Consume started");

        let mut cell = self
            .core
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // transport-driven cancellation may already have won
        if cell.state == QueueState::Declared {
            cell.state = QueueState::Consuming;
        }
        cell.consumer_tag = Some(tag);
        Ok(())
    }

    /// Cancels the consumer and retires the queue. Terminal and idempotent.
    pub async fn disconnect(&self) -> Result<(), QueueError> {
        let tag = {
            let mut cell = self
                .core
                .state
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if cell.state == QueueState::Cancelled {
                return Ok(());
            }
            cell.state = QueueState::Cancelled;
            cell.consumer_tag.take()
        };

        if let Some(tag) = tag {
            info!(queue = %self.core.name, consumer = %tag, "Cancelling consume");
            match self.core.transport.basic_cancel(&tag).await {
                // the transport may have revoked the consumer already
                Ok(()) | Err(TransportError::UnknownConsumer(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Binds this queue to an exchange under a routing key.
    ///
    /// Binding failures are logged, not propagated.
    pub async fn bind(&self, exchange: &Exchange, routing_key: &str) {
        info!(
            queue = %self.core.name,
            exchange = %exchange.name(),
            routing_key,
            "Binding queue"
        );
        if let Err(e) = self
            .core
            .transport
            .bind_queue(&self.core.name, exchange.name(), routing_key)
            .await
        {
            error!(
                queue = %self.core.name,
                exchange = %exchange.name(),
                routing_key,
                error = %e,
                "Exception binding queue"
            );
        }
    }

    /// Removes a binding from this queue.
    ///
    /// Unbinding failures are logged, not propagated.
    pub async fn unbind(&self, exchange: &Exchange, routing_key: &str) {
        info!(
            queue = %self.core.name,
            exchange = %exchange.name(),
            routing_key,
            "Unbinding queue"
        );
        if let Err(e) = self
            .core
            .transport
            .unbind_queue(&self.core.name, exchange.name(), routing_key)
            .await
        {
            error!(
                queue = %self.core.name,
                exchange = %exchange.name(),
                routing_key,
                error = %e,
                "Exception unbinding queue"
            );
        }
    }

    /// Registers a consumer for a message type on this queue.
    ///
    /// Registering the same `(type, consumer)` pair twice yields two
    /// independent subscriptions; both receive every matching delivery.
    pub fn subscribe(
        &self,
        ty: &DocumentType,
        consumer: impl MessageConsumer + 'static,
    ) -> Subscription {
        let id = self.core.next_subscription_id.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::new(SubscriptionInner {
            id,
            ty: ty.clone(),
            consumer: Box::new(consumer),
            cancelled: AtomicBool::new(false),
            queue: Arc::downgrade(&self.core),
        });

        self.core
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(ty.clone())
            .or_default()
            .push(Arc::clone(&inner));
        debug!(queue = %self.core.name, ty = %ty, subscription = id, "Subscription created");

        Subscription { inner }
    }
}
