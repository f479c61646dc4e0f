//! # In-Memory Transport
//!
//! A process-local broker implementing [`Transport`], used by the test
//! suites and by single-process deployments that want the typed bus without
//! a broker. Routing honors the declared exchange kind: direct matches the
//! routing key exactly, fanout delivers to every binding, topic matches
//! AMQP-style patterns (`*` one word, `#` zero or more words).
//!
//! Deliveries to one consumer are pumped sequentially through an unbounded
//! channel, so a queue's handler sees deliveries in publish order. Messages
//! published to a queue with no consumer are buffered until one attaches.
//! Competing consumers on the same queue are served round-robin.

use crate::transport::{
    Arguments, Delivery, DeliveryHandler, MessageProperties, Transport, TransportError,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, warn};

struct ExchangeRecord {
    kind: String,
}

#[derive(Default)]
struct QueueRecord {
    /// Messages waiting for a consumer to attach.
    pending: VecDeque<(MessageProperties, Vec<u8>)>,
    /// Consumer tags registered on this queue, in registration order.
    consumers: Vec<String>,
    /// Round-robin cursor over `consumers`.
    next: usize,
}

struct BindingRecord {
    exchange: String,
    queue: String,
    routing_key: String,
}

struct ConsumerRecord {
    queue: String,
    sender: mpsc::UnboundedSender<Delivery>,
    handler: Arc<dyn DeliveryHandler>,
}

/// A process-local [`Transport`].
#[derive(Default)]
pub struct InMemoryTransport {
    exchanges: Mutex<HashMap<String, ExchangeRecord>>,
    queues: Mutex<HashMap<String, QueueRecord>>,
    bindings: Mutex<Vec<BindingRecord>>,
    consumers: Mutex<HashMap<String, ConsumerRecord>>,
    acked: Mutex<Vec<u64>>,
    next_delivery_tag: AtomicU64,
    next_consumer_tag: AtomicU64,
}

impl InMemoryTransport {
    /// Creates an empty in-memory transport.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets the delivery tags acknowledged so far, in order.
    #[must_use]
    pub fn acked(&self) -> Vec<u64> {
        self.acked
            .lock()
            .map(|acked| acked.clone())
            .unwrap_or_default()
    }

    /// Gets the number of live consumer registrations.
    #[must_use]
    pub fn consumer_count(&self) -> usize {
        self.consumers.lock().map(|c| c.len()).unwrap_or(0)
    }

    /// Gets the number of messages buffered on a queue awaiting a consumer.
    #[must_use]
    pub fn pending_count(&self, queue: &str) -> usize {
        self.queues
            .lock()
            .ok()
            .and_then(|queues| queues.get(queue).map(|record| record.pending.len()))
            .unwrap_or(0)
    }

    fn next_delivery(&self, properties: MessageProperties, body: Vec<u8>) -> Delivery {
        Delivery {
            delivery_tag: self.next_delivery_tag.fetch_add(1, Ordering::Relaxed) + 1,
            properties,
            body,
        }
    }

    /// Routes one published message to a single queue: round-robin to a
    /// live consumer, or into the pending buffer if none is attached.
    fn deliver_to_queue(&self, queue: &str, properties: &MessageProperties, body: &[u8]) {
        let chosen = {
            let Ok(mut queues) = self.queues.lock() else {
                return;
            };
            let Some(record) = queues.get_mut(queue) else {
                return;
            };
            if record.consumers.is_empty() {
                record.pending.push_back((properties.clone(), body.to_vec()));
                return;
            }
            let tag = record.consumers[record.next % record.consumers.len()].clone();
            record.next = record.next.wrapping_add(1);
            tag
        };

        let delivery = self.next_delivery(properties.clone(), body.to_vec());
        let sent = self
            .consumers
            .lock()
            .ok()
            .and_then(|consumers| {
                consumers
                    .get(&chosen)
                    .map(|consumer| consumer.sender.send(delivery).is_ok())
            })
            .unwrap_or(false);
        if !sent {
            // the consumer raced away between selection and send; park the
            // message instead of losing it
            warn!(queue, consumer = %chosen, "Consumer is gone, message parked");
            if let Ok(mut queues) = self.queues.lock() {
                if let Some(record) = queues.get_mut(queue) {
                    record.pending.push_back((properties.clone(), body.to_vec()));
                }
            }
        }
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn declare_exchange(
        &self,
        name: &str,
        kind: &str,
        _durable: bool,
        _auto_delete: bool,
        _internal: bool,
        _arguments: &Arguments,
    ) -> Result<(), TransportError> {
        if let Ok(mut exchanges) = self.exchanges.lock() {
            exchanges.insert(
                name.to_string(),
                ExchangeRecord {
                    kind: kind.to_string(),
                },
            );
        }
        debug!(exchange = name, kind, "Exchange declared");
        Ok(())
    }

    async fn declare_queue(
        &self,
        name: &str,
        _durable: bool,
        _exclusive: bool,
        _auto_delete: bool,
        _arguments: &Arguments,
    ) -> Result<(), TransportError> {
        if let Ok(mut queues) = self.queues.lock() {
            queues.entry(name.to_string()).or_default();
        }
        debug!(queue = name, "Queue declared");
        Ok(())
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), TransportError> {
        let known_queue = self
            .queues
            .lock()
            .map(|queues| queues.contains_key(queue))
            .unwrap_or(false);
        if !known_queue {
            return Err(TransportError::UnknownQueue(queue.to_string()));
        }
        let known_exchange = self
            .exchanges
            .lock()
            .map(|exchanges| exchanges.contains_key(exchange))
            .unwrap_or(false);
        if !known_exchange {
            return Err(TransportError::UnknownExchange(exchange.to_string()));
        }

        if let Ok(mut bindings) = self.bindings.lock() {
            bindings.push(BindingRecord {
                exchange: exchange.to_string(),
                queue: queue.to_string(),
                routing_key: routing_key.to_string(),
            });
        }
        Ok(())
    }

    async fn unbind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), TransportError> {
        if let Ok(mut bindings) = self.bindings.lock() {
            bindings.retain(|binding| {
                !(binding.queue == queue
                    && binding.exchange == exchange
                    && binding.routing_key == routing_key)
            });
        }
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        _mandatory: bool,
        _immediate: bool,
        properties: MessageProperties,
        body: Vec<u8>,
    ) -> Result<(), TransportError> {
        let kind = self
            .exchanges
            .lock()
            .ok()
            .and_then(|exchanges| exchanges.get(exchange).map(|record| record.kind.clone()))
            .ok_or_else(|| TransportError::UnknownExchange(exchange.to_string()))?;

        let targets: Vec<String> = {
            let Ok(bindings) = self.bindings.lock() else {
                return Ok(());
            };
            let mut seen = HashSet::new();
            bindings
                .iter()
                .filter(|binding| binding.exchange == exchange)
                .filter(|binding| match kind.as_str() {
                    // header-table matching is not modeled; headers exchanges
                    // deliver to every binding, like fanout
                    "fanout" | "headers" => true,
                    "topic" => topic_matches(&binding.routing_key, routing_key),
                    _ => binding.routing_key == routing_key,
                })
                .filter(|binding| seen.insert(binding.queue.clone()))
                .map(|binding| binding.queue.clone())
                .collect()
        };

        for queue in &targets {
            self.deliver_to_queue(queue, &properties, &body);
        }
        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        handler: Arc<dyn DeliveryHandler>,
    ) -> Result<String, TransportError> {
        let tag = format!(
            "ctag-{}",
            self.next_consumer_tag.fetch_add(1, Ordering::Relaxed) + 1
        );

        let (sender, mut receiver) = mpsc::unbounded_channel::<Delivery>();
        let backlog: Vec<(MessageProperties, Vec<u8>)> = {
            let Ok(mut queues) = self.queues.lock() else {
                return Err(TransportError::UnknownQueue(queue.to_string()));
            };
            let Some(record) = queues.get_mut(queue) else {
                return Err(TransportError::UnknownQueue(queue.to_string()));
            };
            record.consumers.push(tag.clone());
            record.pending.drain(..).collect()
        };

        for (properties, body) in backlog {
            let delivery = self.next_delivery(properties, body);
            // the receiver is alive, we hold the sender
            let _ = sender.send(delivery);
        }

        if let Ok(mut consumers) = self.consumers.lock() {
            consumers.insert(
                tag.clone(),
                ConsumerRecord {
                    queue: queue.to_string(),
                    sender,
                    handler: Arc::clone(&handler),
                },
            );
        }

        tokio::spawn(async move {
            while let Some(delivery) = receiver.recv().await {
                handler.on_delivery(delivery).await;
            }
        });

        debug!(queue, consumer = %tag, "Consume started");
        Ok(tag)
    }

    async fn basic_ack(&self, delivery_tag: u64, _multiple: bool) -> Result<(), TransportError> {
        // the dispatcher always acks single deliveries; just record the tag
        if let Ok(mut acked) = self.acked.lock() {
            acked.push(delivery_tag);
        }
        Ok(())
    }

    async fn basic_cancel(&self, consumer_tag: &str) -> Result<(), TransportError> {
        let record = {
            let Ok(mut consumers) = self.consumers.lock() else {
                return Err(TransportError::UnknownConsumer(consumer_tag.to_string()));
            };
            consumers
                .remove(consumer_tag)
                .ok_or_else(|| TransportError::UnknownConsumer(consumer_tag.to_string()))?
        };

        if let Ok(mut queues) = self.queues.lock() {
            if let Some(queue) = queues.get_mut(&record.queue) {
                queue.consumers.retain(|tag| tag != consumer_tag);
            }
        }

        debug!(queue = %record.queue, consumer = consumer_tag, "Consume cancelled");
        record.handler.on_cancel().await;
        Ok(())
    }
}

/// AMQP-style topic matching: `*` matches exactly one word, `#` matches
/// zero or more words, words are separated by `.`.
fn topic_matches(pattern: &str, key: &str) -> bool {
    fn matches(pattern: &[&str], key: &[&str]) -> bool {
        match (pattern.first(), key.first()) {
            (None, None) => true,
            (Some(&"#"), _) => {
                matches(&pattern[1..], key) || (!key.is_empty() && matches(pattern, &key[1..]))
            }
            (Some(&"*"), Some(_)) => matches(&pattern[1..], &key[1..]),
            (Some(word), Some(head)) if word == head => matches(&pattern[1..], &key[1..]),
            _ => false,
        }
    }
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = key.split('.').collect();
    matches(&pattern, &key)
}
