//! # Warren Bus - Typed Publish/Subscribe over an AMQP-Style Broker
//!
//! Producers publish structured documents under a logical type id; consumers
//! register interest per type on a queue and receive decoded values.
//!
//! ## Data Flow
//!
//! ```text
//! outbound:
//!   DocumentValue ──id_of──→ MessageRegistry ──encode──→ DocumentCodec
//!         │                                                   │
//!         └────────────── Exchange::publish ──────────────────┘
//!                                │
//!                                ▼
//!                    Transport (tag + body + properties)
//!
//! inbound:
//!   Transport delivery ──ack──→ Queue ──resolve tag──→ MessageRegistry
//!                                │
//!                                ├──decode──→ DocumentCodec
//!                                │
//!                                └──fan out──→ every Subscription on the
//!                                              delivery's exact type
//! ```
//!
//! ## Delivery Semantics
//!
//! Deliveries are acknowledged to the transport *before* decode and
//! dispatch: a crash mid-processing never re-delivers the same message.
//! This is at-most-once delivery: a processing failure loses the message
//! and is only visible in the logs. Integrators that need guaranteed
//! delivery must layer it on top.

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod config;
pub mod exchange;
pub mod memory;
pub mod message;
pub mod queue;
pub mod transport;

// Re-export main types
pub use config::{BrokerAddress, BrokerConfig};
pub use exchange::{Exchange, ExchangeKind, ExchangeOptions, PublishError, PublishOptions};
pub use memory::InMemoryTransport;
pub use message::{MessageBinder, MessageMeta, MessageRegistry, RegistryError};
pub use queue::{MessageConsumer, Queue, QueueError, QueueOptions, QueueState, Subscription};
pub use transport::{
    Arguments, Delivery, DeliveryHandler, MessageProperties, Transport, TransportError,
};
