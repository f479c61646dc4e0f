//! # Publish/Consume Flows
//!
//! End-to-end coverage of the outbound path (registry id resolution,
//! schema-directed encoding, property stamping) and the inbound path
//! (ack-before-process, tag resolution, exact-type dispatch) over the
//! in-memory transport.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;
    use warren_bus::{
        Delivery, DeliveryHandler, Exchange, ExchangeKind, ExchangeOptions, InMemoryTransport,
        MessageBinder, MessageProperties, Queue, QueueOptions, Subscription, Transport,
    };
    use warren_document::{DocumentCodec, DocumentType, DocumentValue, FieldType, SchemaRegistry};

    // =========================================================================
    // TEST FIXTURES
    // =========================================================================

    fn order_placed() -> DocumentType {
        DocumentType::builder("OrderPlaced")
            .registry_id("order.placed")
            .field("order_id", FieldType::String)
            .optional("total", FieldType::Integer)
            .build()
    }

    struct Harness {
        transport: Arc<InMemoryTransport>,
        exchange: Exchange,
        queue: Queue,
    }

    /// Declares a direct exchange `orders`, a consuming queue
    /// `orders.inbound` bound under `placed`, with the given shapes
    /// registered.
    async fn harness(shapes: &[&DocumentType]) -> Harness {
        let mut binder = MessageBinder::new();
        for shape in shapes {
            binder = binder.register(shape);
        }
        let registry = Arc::new(binder.bind().expect("registration"));
        let codec = DocumentCodec::new(Arc::new(SchemaRegistry::new()));
        let transport = Arc::new(InMemoryTransport::new());

        let exchange = Exchange::new(
            "orders",
            ExchangeKind::Direct,
            ExchangeOptions::default(),
            Arc::clone(&transport) as Arc<dyn Transport>,
            Arc::clone(&registry),
            codec.clone(),
        );
        let queue = Queue::new(
            "orders.inbound",
            QueueOptions::default(),
            Arc::clone(&transport) as Arc<dyn Transport>,
            registry,
            codec,
        );

        exchange.declare().await.expect("declare exchange");
        queue.connect().await.expect("connect queue");
        queue.bind(&exchange, "placed").await;

        Harness {
            transport,
            exchange,
            queue,
        }
    }

    type Captured = (DocumentValue, MessageProperties);

    fn capture() -> (
        impl Fn(&DocumentValue, &Subscription, &MessageProperties) -> anyhow::Result<()>,
        mpsc::UnboundedReceiver<Captured>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let consumer = move |message: &DocumentValue,
                             _subscription: &Subscription,
                             properties: &MessageProperties|
              -> anyhow::Result<()> {
            let _ = tx.send((message.clone(), properties.clone()));
            Ok(())
        };
        (consumer, rx)
    }

    async fn recv(rx: &mut mpsc::UnboundedReceiver<Captured>) -> Captured {
        timeout(Duration::from_millis(200), rx.recv())
            .await
            .expect("timeout waiting for delivery")
            .expect("capture channel closed")
    }

    /// A transport-level spy consuming raw deliveries off its own queue.
    struct WireSpy {
        sender: mpsc::UnboundedSender<Delivery>,
    }

    #[async_trait::async_trait]
    impl DeliveryHandler for WireSpy {
        async fn on_delivery(&self, delivery: Delivery) {
            let _ = self.sender.send(delivery);
        }
    }

    async fn wire_spy(
        transport: &Arc<InMemoryTransport>,
        routing_key: &str,
    ) -> mpsc::UnboundedReceiver<Delivery> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let args = Default::default();
        transport
            .declare_queue("spy", false, false, false, &args)
            .await
            .expect("declare spy queue");
        transport
            .bind_queue("spy", "orders", routing_key)
            .await
            .expect("bind spy queue");
        transport
            .consume("spy", Arc::new(WireSpy { sender }))
            .await
            .expect("consume spy queue");
        receiver
    }

    // =========================================================================
    // OUTBOUND: WIRE TAG + ENCODING
    // =========================================================================

    /// The concrete scenario: publish `OrderPlaced{order_id:"A1",
    /// total:absent}`, assert the wire tag and that the produced bytes
    /// decode back with `total` absent.
    #[tokio::test]
    async fn test_order_placed_wire_tag_and_payload() {
        let ty = order_placed();
        let harness = harness(&[&ty]).await;
        let mut wire = wire_spy(&harness.transport, "placed").await;

        let message = DocumentValue::builder(&ty).set("order_id", "A1").build();
        harness.exchange.publish(&message, "placed").await.unwrap();

        let delivery = timeout(Duration::from_millis(200), wire.recv())
            .await
            .expect("timeout")
            .expect("wire delivery");
        assert_eq!(delivery.properties.type_tag.as_deref(), Some("order.placed"));
        assert!(delivery.properties.message_id.is_some());

        // absent optional encodes to an absent wire node, not null
        let body: serde_json::Value = serde_json::from_slice(&delivery.body).unwrap();
        assert_eq!(body["order_id"], "A1");
        assert!(body.get("total").is_none());
    }

    #[tokio::test]
    async fn test_each_publish_gets_a_fresh_message_id() {
        let ty = order_placed();
        let harness = harness(&[&ty]).await;
        let mut wire = wire_spy(&harness.transport, "placed").await;

        let message = DocumentValue::builder(&ty).set("order_id", "A1").build();
        harness.exchange.publish(&message, "placed").await.unwrap();
        harness.exchange.publish(&message, "placed").await.unwrap();

        let first = timeout(Duration::from_millis(200), wire.recv())
            .await
            .expect("timeout")
            .expect("delivery");
        let second = timeout(Duration::from_millis(200), wire.recv())
            .await
            .expect("timeout")
            .expect("delivery");
        assert_ne!(first.properties.message_id, second.properties.message_id);
    }

    // =========================================================================
    // INBOUND: DISPATCH
    // =========================================================================

    /// The concrete scenario: two subscriptions on `OrderPlaced`, one
    /// delivery, both callbacks see field-equal decoded values.
    #[tokio::test]
    async fn test_two_subscriptions_see_field_equal_values() {
        let ty = order_placed();
        let harness = harness(&[&ty]).await;

        let (first, mut first_rx) = capture();
        let (second, mut second_rx) = capture();
        harness.queue.subscribe(&ty, first);
        harness.queue.subscribe(&ty, second);

        let message = DocumentValue::builder(&ty)
            .set("order_id", "A1")
            .set("total", 1299i64)
            .build();
        harness.exchange.publish(&message, "placed").await.unwrap();

        let (first_seen, _) = recv(&mut first_rx).await;
        let (second_seen, _) = recv(&mut second_rx).await;
        assert_eq!(first_seen, second_seen);
        assert_eq!(first_seen.get("order_id").unwrap().as_str(), Some("A1"));
        assert_eq!(first_seen.get("total").unwrap().as_i64(), Some(1299));
    }

    #[tokio::test]
    async fn test_fanout_invokes_every_subscription_exactly_once() {
        let ty = order_placed();
        let harness = harness(&[&ty]).await;

        let mut receivers = Vec::new();
        for _ in 0..3 {
            let (consumer, rx) = capture();
            harness.queue.subscribe(&ty, consumer);
            receivers.push(rx);
        }

        let message = DocumentValue::builder(&ty).set("order_id", "A1").build();
        harness.exchange.publish(&message, "placed").await.unwrap();

        for rx in &mut receivers {
            let (seen, properties) = recv(rx).await;
            assert_eq!(seen.get("order_id").unwrap().as_str(), Some("A1"));
            assert_eq!(properties.type_tag.as_deref(), Some("order.placed"));
            // exactly once: nothing further queued
            assert!(rx.try_recv().is_err());
        }
    }

    #[tokio::test]
    async fn test_unknown_tag_is_acked_and_dropped() {
        let ty = order_placed();
        let harness = harness(&[&ty]).await;

        let (consumer, mut rx) = capture();
        harness.queue.subscribe(&ty, consumer);

        // a forward-incompatible message kind arrives on the queue
        harness
            .transport
            .publish(
                "orders",
                "placed",
                false,
                false,
                MessageProperties {
                    type_tag: Some("ghost.kind".to_string()),
                    ..MessageProperties::default()
                },
                b"{}".to_vec(),
            )
            .await
            .unwrap();

        let message = DocumentValue::builder(&ty).set("order_id", "A1").build();
        harness.exchange.publish(&message, "placed").await.unwrap();

        // only the real message reaches the subscriber; the unknown kind was
        // dropped without error
        let (seen, _) = recv(&mut rx).await;
        assert_eq!(seen.get("order_id").unwrap().as_str(), Some("A1"));
        assert!(rx.try_recv().is_err());

        // both deliveries were acked before processing
        assert_eq!(harness.transport.acked(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_acked_and_dropped() {
        let ty = order_placed();
        let harness = harness(&[&ty]).await;

        let (consumer, mut rx) = capture();
        harness.queue.subscribe(&ty, consumer);

        harness
            .transport
            .publish(
                "orders",
                "placed",
                false,
                false,
                MessageProperties {
                    type_tag: Some("order.placed".to_string()),
                    message_id: Some("m-bad".to_string()),
                    ..MessageProperties::default()
                },
                b"not json".to_vec(),
            )
            .await
            .unwrap();

        let message = DocumentValue::builder(&ty).set("order_id", "A1").build();
        harness.exchange.publish(&message, "placed").await.unwrap();

        let (seen, _) = recv(&mut rx).await;
        assert_eq!(seen.get("order_id").unwrap().as_str(), Some("A1"));
        assert!(rx.try_recv().is_err());
        assert_eq!(harness.transport.acked(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_subscriber_error_does_not_stop_fanout() {
        let ty = order_placed();
        let harness = harness(&[&ty]).await;

        let failing = |_message: &DocumentValue,
                       _subscription: &Subscription,
                       _properties: &MessageProperties|
         -> anyhow::Result<()> { Err(anyhow::anyhow!("boom")) };
        harness.queue.subscribe(&ty, failing);

        let (consumer, mut rx) = capture();
        harness.queue.subscribe(&ty, consumer);

        let message = DocumentValue::builder(&ty).set("order_id", "A1").build();
        harness.exchange.publish(&message, "placed").await.unwrap();
        let (seen, _) = recv(&mut rx).await;
        assert_eq!(seen.get("order_id").unwrap().as_str(), Some("A1"));

        // the dispatcher survived; later deliveries still flow
        harness.exchange.publish(&message, "placed").await.unwrap();
        recv(&mut rx).await;
    }

    #[tokio::test]
    async fn test_no_dispatch_after_disconnect() {
        let ty = order_placed();
        let harness = harness(&[&ty]).await;

        let (consumer, mut rx) = capture();
        harness.queue.subscribe(&ty, consumer);
        harness.queue.disconnect().await.unwrap();

        let message = DocumentValue::builder(&ty).set("order_id", "A1").build();
        harness.exchange.publish(&message, "placed").await.unwrap();

        // with the consumer cancelled the transport buffers the message;
        // the subscriber never sees it
        assert_eq!(harness.transport.pending_count("orders.inbound"), 1);
        assert!(rx.try_recv().is_err());
    }

    // =========================================================================
    // HIERARCHY: SUBTYPE PUBLISHES UNDER ANCESTOR TAG
    // =========================================================================

    #[tokio::test]
    async fn test_subtype_publishes_under_registered_ancestor_tag() {
        let base = DocumentType::builder("OrderEvent")
            .registry_id("order.event")
            .field("order_id", FieldType::String)
            .build();
        let amended = DocumentType::builder("OrderAmended")
            .parent(&base)
            .field("reason", FieldType::String)
            .build();

        // only the ancestor is registered
        let harness = harness(&[&base]).await;
        let (consumer, mut rx) = capture();
        harness.queue.subscribe(&base, consumer);

        let message = DocumentValue::builder(&amended)
            .set("order_id", "A1")
            .set("reason", "priority bump")
            .build();
        harness.exchange.publish(&message, "placed").await.unwrap();

        let (seen, properties) = recv(&mut rx).await;
        // the wire tag is the ancestor's id, and the consumer sees the
        // message through the ancestor's schema
        assert_eq!(properties.type_tag.as_deref(), Some("order.event"));
        assert_eq!(seen.ty(), &base);
        assert_eq!(seen.get("order_id").unwrap().as_str(), Some("A1"));
        assert!(seen.get("reason").is_none());
    }
}
