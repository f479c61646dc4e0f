//! # Request/Reply Convention
//!
//! A response copies the request's `message_id` into its `correlation_id`
//! and is routed under the request's `reply_to`.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;
    use warren_bus::{
        Exchange, ExchangeKind, ExchangeOptions, InMemoryTransport, MessageBinder,
        MessageProperties, PublishOptions, Queue, QueueOptions, Subscription, Transport,
    };
    use warren_document::{DocumentCodec, DocumentType, DocumentValue, FieldType, SchemaRegistry};

    fn ping() -> DocumentType {
        DocumentType::builder("PingRequest")
            .registry_id("ping.request")
            .field("token", FieldType::String)
            .build()
    }

    fn pong() -> DocumentType {
        DocumentType::builder("PongResponse")
            .registry_id("pong.response")
            .field("token", FieldType::String)
            .build()
    }

    #[tokio::test]
    async fn test_response_correlates_to_request_and_routes_to_reply_to() {
        let ping_ty = ping();
        let pong_ty = pong();
        let registry = Arc::new(
            MessageBinder::new()
                .register(&ping_ty)
                .register(&pong_ty)
                .bind()
                .unwrap(),
        );
        let codec = DocumentCodec::new(Arc::new(SchemaRegistry::new()));
        let transport = Arc::new(InMemoryTransport::new());

        let exchange = Arc::new(Exchange::new(
            "rpc",
            ExchangeKind::Direct,
            ExchangeOptions::default(),
            Arc::clone(&transport) as Arc<dyn Transport>,
            Arc::clone(&registry),
            codec.clone(),
        ));
        exchange.declare().await.unwrap();

        let server = Queue::new(
            "rpc.server",
            QueueOptions::default(),
            Arc::clone(&transport) as Arc<dyn Transport>,
            Arc::clone(&registry),
            codec.clone(),
        );
        server.connect().await.unwrap();
        server.bind(&exchange, "ping").await;

        let client = Queue::new(
            "rpc.client",
            QueueOptions::default(),
            Arc::clone(&transport) as Arc<dyn Transport>,
            registry,
            codec,
        );
        client.connect().await.unwrap();
        client.bind(&exchange, "client-42").await;

        // the server hands request properties off to its own task, which
        // publishes the response; responding inside the callback would
        // block the delivery pump
        let (request_tx, mut request_rx) = mpsc::unbounded_channel();
        server.subscribe(
            &ping_ty,
            move |message: &DocumentValue,
                  _subscription: &Subscription,
                  properties: &MessageProperties|
                  -> anyhow::Result<()> {
                let _ = request_tx.send((message.clone(), properties.clone()));
                Ok(())
            },
        );

        let (response_tx, mut response_rx) = mpsc::unbounded_channel();
        client.subscribe(
            &pong_ty,
            move |message: &DocumentValue,
                  _subscription: &Subscription,
                  properties: &MessageProperties|
                  -> anyhow::Result<()> {
                let _ = response_tx.send((message.clone(), properties.clone()));
                Ok(())
            },
        );

        // client sends the request, announcing where replies should go
        let request = DocumentValue::builder(&ping_ty).set("token", "t-1").build();
        exchange
            .publish_with(
                &request,
                "ping",
                PublishOptions {
                    reply_to: Some("client-42".to_string()),
                    ..PublishOptions::default()
                },
            )
            .await
            .unwrap();

        // server answers
        let (request_seen, request_properties) =
            timeout(Duration::from_millis(200), request_rx.recv())
                .await
                .expect("timeout")
                .expect("request");
        assert_eq!(request_seen.get("token").unwrap().as_str(), Some("t-1"));
        let response = DocumentValue::builder(&pong_ty).set("token", "t-1").build();
        exchange.respond(&request_properties, &response).await.unwrap();

        // client sees the response, correlated to its request
        let (response_seen, response_properties) =
            timeout(Duration::from_millis(200), response_rx.recv())
                .await
                .expect("timeout")
                .expect("response");
        assert_eq!(response_seen.get("token").unwrap().as_str(), Some("t-1"));
        assert_eq!(
            response_properties.correlation_id,
            request_properties.message_id
        );
        assert_eq!(
            response_properties.type_tag.as_deref(),
            Some("pong.response")
        );
    }
}
