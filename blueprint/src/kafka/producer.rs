//! Kafka producer

use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::ClientConfig;
use serde::Serialize;
use std::sync::Mutex;
use std::time::Duration;

use super::apply_common_config;
use crate::config::KafkaProducerConfig;
use crate::error::{Error, Result};

/// Async Kafka producer bound to a configured topic.
///
/// Every write method resolves when the broker acknowledges delivery (or the
/// per-message timeout elapses). After [`Producer::disconnect`] every write
/// returns [`Error::ProducerClosed`].
pub struct Producer {
    config: KafkaProducerConfig,
    inner: Mutex<Option<FutureProducer>>,
}

impl Producer {
    /// Validate the configuration and create the underlying producer
    pub fn new(config: KafkaProducerConfig) -> Result<Self> {
        config.validate()?;

        let mut client_config = ClientConfig::new();
        apply_common_config(
            &mut client_config,
            &config.brokers,
            config.auth_type,
            config.username.as_deref(),
            config.password.as_deref(),
        );
        client_config.set(
            "message.timeout.ms",
            config.message_timeout_ms.to_string(),
        );

        let producer: FutureProducer = client_config.create()?;

        Ok(Self {
            config,
            inner: Mutex::new(Some(producer)),
        })
    }

    fn message_timeout(&self) -> Duration {
        Duration::from_millis(self.config.message_timeout_ms)
    }

    fn handle(&self) -> Result<FutureProducer> {
        self.inner
            .lock()
            .expect("producer lock poisoned")
            .clone()
            .ok_or(Error::ProducerClosed)
    }

    /// Whether the producer is still open
    pub fn is_connected(&self) -> bool {
        self.inner
            .lock()
            .expect("producer lock poisoned")
            .is_some()
    }

    async fn send(
        &self,
        payload: &[u8],
        key: Option<&[u8]>,
        headers: Option<OwnedHeaders>,
    ) -> Result<()> {
        let producer = self.handle()?;

        let mut record: FutureRecord<'_, [u8], [u8]> =
            FutureRecord::to(&self.config.topic).payload(payload);
        if let Some(key) = key {
            record = record.key(key);
        }
        if let Some(headers) = headers {
            record = record.headers(headers);
        }

        producer
            .send(record, Timeout::After(self.message_timeout()))
            .await
            .map_err(|(e, _)| Error::Kafka(Box::new(e)))?;

        Ok(())
    }

    /// Write one message to the configured topic
    pub async fn write(&self, payload: &[u8]) -> Result<()> {
        self.send(payload, None, None).await
    }

    /// Write a batch of messages in order
    pub async fn write_multi(&self, payloads: &[Vec<u8>]) -> Result<()> {
        for payload in payloads {
            self.send(payload, None, None).await?;
        }
        Ok(())
    }

    /// JSON-encode and write one value
    pub async fn write_json<T: Serialize>(&self, value: &T) -> Result<()> {
        let payload = serde_json::to_vec(value)
            .map_err(|e| Error::Internal(format!("failed to encode message: {}", e)))?;
        self.send(&payload, None, None).await
    }

    /// JSON-encode and write a batch of values in order
    pub async fn write_multi_json<T: Serialize>(&self, values: &[T]) -> Result<()> {
        for value in values {
            self.write_json(value).await?;
        }
        Ok(())
    }

    /// Write one message with record headers
    pub async fn write_with_headers(
        &self,
        payload: &[u8],
        headers: &[(String, Vec<u8>)],
    ) -> Result<()> {
        let mut owned = OwnedHeaders::new();
        for (key, value) in headers {
            owned = owned.insert(Header {
                key,
                value: Some(value.as_slice()),
            });
        }
        self.send(payload, None, Some(owned)).await
    }

    /// Write one message with a partitioning key
    pub async fn write_with_key(&self, key: &[u8], payload: &[u8]) -> Result<()> {
        self.send(payload, Some(key), None).await
    }

    /// Flush pending deliveries and close; later writes fail with
    /// [`Error::ProducerClosed`]
    pub fn disconnect(&self) -> Result<()> {
        use rdkafka::producer::Producer as _;

        let producer = {
            let mut guard = self.inner.lock().expect("producer lock poisoned");
            guard.take()
        };

        if let Some(producer) = producer {
            producer
                .flush(Timeout::After(self.message_timeout()))
                .map_err(|e| Error::Kafka(Box::new(e)))?;
            tracing::info!("kafka producer disconnected");
        }

        Ok(())
    }
}
