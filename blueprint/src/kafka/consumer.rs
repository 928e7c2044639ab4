//! Kafka consumer lifecycle

use rdkafka::consumer::{CommitMode, Consumer as _, StreamConsumer};
use rdkafka::message::OwnedMessage;
use rdkafka::{ClientConfig, Offset, TopicPartitionList};
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::apply_common_config;
use crate::config::KafkaConsumerConfig;
use crate::error::{Error, Result};
use crate::sync::WaitGroup;

/// One generation of the underlying reader.
///
/// Subscriptions capture a handle by value under the mutex; `disconnect()`
/// swaps the field to `None` and cancels the token, so no subscription ever
/// observes a half-closed reader.
#[derive(Clone)]
struct ReaderHandle {
    reader: Arc<StreamConsumer>,
    cancel: CancellationToken,
}

/// Kafka consumer with safe concurrent teardown.
///
/// Any number of subscriptions may run at once; `disconnect()` returns only
/// after every one of them has exited.
pub struct Consumer {
    config: KafkaConsumerConfig,
    inner: Mutex<Option<ReaderHandle>>,
    wg: WaitGroup,
}

impl Consumer {
    /// Validate the configuration and create a disconnected consumer
    pub fn new(config: KafkaConsumerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            inner: Mutex::new(None),
            wg: WaitGroup::new(),
        })
    }

    /// Create the underlying reader; idempotent
    pub fn connect(&self) -> Result<()> {
        let mut guard = self.inner.lock().expect("consumer lock poisoned");
        if guard.is_none() {
            *guard = Some(self.create_reader()?);
        }
        Ok(())
    }

    /// Whether a live reader exists
    pub fn is_connected(&self) -> bool {
        self.inner
            .lock()
            .expect("consumer lock poisoned")
            .is_some()
    }

    /// Tear down the reader and wait for every subscription to return.
    ///
    /// Subscriptions observe the cancellation and exit cleanly; a new
    /// subscription started afterwards re-creates the reader.
    pub async fn disconnect(&self) -> Result<()> {
        let handle = {
            let mut guard = self.inner.lock().expect("consumer lock poisoned");
            guard.take()
        };

        if let Some(handle) = handle {
            handle.cancel.cancel();
            drop(handle);
        }

        self.wg.wait().await;
        tracing::info!("kafka consumer disconnected");
        Ok(())
    }

    /// Consume messages, invoking `handler` for each.
    ///
    /// Returns `Ok(())` when `shutdown` fires or the consumer disconnects;
    /// a handler error aborts the subscription with that error.
    pub async fn subscribe<F, Fut>(&self, shutdown: CancellationToken, handler: F) -> Result<()>
    where
        F: Fn(OwnedMessage) -> Fut + Send,
        Fut: Future<Output = Result<()>> + Send,
    {
        let (handle, _work) = self.acquire()?;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                _ = handle.cancel.cancelled() => return Ok(()),
                received = handle.reader.recv() => {
                    let message = match received {
                        Ok(message) => message,
                        Err(e) => return self.classify_recv_error(&handle, e),
                    };

                    handler(message.detach()).await?;

                    if self.config.group.is_some() {
                        if let Err(e) = handle.reader.commit_message(&message, CommitMode::Async) {
                            tracing::warn!("offset commit failed: {}", e);
                        }
                    }
                }
            }
        }
    }

    /// Consume messages into a channel.
    ///
    /// Never blocks on a full channel once `shutdown` has fired: the send
    /// races the cancellation tokens.
    pub async fn channel_subscribe(
        &self,
        shutdown: CancellationToken,
        sender: mpsc::Sender<OwnedMessage>,
    ) -> Result<()> {
        let (handle, _work) = self.acquire()?;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                _ = handle.cancel.cancelled() => return Ok(()),
                received = handle.reader.recv() => {
                    let message = match received {
                        Ok(message) => message,
                        Err(e) => return self.classify_recv_error(&handle, e),
                    };
                    let owned = message.detach();

                    tokio::select! {
                        _ = shutdown.cancelled() => return Ok(()),
                        _ = handle.cancel.cancelled() => return Ok(()),
                        sent = sender.send(owned) => {
                            if sent.is_err() {
                                // Receiver dropped: nothing left to feed
                                return Ok(());
                            }
                        }
                    }

                    if self.config.group.is_some() {
                        if let Err(e) = handle.reader.commit_message(&message, CommitMode::Async) {
                            tracing::warn!("offset commit failed: {}", e);
                        }
                    }
                }
            }
        }
    }

    /// Consume with explicit offset management: the offset of message N is
    /// committed synchronously before message N+1 is fetched. A commit
    /// failure aborts the subscription.
    pub async fn subscribe_with_offsets<F, Fut>(
        &self,
        shutdown: CancellationToken,
        handler: F,
    ) -> Result<()>
    where
        F: Fn(OwnedMessage) -> Fut + Send,
        Fut: Future<Output = Result<()>> + Send,
    {
        let (handle, _work) = self.acquire()?;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                _ = handle.cancel.cancelled() => return Ok(()),
                received = handle.reader.recv() => {
                    let message = match received {
                        Ok(message) => message,
                        Err(e) => return self.classify_recv_error(&handle, e),
                    };

                    handler(message.detach()).await?;

                    handle
                        .reader
                        .commit_message(&message, CommitMode::Sync)
                        .map_err(|e| Error::Kafka(Box::new(e)))?;
                }
            }
        }
    }

    /// Fetch a single message; `Ok(None)` on cancellation
    pub async fn read_message(
        &self,
        shutdown: CancellationToken,
    ) -> Result<Option<OwnedMessage>> {
        let (handle, _work) = self.acquire()?;

        tokio::select! {
            _ = shutdown.cancelled() => Ok(None),
            _ = handle.cancel.cancelled() => Ok(None),
            received = handle.reader.recv() => {
                let message = received.map_err(|e| Error::Kafka(Box::new(e)))?;
                let owned = message.detach();

                if self.config.group.is_some() {
                    if let Err(e) = handle.reader.commit_message(&message, CommitMode::Async) {
                        tracing::warn!("offset commit failed: {}", e);
                    }
                }

                Ok(Some(owned))
            }
        }
    }

    /// Take the mutex, create the reader if nil, register with the
    /// wait-group, and capture the handle by value.
    fn acquire(&self) -> Result<(ReaderHandle, crate::sync::WaitGroupGuard)> {
        let mut guard = self.inner.lock().expect("consumer lock poisoned");
        let handle = match guard.as_ref() {
            Some(handle) => handle.clone(),
            None => {
                let handle = self.create_reader()?;
                *guard = Some(handle.clone());
                handle
            }
        };
        let work = self.wg.add();
        drop(guard);
        Ok((handle, work))
    }

    fn classify_recv_error(
        &self,
        handle: &ReaderHandle,
        error: rdkafka::error::KafkaError,
    ) -> Result<()> {
        // A read racing disconnect observes the closed reader; that is a
        // clean exit, not a failure.
        if handle.cancel.is_cancelled() {
            return Ok(());
        }
        Err(Error::Kafka(Box::new(error)))
    }

    fn create_reader(&self) -> Result<ReaderHandle> {
        let config = &self.config;

        let mut client_config = ClientConfig::new();
        apply_common_config(
            &mut client_config,
            &config.brokers,
            config.auth_type,
            config.username.as_deref(),
            config.password.as_deref(),
        );

        let group_id = config
            .group
            .clone()
            .unwrap_or_else(|| format!("blueprint-{}", Uuid::new_v4()));

        client_config
            .set("group.id", group_id)
            .set("enable.auto.commit", "false")
            .set("enable.partition.eof", "false")
            .set("auto.offset.reset", config.start_offset.auto_offset_reset())
            .set("isolation.level", config.isolation_level.kafka_value())
            .set("session.timeout.ms", config.session_timeout_ms.to_string())
            .set(
                "heartbeat.interval.ms",
                config.heartbeat_interval_ms.to_string(),
            )
            .set(
                "max.poll.interval.ms",
                config.max_poll_interval_ms.to_string(),
            )
            .set("fetch.wait.max.ms", config.max_wait_ms.to_string());

        let reader: StreamConsumer = client_config.create()?;

        match config.partition {
            Some(partition) => {
                // Explicit partition assignment bypasses the group balancer
                let topic = config.topic.as_deref().ok_or_else(|| {
                    Error::Config(Box::new(figment::Error::from(
                        "partition assignment requires a topic".to_string(),
                    )))
                })?;
                let offset = match config.start_offset {
                    crate::config::StartOffset::First => Offset::Beginning,
                    crate::config::StartOffset::Last => Offset::End,
                };
                let mut assignment = TopicPartitionList::new();
                assignment.add_partition_offset(topic, partition, offset)?;
                reader.assign(&assignment)?;
            }
            None => {
                reader.subscribe(&self.config.topics())?;
            }
        }

        tracing::info!(
            brokers = %config.brokers.join(","),
            topics = ?config.topics(),
            "kafka consumer connected"
        );

        Ok(ReaderHandle {
            reader: Arc::new(reader),
            cancel: CancellationToken::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{IsolationLevel, KafkaAuthType, StartOffset};
    use std::time::Duration;

    fn config() -> KafkaConsumerConfig {
        KafkaConsumerConfig {
            // No broker needed: connections are lazy, reads simply block
            brokers: vec!["127.0.0.1:19092".to_string()],
            topic: Some("orders".to_string()),
            group: Some("billing".to_string()),
            group_topics: Vec::new(),
            partition: None,
            auth_type: KafkaAuthType::None,
            username: None,
            password: None,
            start_offset: StartOffset::Last,
            isolation_level: IsolationLevel::Committed,
            session_timeout_ms: 30_000,
            heartbeat_interval_ms: 3_000,
            max_poll_interval_ms: 300_000,
            max_wait_ms: 500,
        }
    }

    #[test]
    fn test_invalid_config_is_fatal() {
        let mut bad = config();
        bad.brokers.clear();
        assert!(Consumer::new(bad).is_err());
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let consumer = Consumer::new(config()).unwrap();
        assert!(!consumer.is_connected());

        consumer.connect().unwrap();
        assert!(consumer.is_connected());
        consumer.connect().unwrap();
        assert!(consumer.is_connected());

        consumer.disconnect().await.unwrap();
        assert!(!consumer.is_connected());
    }

    #[tokio::test]
    async fn test_disconnect_without_connect_is_clean() {
        let consumer = Consumer::new(config()).unwrap();
        consumer.disconnect().await.unwrap();
        assert!(!consumer.is_connected());
    }

    #[tokio::test]
    async fn test_disconnect_drains_active_subscriptions() {
        let consumer = Arc::new(Consumer::new(config()).unwrap());

        // Three subscriptions blocked on an unreachable broker
        let tasks: Vec<_> = (0..3)
            .map(|_| {
                let consumer = Arc::clone(&consumer);
                tokio::spawn(async move {
                    consumer
                        .subscribe(CancellationToken::new(), |_message| async { Ok(()) })
                        .await
                })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(consumer.is_connected());

        consumer.disconnect().await.unwrap();
        assert!(!consumer.is_connected());

        // Every subscription returned nil within the deadline
        for task in tasks {
            let result = tokio::time::timeout(Duration::from_secs(5), task)
                .await
                .expect("subscription did not exit after disconnect")
                .expect("subscription panicked");
            assert!(result.is_ok());
        }
    }

    #[tokio::test]
    async fn test_context_cancellation_is_clean() {
        let consumer = Arc::new(Consumer::new(config()).unwrap());
        let shutdown = CancellationToken::new();

        let task = {
            let consumer = Arc::clone(&consumer);
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                consumer
                    .subscribe(shutdown, |_message| async { Ok(()) })
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();

        let result = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("subscription did not exit after cancellation")
            .expect("subscription panicked");
        assert!(result.is_ok());

        // The reader is still alive; only the caller's context ended
        assert!(consumer.is_connected());
        consumer.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_channel_subscribe_exits_when_cancelled() {
        let consumer = Arc::new(Consumer::new(config()).unwrap());
        let shutdown = CancellationToken::new();
        // Zero-capacity would block forever on send; cancellation must win
        let (sender, _receiver) = mpsc::channel(1);

        let task = {
            let consumer = Arc::clone(&consumer);
            let shutdown = shutdown.clone();
            tokio::spawn(async move { consumer.channel_subscribe(shutdown, sender).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();

        let result = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("channel subscription did not exit")
            .expect("subscription panicked");
        assert!(result.is_ok());
        consumer.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_read_message_returns_none_on_cancel() {
        let consumer = Consumer::new(config()).unwrap();
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let message = consumer.read_message(shutdown).await.unwrap();
        assert!(message.is_none());
        consumer.disconnect().await.unwrap();
    }
}
