//! Kafka topic administration

use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::ClientConfig;
use std::collections::BTreeSet;
use std::time::Duration;

use super::apply_common_config;
use crate::config::KafkaAuthType;
use crate::error::{Error, Result};

const ADMIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Topic administration client
pub struct Admin {
    client: AdminClient<DefaultClientContext>,
}

impl Admin {
    pub fn new(brokers: &[String]) -> Result<Self> {
        Self::with_auth(brokers, KafkaAuthType::None, None, None)
    }

    pub fn with_auth(
        brokers: &[String],
        auth_type: KafkaAuthType,
        username: Option<&str>,
        password: Option<&str>,
    ) -> Result<Self> {
        if brokers.is_empty() {
            return Err(Error::Config(Box::new(figment::Error::from(
                "kafka admin requires at least one broker".to_string(),
            ))));
        }

        let mut client_config = ClientConfig::new();
        apply_common_config(&mut client_config, brokers, auth_type, username, password);

        let client: AdminClient<DefaultClientContext> = client_config.create()?;
        Ok(Self { client })
    }

    /// Create a topic with the given partition and replication counts
    pub async fn create_topic(
        &self,
        name: &str,
        partitions: i32,
        replication: i32,
    ) -> Result<()> {
        let topic = NewTopic::new(name, partitions, TopicReplication::Fixed(replication));
        let options = AdminOptions::new().operation_timeout(Some(ADMIN_TIMEOUT));

        let results = self.client.create_topics([&topic], &options).await?;
        for result in results {
            result.map_err(|(topic, code)| {
                Error::Internal(format!("failed to create topic '{}': {}", topic, code))
            })?;
        }
        Ok(())
    }

    /// Delete a topic
    pub async fn delete_topic(&self, name: &str) -> Result<()> {
        let options = AdminOptions::new().operation_timeout(Some(ADMIN_TIMEOUT));

        let results = self.client.delete_topics(&[name], &options).await?;
        for result in results {
            result.map_err(|(topic, code)| {
                Error::Internal(format!("failed to delete topic '{}': {}", topic, code))
            })?;
        }
        Ok(())
    }

    /// All topic names known to the cluster, each exactly once
    pub fn list_topics(&self) -> Result<Vec<String>> {
        // Brokers may enumerate a topic per partition; the set collapses
        // duplicates and yields stable ordering.
        let names: BTreeSet<String> = self.topic_names()?.into_iter().collect();
        Ok(names.into_iter().collect())
    }

    /// Topic names as enumerated by the broker
    pub fn get_topics(&self) -> Result<Vec<String>> {
        self.topic_names()
    }

    /// Whether `name` exists in the cluster metadata
    pub fn topic_exists(&self, name: &str) -> Result<bool> {
        Ok(self.topic_names()?.iter().any(|t| t == name))
    }

    fn topic_names(&self) -> Result<Vec<String>> {
        let metadata = self
            .client
            .inner()
            .fetch_metadata(None, ADMIN_TIMEOUT)
            .map_err(|e| Error::Kafka(Box::new(e)))?;

        Ok(metadata
            .topics()
            .iter()
            .map(|t| t.name().to_string())
            .collect())
    }
}
