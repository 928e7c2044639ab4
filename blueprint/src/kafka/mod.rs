//! Kafka consumer, producer, and topic administration
//!
//! The consumer is built around safe teardown while subscriptions run: the
//! reader handle is swapped out under a mutex, its cancellation token fires,
//! and `disconnect()` waits on a wait-group until every subscription has
//! returned. Cancellation is always a clean exit; handler and commit errors
//! abort the subscription with the error.

mod admin;
mod consumer;
mod producer;

pub use admin::Admin;
pub use consumer::Consumer;
pub use producer::Producer;

use rdkafka::ClientConfig;

use crate::config::KafkaAuthType;

/// Apply broker list and SASL settings shared by all client roles
fn apply_common_config(
    config: &mut ClientConfig,
    brokers: &[String],
    auth_type: KafkaAuthType,
    username: Option<&str>,
    password: Option<&str>,
) {
    config.set("bootstrap.servers", brokers.join(","));

    if let Some(mechanism) = auth_type.sasl_mechanism() {
        config
            .set("security.protocol", "SASL_PLAINTEXT")
            .set("sasl.mechanism", mechanism)
            .set("sasl.username", username.unwrap_or(""))
            .set("sasl.password", password.unwrap_or(""));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sasl_settings_applied() {
        let mut config = ClientConfig::new();
        apply_common_config(
            &mut config,
            &["a:9092".to_string(), "b:9092".to_string()],
            KafkaAuthType::Scram256,
            Some("svc"),
            Some("pw"),
        );

        assert_eq!(config.get("bootstrap.servers"), Some("a:9092,b:9092"));
        assert_eq!(config.get("sasl.mechanism"), Some("SCRAM-SHA-256"));
        assert_eq!(config.get("security.protocol"), Some("SASL_PLAINTEXT"));
    }

    #[test]
    fn test_no_sasl_without_auth() {
        let mut config = ClientConfig::new();
        apply_common_config(
            &mut config,
            &["a:9092".to_string()],
            KafkaAuthType::None,
            None,
            None,
        );
        assert_eq!(config.get("sasl.mechanism"), None);
    }
}
