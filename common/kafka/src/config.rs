use envconfig::Envconfig;
use rdkafka::error::KafkaError;
use thiserror::Error;

/// librdkafka may hold a record this long before a forced flush, publish latency is bounded by it.
pub const MAX_PRODUCER_LINGER_MS: u32 = 500;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("kafka brokers must not be empty")]
    MissingBrokers,
    #[error("kafka topic must not be empty")]
    MissingTopic,
    #[error("kafka consumer group must not be empty")]
    MissingGroup,
    #[error("producer linger of {0}ms exceeds the {MAX_PRODUCER_LINGER_MS}ms bound")]
    LingerTooLong(u32),
    #[error("fetch.min.bytes ({min}) must not exceed fetch.max.bytes ({max})")]
    InvalidFetchBounds { min: u32, max: u32 },
    #[error("failed to create kafka client: {0}")]
    Client(#[from] KafkaError),
}

#[derive(Envconfig, Clone, Debug)]
pub struct KafkaConfig {
    #[envconfig(default = "20")]
    pub kafka_producer_linger_ms: u32, // Maximum time between producer batches during low traffic

    // Time before a publish gives up waiting for the all-replica ack
    #[envconfig(default = "20000")]
    pub kafka_message_timeout_ms: u32,

    // Transport retries inside librdkafka, callers own retry policy
    #[envconfig(default = "0")]
    pub kafka_producer_max_retries: u32,

    #[envconfig(default = "none")]
    pub kafka_compression_codec: String, // none, gzip, snappy, lz4, zstd

    #[envconfig(default = "false")]
    pub kafka_tls: bool,

    #[envconfig(default = "localhost:9092")]
    pub kafka_hosts: String,
}

impl KafkaConfig {
    /// Broker addresses with blanks dropped, so "a:9092,,b:9092" and " " behave sensibly.
    pub fn brokers(&self) -> Vec<&str> {
        self.kafka_hosts
            .split(',')
            .map(str::trim)
            .filter(|host| !host.is_empty())
            .collect()
    }

    /// The pipeline is an optional subsystem: no brokers means it stays disabled.
    pub fn is_configured(&self) -> bool {
        !self.brokers().is_empty()
    }

    pub(crate) fn bootstrap_servers(&self) -> Result<String, ConfigError> {
        let brokers = self.brokers();
        if brokers.is_empty() {
            return Err(ConfigError::MissingBrokers);
        }
        Ok(brokers.join(","))
    }
}

#[derive(Envconfig, Clone, Debug)]
pub struct ConsumerConfig {
    #[envconfig(default = "timeline-consumer")]
    pub kafka_consumer_group: String,

    #[envconfig(default = "activity.raw")]
    pub kafka_consumer_topic: String,

    // We default to "earliest" so a fresh consumer group materializes the retained backlog
    #[envconfig(default = "earliest")]
    pub kafka_consumer_offset_reset: String, // earliest, latest

    #[envconfig(default = "10000")]
    pub kafka_consumer_fetch_min_bytes: u32,

    #[envconfig(default = "10000000")]
    pub kafka_consumer_fetch_max_bytes: u32,
}

impl ConsumerConfig {
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.kafka_consumer_topic.trim().is_empty() {
            return Err(ConfigError::MissingTopic);
        }
        if self.kafka_consumer_group.trim().is_empty() {
            return Err(ConfigError::MissingGroup);
        }
        if self.kafka_consumer_fetch_min_bytes > self.kafka_consumer_fetch_max_bytes {
            return Err(ConfigError::InvalidFetchBounds {
                min: self.kafka_consumer_fetch_min_bytes,
                max: self.kafka_consumer_fetch_max_bytes,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kafka_config(hosts: &str) -> KafkaConfig {
        KafkaConfig {
            kafka_producer_linger_ms: 20,
            kafka_message_timeout_ms: 20000,
            kafka_producer_max_retries: 0,
            kafka_compression_codec: "none".to_string(),
            kafka_tls: false,
            kafka_hosts: hosts.to_string(),
        }
    }

    fn consumer_config(group: &str, topic: &str) -> ConsumerConfig {
        ConsumerConfig {
            kafka_consumer_group: group.to_string(),
            kafka_consumer_topic: topic.to_string(),
            kafka_consumer_offset_reset: "earliest".to_string(),
            kafka_consumer_fetch_min_bytes: 10_000,
            kafka_consumer_fetch_max_bytes: 10_000_000,
        }
    }

    #[test]
    fn blank_brokers_disable_the_pipeline() {
        assert!(!kafka_config("").is_configured());
        assert!(!kafka_config(" , ,").is_configured());
        assert!(matches!(
            kafka_config("").bootstrap_servers(),
            Err(ConfigError::MissingBrokers)
        ));
    }

    #[test]
    fn brokers_are_trimmed() {
        let config = kafka_config("kafka-0:9092, ,kafka-1:9092 ");
        assert!(config.is_configured());
        assert_eq!(config.brokers(), vec!["kafka-0:9092", "kafka-1:9092"]);
        assert_eq!(
            config.bootstrap_servers().unwrap(),
            "kafka-0:9092,kafka-1:9092"
        );
    }

    #[test]
    fn consumer_config_requires_topic_and_group() {
        assert!(consumer_config("timeline", "activity.raw").validate().is_ok());
        assert!(matches!(
            consumer_config("timeline", "").validate(),
            Err(ConfigError::MissingTopic)
        ));
        assert!(matches!(
            consumer_config(" ", "activity.raw").validate(),
            Err(ConfigError::MissingGroup)
        ));

        let mut inverted = consumer_config("timeline", "activity.raw");
        inverted.kafka_consumer_fetch_min_bytes = 20;
        inverted.kafka_consumer_fetch_max_bytes = 10;
        assert!(matches!(
            inverted.validate(),
            Err(ConfigError::InvalidFetchBounds { min: 20, max: 10 })
        ));
    }
}
