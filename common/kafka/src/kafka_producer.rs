use std::time::Duration;

use async_trait::async_trait;
use metrics::{counter, gauge};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::ClientConfig;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{ConfigError, KafkaConfig, MAX_PRODUCER_LINGER_MS};

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("partition key must not be empty")]
    EmptyKey,
    #[error("payload must not be empty")]
    EmptyPayload,
    #[error("record exceeds the maximum message size")]
    TooLarge,
    #[error("failed to produce to kafka: {0}")]
    Kafka(#[from] KafkaError),
}

/// Appends opaque payloads to a durable, partitioned log.
///
/// A successful return means every in-sync replica acknowledged the record. Failures are
/// surfaced as-is and never retried here, retry policy belongs to the caller.
#[async_trait]
pub trait StreamPublisher: Send + Sync {
    async fn publish(&self, partition_key: &[u8], payload: &[u8]) -> Result<(), PublishError>;
}

pub struct KafkaContext {
    topic: String,
}

impl rdkafka::ClientContext for KafkaContext {
    fn stats(&self, stats: rdkafka::Statistics) {
        gauge!("timeline_kafka_callback_queue_depth").set(stats.replyq as f64);
        gauge!("timeline_kafka_producer_queue_depth").set(stats.msg_cnt as f64);
        gauge!("timeline_kafka_producer_queue_bytes").set(stats.msg_size as f64);

        if let Some(topic) = stats.topics.get(&self.topic) {
            gauge!(
                "timeline_kafka_produce_avg_batch_size_events",
                "topic" => self.topic.clone()
            )
            .set(topic.batchcnt.avg as f64);
        }

        for (_, broker) in stats.brokers {
            counter!(
                "timeline_kafka_broker_tx_errors_total",
                "broker" => broker.nodeid.to_string()
            )
            .absolute(broker.txerrs);
        }
    }
}

pub struct KafkaPublisher {
    producer: FutureProducer<KafkaContext>,
    topic: String,
    queue_timeout: Duration,
}

impl KafkaPublisher {
    pub fn new(config: &KafkaConfig, topic: &str) -> Result<KafkaPublisher, ConfigError> {
        let bootstrap_servers = config.bootstrap_servers()?;
        if topic.trim().is_empty() {
            return Err(ConfigError::MissingTopic);
        }
        if config.kafka_producer_linger_ms > MAX_PRODUCER_LINGER_MS {
            return Err(ConfigError::LingerTooLong(config.kafka_producer_linger_ms));
        }

        info!("connecting producer to Kafka brokers at {}", bootstrap_servers);

        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &bootstrap_servers)
            .set("statistics.interval.ms", "10000")
            .set("acks", "all")
            .set("linger.ms", config.kafka_producer_linger_ms.to_string())
            .set(
                "message.timeout.ms",
                config.kafka_message_timeout_ms.to_string(),
            )
            .set(
                "message.send.max.retries",
                config.kafka_producer_max_retries.to_string(),
            )
            .set("compression.codec", &config.kafka_compression_codec);

        if config.kafka_tls {
            client_config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        };

        debug!("rdkafka producer configuration: {:?}", client_config);
        let producer: FutureProducer<KafkaContext> =
            client_config.create_with_context(KafkaContext {
                topic: topic.to_owned(),
            })?;

        Ok(KafkaPublisher {
            producer,
            topic: topic.to_owned(),
            queue_timeout: Duration::from_millis(config.kafka_message_timeout_ms.into()),
        })
    }
}

#[async_trait]
impl StreamPublisher for KafkaPublisher {
    async fn publish(&self, partition_key: &[u8], payload: &[u8]) -> Result<(), PublishError> {
        if partition_key.is_empty() {
            return Err(PublishError::EmptyKey);
        }
        if payload.is_empty() {
            return Err(PublishError::EmptyPayload);
        }

        let record = FutureRecord::to(&self.topic)
            .key(partition_key)
            .payload(payload);

        // `send` resolves on the delivery report, which librdkafka only emits after acks=all.
        match self.producer.send(record, self.queue_timeout).await {
            Ok((partition, offset)) => {
                counter!("timeline_kafka_published_total").increment(1);
                debug!(topic = %self.topic, partition, offset, "published record");
                Ok(())
            }
            Err((KafkaError::MessageProduction(RDKafkaErrorCode::MessageSizeTooLarge), _)) => {
                counter!("timeline_kafka_publish_errors_total", "cause" => "too_large")
                    .increment(1);
                Err(PublishError::TooLarge)
            }
            Err((error, _)) => {
                counter!("timeline_kafka_publish_errors_total", "cause" => "kafka").increment(1);
                Err(PublishError::Kafka(error))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::mock_kafka_config;
    use rdkafka::mocking::MockCluster;
    use rdkafka::types::{RDKafkaApiKey, RDKafkaRespErr};

    #[test]
    fn construction_fails_fast_on_bad_config() {
        let mut config = mock_kafka_config("localhost:9092".to_string());

        assert!(matches!(
            KafkaPublisher::new(&config, ""),
            Err(ConfigError::MissingTopic)
        ));

        config.kafka_producer_linger_ms = MAX_PRODUCER_LINGER_MS + 1;
        assert!(matches!(
            KafkaPublisher::new(&config, "activity.raw"),
            Err(ConfigError::LingerTooLong(501))
        ));

        config.kafka_producer_linger_ms = 0;
        config.kafka_hosts = "".to_string();
        assert!(matches!(
            KafkaPublisher::new(&config, "activity.raw"),
            Err(ConfigError::MissingBrokers)
        ));
    }

    #[tokio::test]
    async fn publish_error_handling() {
        // Uses a mocked Kafka broker that allows injecting write errors.
        let cluster = MockCluster::new(1).expect("failed to create mock brokers");
        let config = mock_kafka_config(cluster.bootstrap_servers());
        let publisher =
            KafkaPublisher::new(&config, "activity.raw").expect("failed to create publisher");

        // Wait for the producer to see the cluster, to keep the message timeout short
        for _ in 0..20 {
            if publisher.publish(b"user-1", b"{}").await.is_ok() {
                break;
            }
        }
        publisher
            .publish(b"user-1", b"{\"event_id\":\"e1\"}")
            .await
            .expect("failed to publish on the happy path");

        assert!(matches!(
            publisher.publish(b"", b"{}").await,
            Err(PublishError::EmptyKey)
        ));
        assert!(matches!(
            publisher.publish(b"user-1", b"").await,
            Err(PublishError::EmptyPayload)
        ));

        // Broker-side rejections are surfaced, never retried
        cluster.clear_request_errors(RDKafkaApiKey::Produce);
        let err = [RDKafkaRespErr::RD_KAFKA_RESP_ERR_MSG_SIZE_TOO_LARGE; 1];
        cluster.request_errors(RDKafkaApiKey::Produce, &err);
        match publisher.publish(b"user-1", b"{}").await {
            Err(PublishError::TooLarge) => {} // Expected
            Err(err) => panic!("wrong error {}", err),
            Ok(()) => panic!("should have errored"),
        };

        cluster.clear_request_errors(RDKafkaApiKey::Produce);
        let err = [RDKafkaRespErr::RD_KAFKA_RESP_ERR_INVALID_PARTITIONS; 1];
        cluster.request_errors(RDKafkaApiKey::Produce, &err);
        match publisher.publish(b"user-1", b"{}").await {
            Err(PublishError::Kafka(_)) => {} // Expected
            Err(err) => panic!("wrong error {}", err),
            Ok(()) => panic!("should have errored"),
        };

        cluster.clear_request_errors(RDKafkaApiKey::Produce);
        publisher
            .publish(b"user-1", b"{}")
            .await
            .expect("failed to publish after clearing errors");
    }
}
