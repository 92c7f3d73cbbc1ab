use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::{ClientConfig, Message, Offset, TopicPartitionList};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{ConfigError, ConsumerConfig, KafkaConfig};

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("fetch cancelled")]
    Cancelled,
    #[error("failed to fetch from kafka: {0}")]
    Kafka(#[from] KafkaError),
}

impl FetchError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, FetchError::Cancelled)
    }
}

#[derive(Error, Debug)]
pub enum CommitError {
    #[error("commit cancelled")]
    Cancelled,
    #[error("failed to commit offset to kafka: {0}")]
    Kafka(#[from] KafkaError),
    #[error("commit task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// One record pulled off the log. Owned, so it can outlive the consumer's internal buffers.
#[derive(Clone, PartialEq, Eq)]
pub struct Record {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub payload: Vec<u8>,
    /// Broker or producer timestamp, in milliseconds since the epoch.
    pub timestamp: Option<i64>,
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{{ topic: {}, partition: {}, offset: {}, payload_bytes: {} }}",
            self.topic,
            self.partition,
            self.offset,
            self.payload.len()
        )
    }
}

/// Pulls records for one consumer group and advances its durable offset.
///
/// `fetch` suspends until a record is available, `cancel` fires, or the transport fails.
/// It never returns a record without a payload. `commit` is the only at-least-once
/// checkpoint: it must only be called once the record's effects are durable downstream.
#[async_trait]
pub trait StreamSubscriber: Send + Sync {
    async fn fetch(&self, cancel: &CancellationToken) -> Result<Record, FetchError>;

    async fn commit(&self, cancel: &CancellationToken, record: &Record)
        -> Result<(), CommitError>;
}

pub struct KafkaSubscriber {
    consumer: Arc<StreamConsumer>,
}

impl KafkaSubscriber {
    pub fn new(
        common_config: &KafkaConfig,
        consumer_config: &ConsumerConfig,
    ) -> Result<Self, ConfigError> {
        let bootstrap_servers = common_config.bootstrap_servers()?;
        consumer_config.validate()?;

        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &bootstrap_servers)
            .set("statistics.interval.ms", "10000")
            .set("group.id", &consumer_config.kafka_consumer_group)
            .set(
                "auto.offset.reset",
                &consumer_config.kafka_consumer_offset_reset,
            )
            .set(
                "fetch.min.bytes",
                consumer_config.kafka_consumer_fetch_min_bytes.to_string(),
            )
            .set(
                "fetch.max.bytes",
                consumer_config.kafka_consumer_fetch_max_bytes.to_string(),
            );

        // Offsets only move through `commit`, after the timeline write went through.
        client_config
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false");

        if common_config.kafka_tls {
            client_config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        };

        debug!("rdkafka consumer configuration: {:?}", client_config);
        let consumer: StreamConsumer = client_config.create()?;
        consumer.subscribe(&[consumer_config.kafka_consumer_topic.as_str()])?;

        info!(
            topic = %consumer_config.kafka_consumer_topic,
            group = %consumer_config.kafka_consumer_group,
            "subscribed to kafka topic"
        );

        Ok(Self {
            consumer: Arc::new(consumer),
        })
    }
}

#[async_trait]
impl StreamSubscriber for KafkaSubscriber {
    async fn fetch(&self, cancel: &CancellationToken) -> Result<Record, FetchError> {
        loop {
            let record = tokio::select! {
                _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                message = self.consumer.recv() => {
                    let message = message?;
                    Record {
                        topic: message.topic().to_owned(),
                        partition: message.partition(),
                        offset: message.offset(),
                        key: message.key().map(<[u8]>::to_vec),
                        payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
                        timestamp: message.timestamp().to_millis(),
                    }
                }
            };

            if !record.payload.is_empty() {
                return Ok(record);
            }

            // Tombstones carry nothing to materialize. Step over them so they can't pin
            // the partition.
            warn!(?record, "skipping record without payload");
            counter!("timeline_kafka_empty_records_total").increment(1);
            match self.commit(cancel, &record).await {
                Ok(()) => {}
                Err(CommitError::Cancelled) => return Err(FetchError::Cancelled),
                Err(e) => warn!(?record, "failed to commit record without payload: {}", e),
            }
        }
    }

    async fn commit(
        &self,
        cancel: &CancellationToken,
        record: &Record,
    ) -> Result<(), CommitError> {
        let mut offsets = TopicPartitionList::new();
        // The committed offset names the next record to read, hence the +1.
        offsets.add_partition_offset(
            &record.topic,
            record.partition,
            Offset::Offset(record.offset + 1),
        )?;

        // A sync commit blocks on the broker round trip, keep it off the async workers.
        let consumer = self.consumer.clone();
        let commit =
            tokio::task::spawn_blocking(move || consumer.commit(&offsets, CommitMode::Sync));

        tokio::select! {
            _ = cancel.cancelled() => Err(CommitError::Cancelled),
            result = commit => Ok(result??),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::kafka_producer::{KafkaPublisher, StreamPublisher};
    use crate::test::{mock_consumer_config, mock_kafka_config};
    use rdkafka::mocking::MockCluster;
    use rdkafka::producer::{FutureProducer, FutureRecord};

    #[test]
    fn construction_fails_fast_on_bad_config() {
        let config = mock_kafka_config("localhost:9092".to_string());

        assert!(matches!(
            KafkaSubscriber::new(&config, &mock_consumer_config("timeline", "")),
            Err(ConfigError::MissingTopic)
        ));
        assert!(matches!(
            KafkaSubscriber::new(&config, &mock_consumer_config("", "activity.raw")),
            Err(ConfigError::MissingGroup)
        ));

        let no_brokers = mock_kafka_config(String::new());
        assert!(matches!(
            KafkaSubscriber::new(&no_brokers, &mock_consumer_config("timeline", "activity.raw")),
            Err(ConfigError::MissingBrokers)
        ));
    }

    #[tokio::test]
    async fn fetch_and_commit_on_mocked_cluster() {
        let cluster = MockCluster::new(1).expect("failed to create mock brokers");
        cluster
            .create_topic("activity.raw", 1, 1)
            .expect("failed to create mock topic");
        let config = mock_kafka_config(cluster.bootstrap_servers());

        let publisher =
            KafkaPublisher::new(&config, "activity.raw").expect("failed to create publisher");
        publisher
            .publish(b"user-1", b"first")
            .await
            .expect("failed to publish first record");
        publisher
            .publish(b"user-1", b"second")
            .await
            .expect("failed to publish second record");

        let subscriber =
            KafkaSubscriber::new(&config, &mock_consumer_config("timeline", "activity.raw"))
                .expect("failed to create subscriber");
        let cancel = CancellationToken::new();

        let first = tokio::time::timeout(Duration::from_secs(30), subscriber.fetch(&cancel))
            .await
            .expect("timed out waiting for first record")
            .expect("failed to fetch first record");
        assert_eq!(first.payload, b"first".to_vec());
        assert_eq!(first.key.as_deref(), Some(&b"user-1"[..]));
        subscriber
            .commit(&cancel, &first)
            .await
            .expect("failed to commit first record");

        let second = tokio::time::timeout(Duration::from_secs(30), subscriber.fetch(&cancel))
            .await
            .expect("timed out waiting for second record")
            .expect("failed to fetch second record");
        assert_eq!(second.payload, b"second".to_vec());
        assert_eq!(second.offset, first.offset + 1);

        // Nothing left to read: cancellation must unblock the pending fetch
        cancel.cancel();
        assert!(subscriber.fetch(&cancel).await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn records_without_payload_are_committed_and_skipped_on_mocked_cluster() {
        let cluster = MockCluster::new(1).expect("failed to create mock brokers");
        cluster
            .create_topic("activity.raw", 1, 1)
            .expect("failed to create mock topic");
        let config = mock_kafka_config(cluster.bootstrap_servers());

        // KafkaPublisher refuses empty payloads, so write the tombstone with a raw producer
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", cluster.bootstrap_servers())
            .create()
            .expect("failed to create raw producer");
        producer
            .send(
                FutureRecord::<[u8], [u8]>::to("activity.raw").key(&b"user-1"[..]),
                Duration::from_secs(5),
            )
            .await
            .map_err(|(e, _)| e)
            .expect("failed to send tombstone");

        let publisher =
            KafkaPublisher::new(&config, "activity.raw").expect("failed to create publisher");
        publisher
            .publish(b"user-1", b"real")
            .await
            .expect("failed to publish record");

        let subscriber =
            KafkaSubscriber::new(&config, &mock_consumer_config("timeline", "activity.raw"))
                .expect("failed to create subscriber");
        let cancel = CancellationToken::new();

        let record = tokio::time::timeout(Duration::from_secs(30), subscriber.fetch(&cancel))
            .await
            .expect("timed out waiting for record")
            .expect("failed to fetch record");
        assert_eq!(record.payload, b"real".to_vec());
        assert_eq!(record.offset, 1);
    }
}
