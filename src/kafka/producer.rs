use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::ClientConfig;
use tracing::{debug, info};

use crate::config::KafkaConfig;
use crate::fanout::Publisher;
use crate::replicator::{RetryQueue, RETRY_HEADER};
use crate::{Error, Result};

/// Shared producer for every outbound topic.
pub struct KafkaProducer {
    producer: FutureProducer,
    send_timeout: Duration,
}

impl KafkaProducer {
    pub fn new(config: &KafkaConfig) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", config.brokers.join(","))
            .set("compression.type", &config.compression)
            .set("acks", &config.acks)
            .set("linger.ms", config.linger_ms.to_string())
            .set("message.timeout.ms", config.message_timeout_ms.to_string())
            .create()
            .map_err(Error::Kafka)?;

        info!(brokers = ?config.brokers, "Kafka producer created");

        Ok(Self {
            producer,
            send_timeout: Duration::from_millis(u64::from(config.message_timeout_ms)),
        })
    }

    pub async fn send(&self, topic: &str, key: Option<&str>, payload: &[u8]) -> Result<()> {
        let mut record: FutureRecord<'_, str, [u8]> = FutureRecord::to(topic).payload(payload);
        if let Some(key) = key {
            record = record.key(key);
        }

        let (partition, offset) = self
            .producer
            .send(record, Timeout::After(self.send_timeout))
            .await
            .map_err(|(e, _)| Error::Producer {
                topic: topic.to_string(),
                message: e.to_string(),
            })?;

        debug!(topic, partition, offset, "Message delivered");
        Ok(())
    }

    /// Sends raw bytes with the retry counter header set.
    pub async fn send_retry(
        &self,
        topic: &str,
        key: Option<&[u8]>,
        payload: &[u8],
        retry_count: u32,
    ) -> Result<()> {
        let count = retry_count.to_string();
        let headers = OwnedHeaders::new().insert(Header {
            key: RETRY_HEADER,
            value: Some(count.as_str()),
        });

        let mut record: FutureRecord<'_, [u8], [u8]> =
            FutureRecord::to(topic).payload(payload).headers(headers);
        if let Some(key) = key {
            record = record.key(key);
        }

        self.producer
            .send(record, Timeout::After(self.send_timeout))
            .await
            .map_err(|(e, _)| Error::Producer {
                topic: topic.to_string(),
                message: e.to_string(),
            })?;

        Ok(())
    }
}

#[async_trait]
impl Publisher for KafkaProducer {
    async fn publish(&self, topic: &str, key: Option<&str>, payload: &[u8]) -> Result<()> {
        self.send(topic, key, payload).await
    }
}

/// `<source>-retry` topic fed by the shared producer.
pub struct KafkaRetryQueue {
    producer: Arc<KafkaProducer>,
    topic: String,
}

impl KafkaRetryQueue {
    pub fn new(producer: Arc<KafkaProducer>, topic: impl Into<String>) -> Self {
        Self {
            producer,
            topic: topic.into(),
        }
    }
}

#[async_trait]
impl RetryQueue for KafkaRetryQueue {
    async fn forward(&self, key: Option<&[u8]>, payload: &[u8], retry_count: u32) -> Result<()> {
        self.producer
            .send_retry(&self.topic, key, payload, retry_count)
            .await
    }

    fn topic(&self) -> &str {
        &self.topic
    }
}
