//! Sequential Kafka consumer loop with manual offset commits.

use std::time::Duration;

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Headers, Message};
use rdkafka::{Offset, TopicPartitionList};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::KafkaConfig;
use crate::replicator::{parse_retry_count, Disposition, InboundMessage, MessageHandler, RETRY_HEADER};
use crate::{Error, Result};

/// How long to wait after a failed receive before polling again.
const RECEIVE_BACKOFF: Duration = Duration::from_secs(1);
const SEEK_TIMEOUT: Duration = Duration::from_secs(10);

pub struct CdcConsumer {
    consumer: StreamConsumer,
    topic: String,
    group_id: String,
}

impl CdcConsumer {
    pub fn new(config: &KafkaConfig, topic: impl Into<String>) -> Result<Self> {
        let topic = topic.into();

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", config.brokers.join(","))
            .set("group.id", &config.group_id)
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("enable.auto.commit", "false")
            .set("session.timeout.ms", config.session_timeout_ms.to_string())
            .create()
            .map_err(Error::Kafka)?;

        consumer.subscribe(&[topic.as_str()])?;

        info!(topic = %topic, group_id = %config.group_id, "Subscribed to topic");

        Ok(Self {
            consumer,
            topic,
            group_id: config.group_id.clone(),
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Runs until `cancel` fires or the handler asks to stop.
    ///
    /// Messages are handled one at a time; the next message is not received
    /// before the previous one has been committed or rewound.
    #[instrument(skip_all, fields(topic = %self.topic, group_id = %self.group_id))]
    pub async fn run<H: MessageHandler + ?Sized>(&self, handler: &H, cancel: CancellationToken) -> Result<()> {
        info!("Starting consumer loop");

        loop {
            let received = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                received = self.consumer.recv() => received,
            };

            let message = match received {
                Ok(message) => message,
                Err(e) => {
                    error!(error = %e, "Error receiving message");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(RECEIVE_BACKOFF) => continue,
                    }
                }
            };

            let inbound = inbound(&message);
            debug!(
                partition = inbound.partition,
                offset = inbound.offset,
                retry_count = inbound.retry_count,
                "Received message"
            );

            match handler.handle(&inbound, &cancel).await {
                Disposition::Commit => {
                    self.commit(&message)?;
                    if let Some(pacing) = handler.pacing() {
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(pacing) => {}
                        }
                    }
                }
                Disposition::Redeliver => self.rewind(&message)?,
                Disposition::Stop => break,
            }
        }

        info!("Consumer loop ended");
        Ok(())
    }

    fn commit(&self, message: &BorrowedMessage<'_>) -> Result<()> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(message.topic(), message.partition(), Offset::Offset(message.offset() + 1))?;
        self.consumer.commit(&tpl, CommitMode::Async)?;
        Ok(())
    }

    /// Seeks back so the same offset is delivered again.
    fn rewind(&self, message: &BorrowedMessage<'_>) -> Result<()> {
        warn!(partition = message.partition(), offset = message.offset(), "Rewinding for redelivery");
        self.consumer.seek(
            message.topic(),
            message.partition(),
            Offset::Offset(message.offset()),
            SEEK_TIMEOUT,
        )?;
        Ok(())
    }
}

fn inbound<'a>(message: &'a BorrowedMessage<'_>) -> InboundMessage<'a> {
    let retry_header = message.headers().and_then(|headers| {
        headers
            .iter()
            .find(|header| header.key == RETRY_HEADER)
            .and_then(|header| header.value)
    });

    InboundMessage {
        topic: message.topic(),
        partition: message.partition(),
        offset: message.offset(),
        key: message.key(),
        payload: message.payload(),
        retry_count: parse_retry_count(retry_header),
    }
}
