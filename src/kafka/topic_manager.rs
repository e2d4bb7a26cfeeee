use std::collections::HashSet;
use std::time::Duration;

use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::error::KafkaError;
use rdkafka::ClientConfig;
use tracing::{debug, info, instrument, warn};

use crate::config::KafkaConfig;
use crate::{Error, Result};

const METADATA_TIMEOUT: Duration = Duration::from_secs(5);
const ADMIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Creates missing output topics at startup.
pub struct TopicManager {
    admin_client: AdminClient<DefaultClientContext>,
    partitions: i32,
    replication_factor: i32,
    verified: HashSet<String>,
}

impl TopicManager {
    pub fn new(config: &KafkaConfig) -> Result<Self> {
        let admin_client: AdminClient<_> = ClientConfig::new()
            .set("bootstrap.servers", config.brokers.join(","))
            .create()
            .map_err(Error::Kafka)?;

        Ok(Self {
            admin_client,
            partitions: config.topic_partitions,
            replication_factor: config.replication_factor,
            verified: HashSet::new(),
        })
    }

    pub async fn ensure_topics(&mut self, topics: &[&str]) -> Result<()> {
        for topic in topics {
            self.ensure_topic_exists(topic).await?;
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn ensure_topic_exists(&mut self, topic: &str) -> Result<()> {
        if self.verified.contains(topic) {
            debug!("Topic already verified");
            return Ok(());
        }

        match self.topic_exists(topic) {
            Ok(true) => debug!("Topic exists"),
            Ok(false) => {
                info!("Creating topic");
                self.create_topic(topic).await?;
            }
            Err(e) => {
                warn!(error = %e, "Failed to check whether topic exists");
                return Err(e);
            }
        }

        self.verified.insert(topic.to_string());
        Ok(())
    }

    fn topic_exists(&self, topic: &str) -> Result<bool> {
        let metadata = self
            .admin_client
            .inner()
            .fetch_metadata(Some(topic), METADATA_TIMEOUT)?;

        // Auto-created metadata entries come back with an error and no partitions.
        Ok(metadata
            .topics()
            .iter()
            .any(|t| t.name() == topic && t.error().is_none() && !t.partitions().is_empty()))
    }

    async fn create_topic(&self, topic: &str) -> Result<()> {
        let new_topic = NewTopic::new(topic, self.partitions, TopicReplication::Fixed(self.replication_factor))
            .set("cleanup.policy", "delete");

        let opts = AdminOptions::new().operation_timeout(Some(ADMIN_TIMEOUT));

        let results = self.admin_client.create_topics(&[new_topic], &opts).await?;
        for result in results {
            match result {
                Ok(name) => info!(topic = %name, "Created topic"),
                Err((_, rdkafka::types::RDKafkaErrorCode::TopicAlreadyExists)) => {
                    debug!(topic, "Topic created concurrently");
                }
                Err((_, code)) => return Err(Error::Kafka(KafkaError::AdminOp(code))),
            }
        }

        Ok(())
    }

    pub async fn delete_topic(&self, topic: &str) -> Result<()> {
        let opts = AdminOptions::new().operation_timeout(Some(ADMIN_TIMEOUT));

        let results = self.admin_client.delete_topics(&[topic], &opts).await?;
        for result in results {
            if let Err((_, code)) = result {
                return Err(Error::Kafka(KafkaError::AdminOp(code)));
            }
        }

        Ok(())
    }
}
