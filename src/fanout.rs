//! Derived messages sent after a row is persisted.
//!
//! Every created or updated row may produce a search-index message and an
//! image-processing message. The image message travels one of two routes,
//! chosen per event by a feature flag; both routes are [`ImageSender`]
//! implementations handed to the [`Dispatcher`] at construction.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    Update,
    Delete,
}

/// Search-index message: the action plus the `after` snapshot as received.
#[derive(Debug, Serialize)]
pub struct ProducerPayload<'a, S> {
    pub action: Action,
    pub data: &'a S,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    Anime,
    Character,
    Staff,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSchema {
    pub name: String,
    pub url: String,
    #[serde(rename = "type")]
    pub data_type: DataType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImagePayload {
    pub data: ImageSchema,
}

/// What an entity kind wants sent for one change.
#[derive(Debug)]
pub struct FanOutPlan<'a, S> {
    pub search: Option<ProducerPayload<'a, S>>,
    pub image: Option<ImagePayload>,
}

impl<'a, S> FanOutPlan<'a, S> {
    pub fn empty() -> Self {
        Self {
            search: None,
            image: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.search.is_none() && self.image.is_none()
    }
}

/// Lowercased title with spaces replaced by underscores.
pub fn title_slug(title: &str) -> String {
    title.to_lowercase().replace(' ', "_")
}

/// Raw byte sink for one outbound topic family.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: &str, key: Option<&str>, payload: &[u8]) -> Result<()>;
}

/// Transport for image-processing messages.
#[async_trait]
pub trait ImageSender: Send + Sync {
    async fn send_image(&self, key: &str, payload: &ImagePayload) -> Result<()>;

    /// Route name for logs.
    fn route(&self) -> &str;
}

/// Sends image messages as JSON to a fixed topic through a [`Publisher`].
pub struct TopicImageSender {
    publisher: Arc<dyn Publisher>,
    topic: String,
}

impl TopicImageSender {
    pub fn new(publisher: Arc<dyn Publisher>, topic: impl Into<String>) -> Self {
        Self {
            publisher,
            topic: topic.into(),
        }
    }
}

#[async_trait]
impl ImageSender for TopicImageSender {
    async fn send_image(&self, key: &str, payload: &ImagePayload) -> Result<()> {
        let body = serde_json::to_vec(payload)?;
        self.publisher.publish(&self.topic, Some(key), &body).await
    }

    fn route(&self) -> &str {
        &self.topic
    }
}

/// The two image routes. `message_bus` is used when the routing flag is on.
pub struct ImageRoutes {
    message_bus: Arc<dyn ImageSender>,
    image_topic: Arc<dyn ImageSender>,
}

impl ImageRoutes {
    pub fn new(message_bus: Arc<dyn ImageSender>, image_topic: Arc<dyn ImageSender>) -> Self {
        Self {
            message_bus,
            image_topic,
        }
    }

    pub fn select(&self, message_bus_enabled: bool) -> &dyn ImageSender {
        if message_bus_enabled {
            self.message_bus.as_ref()
        } else {
            self.image_topic.as_ref()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOutReport {
    pub search_sent: bool,
    pub image_sent: bool,
}

pub struct Dispatcher {
    publisher: Arc<dyn Publisher>,
    search_topic: String,
    images: ImageRoutes,
}

impl Dispatcher {
    pub fn new(publisher: Arc<dyn Publisher>, search_topic: impl Into<String>, images: ImageRoutes) -> Self {
        Self {
            publisher,
            search_topic: search_topic.into(),
            images,
        }
    }

    /// Sends the plan, search-index first. Any send failure aborts the rest
    /// and is returned.
    pub async fn dispatch<S: Serialize + Sync>(
        &self,
        key: &str,
        plan: FanOutPlan<'_, S>,
        message_bus_enabled: bool,
    ) -> Result<FanOutReport> {
        let mut report = FanOutReport::default();

        if let Some(search) = plan.search {
            let body = serde_json::to_vec(&search)?;
            debug!(key, topic = %self.search_topic, action = ?search.action, "Sending search-index message");
            self.publisher.publish(&self.search_topic, Some(key), &body).await?;
            report.search_sent = true;
        }

        if let Some(image) = plan.image {
            let sender = self.images.select(message_bus_enabled);
            info!(
                key,
                title = %image.data.name,
                image_url = %image.data.url,
                route = sender.route(),
                "Sending image message"
            );
            sender.send_image(key, &image).await?;
            report.image_sent = true;
        }

        Ok(report)
    }
}
