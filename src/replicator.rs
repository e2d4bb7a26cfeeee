//! One message in, one disposition out.
//!
//! The replicator decodes a raw CDC body, runs the reconcile engine inside
//! the retry envelope and tells the consumer loop what to do with the
//! offset.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::cdc;
use crate::engine::{Outcome, ReconcileEngine};
use crate::entity::EntityKind;
use crate::retry::RetryPolicy;
use crate::{Error, Result};

/// Header carrying how many times a message went through the retry queue.
pub const RETRY_HEADER: &str = "retry";

/// What the consumer should do with a handled message's offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Processed, dropped or forwarded. Commit and move on.
    Commit,
    /// Retries exhausted. Do not commit; hand the same offset out again.
    Redeliver,
    /// Cancelled mid-flight. Stop without committing.
    Stop,
}

/// A consumed message, detached from the broker client.
#[derive(Debug, Clone, Copy)]
pub struct InboundMessage<'a> {
    pub topic: &'a str,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<&'a [u8]>,
    /// `None` or empty for tombstones.
    pub payload: Option<&'a [u8]>,
    /// Value of the [`RETRY_HEADER`] header, zero when absent.
    pub retry_count: u32,
}

#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &InboundMessage<'_>, cancel: &CancellationToken) -> Disposition;

    /// Pause the consumer takes after committing a message.
    fn pacing(&self) -> Option<Duration> {
        None
    }
}

/// Destination for messages that exhausted their retries.
#[async_trait]
pub trait RetryQueue: Send + Sync {
    async fn forward(&self, key: Option<&[u8]>, payload: &[u8], retry_count: u32) -> Result<()>;

    fn topic(&self) -> &str;
}

pub struct Replicator<K: EntityKind> {
    engine: ReconcileEngine<K>,
    policy: RetryPolicy,
    retry_queue: Option<Arc<dyn RetryQueue>>,
    pacing: Option<Duration>,
}

impl<K: EntityKind> Replicator<K> {
    pub fn new(engine: ReconcileEngine<K>, policy: RetryPolicy) -> Self {
        Self {
            engine,
            policy,
            retry_queue: None,
            pacing: None,
        }
    }

    pub fn with_retry_queue(mut self, queue: Arc<dyn RetryQueue>) -> Self {
        self.retry_queue = Some(queue);
        self
    }

    pub fn with_pacing(mut self, pacing: Option<Duration>) -> Self {
        self.pacing = pacing;
        self
    }

    /// Decodes `payload` and reconciles it, retrying per the policy.
    ///
    /// Decode failures are returned without retrying.
    pub async fn process(&self, payload: &[u8], cancel: &CancellationToken) -> Result<Outcome> {
        let event = cdc::decode::<K::Schema>(payload)?;
        self.policy
            .run(cancel, |attempt| {
                if attempt > 1 {
                    debug!(attempt, kind = K::NAME, "Retrying change event");
                }
                self.engine.reconcile(&event)
            })
            .await
    }
}

#[async_trait]
impl<K: EntityKind> MessageHandler for Replicator<K> {
    async fn handle(&self, message: &InboundMessage<'_>, cancel: &CancellationToken) -> Disposition {
        let payload = match message.payload {
            Some(payload) if !payload.is_empty() => payload,
            _ => {
                debug!(topic = message.topic, offset = message.offset, "Skipping tombstone");
                return Disposition::Commit;
            }
        };

        let error = match self.process(payload, cancel).await {
            Ok(outcome) => {
                debug!(offset = message.offset, outcome = ?outcome, "Message processed");
                return Disposition::Commit;
            }
            Err(Error::Cancelled) => {
                warn!(offset = message.offset, "Processing cancelled, leaving offset uncommitted");
                return Disposition::Stop;
            }
            Err(e) => e,
        };

        if error.is_poison() {
            error!(
                topic = message.topic,
                partition = message.partition,
                offset = message.offset,
                error = %error,
                "Dropping unprocessable message"
            );
            return Disposition::Commit;
        }

        let Some(queue) = &self.retry_queue else {
            error!(
                topic = message.topic,
                offset = message.offset,
                error = %error,
                "Message failed after retries, requesting redelivery"
            );
            return Disposition::Redeliver;
        };

        let retry_count = message.retry_count.saturating_add(1);
        match queue.forward(message.key, payload, retry_count).await {
            Ok(()) => {
                warn!(
                    offset = message.offset,
                    retry_queue = queue.topic(),
                    retry_count,
                    error = %error,
                    "Message failed after retries, forwarded to retry queue"
                );
                Disposition::Commit
            }
            Err(forward_error) => {
                error!(
                    offset = message.offset,
                    retry_queue = queue.topic(),
                    error = %error,
                    forward_error = %forward_error,
                    "Failed to forward to retry queue, requesting redelivery"
                );
                Disposition::Redeliver
            }
        }
    }

    fn pacing(&self) -> Option<Duration> {
        self.pacing
    }
}

/// Parses a [`RETRY_HEADER`] value. Garbage counts as zero.
pub fn parse_retry_count(value: Option<&[u8]>) -> u32 {
    value
        .and_then(|raw| std::str::from_utf8(raw).ok())
        .and_then(|text| text.trim().parse().ok())
        .unwrap_or(0)
}
