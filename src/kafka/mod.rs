pub mod consumer;
pub mod producer;
pub mod topic_manager;

pub use consumer::CdcConsumer;
pub use producer::{KafkaProducer, KafkaRetryQueue};
pub use topic_manager::TopicManager;
