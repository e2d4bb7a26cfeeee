use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::retry::RetryPolicy;
use crate::{Error, Result};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub postgres: PostgresConfig,
    pub kafka: KafkaConfig,
    pub topics: TopicsConfig,
    #[serde(default)]
    pub flags: FlagsConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PostgresConfig {
    pub host: String,
    #[serde(default = "default_pg_port")]
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KafkaConfig {
    pub brokers: Vec<String>,
    pub group_id: String,
    #[serde(default = "default_auto_offset_reset")]
    pub auto_offset_reset: String,
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u32,
    #[serde(default = "default_compression")]
    pub compression: String,
    #[serde(default = "default_acks")]
    pub acks: String,
    #[serde(default = "default_linger_ms")]
    pub linger_ms: u32,
    #[serde(default = "default_message_timeout_ms")]
    pub message_timeout_ms: u32,
    #[serde(default)]
    pub ensure_topics: bool,
    #[serde(default = "default_partitions")]
    pub topic_partitions: i32,
    #[serde(default = "default_replication_factor")]
    pub replication_factor: i32,
}

/// Source and destination topic names.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TopicsConfig {
    pub anime: String,
    pub anime_season: String,
    pub anime_episode: String,
    pub search_index: String,
    pub image: String,
    pub message_bus: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FlagsConfig {
    pub flagsmith: Option<FlagsmithConfig>,
    /// Fixed flag values used when no Flagsmith section is configured.
    #[serde(default)]
    pub static_flags: HashMap<String, bool>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FlagsmithConfig {
    #[serde(default = "default_flagsmith_url")]
    pub base_url: String,
    pub environment_key: String,
    #[serde(default = "default_flag_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SyncConfig {
    #[serde(default = "default_true")]
    pub ignore_missing_on_delete: bool,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Pause after each committed message. Zero disables pacing.
    #[serde(default)]
    pub pacing_ms: u64,
    #[serde(default)]
    pub retry_queue: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            ignore_missing_on_delete: true,
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            pacing_ms: 0,
            retry_queue: false,
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("ANIME_SYNC")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("kafka.brokers")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| Error::Config(e.to_string()))?;

        settings
            .try_deserialize()
            .map_err(|e| Error::Config(e.to_string()))
    }

    pub fn retry_topic(source_topic: &str) -> String {
        format!("{}-retry", source_topic)
    }
}

impl SyncConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }

    pub fn pacing(&self) -> Option<Duration> {
        (self.pacing_ms > 0).then(|| Duration::from_millis(self.pacing_ms))
    }
}

fn default_pg_port() -> u16 {
    5432
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_auto_offset_reset() -> String {
    "earliest".to_string()
}

fn default_session_timeout_ms() -> u32 {
    30_000
}

fn default_compression() -> String {
    "snappy".to_string()
}

fn default_acks() -> String {
    "all".to_string()
}

fn default_linger_ms() -> u32 {
    5
}

fn default_message_timeout_ms() -> u32 {
    30_000
}

fn default_partitions() -> i32 {
    3
}

fn default_replication_factor() -> i32 {
    1
}

fn default_flagsmith_url() -> String {
    "https://edge.api.flagsmith.com/api/v1/".to_string()
}

fn default_flag_timeout() -> u64 {
    5
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    10
}

fn default_base_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    30_000
}
