#![allow(dead_code)]

use std::collections::HashSet;
use std::env;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use anime_sync::config::PostgresConfig;
use anime_sync::entity::{Anime, AnimeEpisode, AnimeKind, AnimeSeason, EpisodeKind, SeasonKind};
use anime_sync::fanout::{Dispatcher, ImageRoutes, Publisher, TopicImageSender};
use anime_sync::flags::FlagService;
use anime_sync::replicator::RetryQueue;
use anime_sync::store::{MemoryStore, MemoryTable};
use anime_sync::tags::TagReconciler;
use anime_sync::{EngineOptions, Error, ReconcileEngine, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

pub const SEARCH_TOPIC: &str = "algolia";
pub const IMAGE_TOPIC: &str = "image-sync";
pub const BUS_TOPIC: &str = "image-sync-bus";

/// Get PostgreSQL test configuration from environment variables
pub fn get_test_postgres_config() -> PostgresConfig {
    PostgresConfig {
        host: env::var("TEST_PG_HOST").unwrap_or_else(|_| "localhost".to_string()),
        port: env::var("TEST_PG_PORT")
            .unwrap_or_else(|_| "5432".to_string())
            .parse()
            .unwrap_or(5432),
        database: env::var("TEST_PG_DATABASE").unwrap_or_else(|_| "postgres".to_string()),
        username: env::var("TEST_PG_USERNAME").unwrap_or_else(|_| "postgres".to_string()),
        password: env::var("TEST_PG_PASSWORD").unwrap_or_else(|_| "postgres".to_string()),
        connect_timeout_secs: 10,
    }
}

#[derive(Debug, Clone)]
pub struct SentMessage {
    pub topic: String,
    pub key: Option<String>,
    pub body: Value,
}

/// Publisher that keeps every message in memory.
#[derive(Default)]
pub struct RecordingPublisher {
    sent: Mutex<Vec<SentMessage>>,
    failing_topics: Mutex<HashSet<String>>,
}

impl RecordingPublisher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_topic(&self, topic: &str) {
        self.failing_topics.lock().unwrap().insert(topic.to_string());
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, topic: &str) -> Vec<SentMessage> {
        self.sent().into_iter().filter(|m| m.topic == topic).collect()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, topic: &str, key: Option<&str>, payload: &[u8]) -> Result<()> {
        if self.failing_topics.lock().unwrap().contains(topic) {
            return Err(Error::Producer {
                topic: topic.to_string(),
                message: "broker unavailable".to_string(),
            });
        }
        self.sent.lock().unwrap().push(SentMessage {
            topic: topic.to_string(),
            key: key.map(str::to_string),
            body: serde_json::from_slice(payload)?,
        });
        Ok(())
    }
}

/// Flag service whose answers and failures are set by the test.
#[derive(Default)]
pub struct ScriptedFlags {
    enabled: AtomicBool,
    failures_left: AtomicU32,
    always_fail: AtomicBool,
    calls: AtomicU32,
}

impl ScriptedFlags {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Fail the next `n` lookups, then answer normally.
    pub fn fail_next(&self, n: u32) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    pub fn fail_always(&self) {
        self.always_fail.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FlagService for ScriptedFlags {
    async fn is_enabled(&self, _name: &str) -> Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.always_fail.load(Ordering::SeqCst) {
            return Err(Error::FlagService("connection refused".to_string()));
        }
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::FlagService("timeout".to_string()));
        }
        Ok(self.enabled.load(Ordering::SeqCst))
    }
}

#[derive(Debug, Clone)]
pub struct Forwarded {
    pub key: Option<Vec<u8>>,
    pub payload: Vec<u8>,
    pub retry_count: u32,
}

#[derive(Default)]
pub struct RecordingRetryQueue {
    forwarded: Mutex<Vec<Forwarded>>,
    fail: AtomicBool,
}

impl RecordingRetryQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub fn forwarded(&self) -> Vec<Forwarded> {
        self.forwarded.lock().unwrap().clone()
    }
}

#[async_trait]
impl RetryQueue for RecordingRetryQueue {
    async fn forward(&self, key: Option<&[u8]>, payload: &[u8], retry_count: u32) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Producer {
                topic: self.topic().to_string(),
                message: "retry queue unavailable".to_string(),
            });
        }
        self.forwarded.lock().unwrap().push(Forwarded {
            key: key.map(<[u8]>::to_vec),
            payload: payload.to_vec(),
            retry_count,
        });
        Ok(())
    }

    fn topic(&self) -> &str {
        "anime-retry"
    }
}

/// In-memory collaborators shared by the engines under test.
pub struct Fixture {
    pub anime: Arc<MemoryTable<Anime>>,
    pub seasons: Arc<MemoryTable<AnimeSeason>>,
    pub episodes: Arc<MemoryTable<AnimeEpisode>>,
    pub tags: Arc<MemoryStore>,
    pub publisher: Arc<RecordingPublisher>,
    pub flags: Arc<ScriptedFlags>,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            anime: Arc::new(MemoryTable::new()),
            seasons: Arc::new(MemoryTable::new()),
            episodes: Arc::new(MemoryTable::new()),
            tags: Arc::new(MemoryStore::new()),
            publisher: RecordingPublisher::new(),
            flags: ScriptedFlags::new(),
        }
    }

    fn dispatcher(&self) -> Arc<Dispatcher> {
        let publisher: Arc<dyn Publisher> = self.publisher.clone();
        let routes = ImageRoutes::new(
            Arc::new(TopicImageSender::new(publisher.clone(), BUS_TOPIC)),
            Arc::new(TopicImageSender::new(publisher.clone(), IMAGE_TOPIC)),
        );
        Arc::new(Dispatcher::new(publisher, SEARCH_TOPIC, routes))
    }

    pub fn anime_engine(&self, options: EngineOptions) -> ReconcileEngine<AnimeKind> {
        let kind = AnimeKind::new(TagReconciler::new(self.tags.clone(), self.tags.clone()));
        ReconcileEngine::new(kind, self.anime.clone(), self.flags.clone(), self.dispatcher(), options)
    }

    pub fn season_engine(&self) -> ReconcileEngine<SeasonKind> {
        ReconcileEngine::new(
            SeasonKind,
            self.seasons.clone(),
            self.flags.clone(),
            self.dispatcher(),
            EngineOptions::default(),
        )
    }

    pub fn episode_engine(&self) -> ReconcileEngine<EpisodeKind> {
        ReconcileEngine::new(
            EpisodeKind,
            self.episodes.clone(),
            self.flags.clone(),
            self.dispatcher(),
            EngineOptions::default(),
        )
    }
}

/// Connector-shaped `anime` row.
pub fn anime_row(id: &str, title_en: Option<&str>, genres: Option<&str>) -> Value {
    json!({
        "id": id,
        "anidbid": null,
        "thetvdbid": "81797",
        "title_en": title_en,
        "title_jp": null,
        "title_romaji": null,
        "title_kanji": null,
        "type": "TV",
        "image_url": null,
        "synopsis": "A synopsis.",
        "episodes": 37,
        "status": "Finished Airing",
        "duration": "23 min per ep",
        "broadcast": null,
        "source": "Manga",
        "created_at": 1714000000000i64,
        "updated_at": 1714000000000i64,
        "rating": "8.62",
        "start_date": "2006-10-04T00:00:00Z",
        "end_date": "2007-06-27T00:00:00Z",
        "title_synonyms": null,
        "genres": genres,
        "licensors": null,
        "studios": "Madhouse",
        "ranking": 79
    })
}

pub fn envelope(before: Value, after: Value) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "before": before,
        "after": after,
        "source": {
            "version": "2.5.0.Final",
            "connector": "postgresql",
            "name": "myanimelist",
            "ts_ms": 1714000000123i64,
            "snapshot": "false",
            "db": "myanimelist",
            "schema": "public",
            "table": "anime",
            "txId": 771,
            "lsn": 24023128,
            "xmin": null
        },
        "op": "c",
        "ts_ms": 1714000000456i64
    }))
    .unwrap()
}
