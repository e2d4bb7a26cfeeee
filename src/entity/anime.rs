use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::dates::{lenient_f64, normalize_timestamp};
use super::{EntityKind, Record};
use crate::fanout::{title_slug, Action, DataType, FanOutPlan, ImagePayload, ImageSchema, ProducerPayload};
use crate::tags::TagReconciler;
use crate::Result;

/// `anime` row as emitted by the connector.
///
/// Also the `data` body of search-index messages, so field names are the
/// wire names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnimeSchema {
    pub id: String,
    pub anidbid: Option<String>,
    pub thetvdbid: Option<String>,
    pub title_en: Option<String>,
    pub title_jp: Option<String>,
    pub title_romaji: Option<String>,
    pub title_kanji: Option<String>,
    #[serde(rename = "type")]
    pub record_type: Option<String>,
    pub image_url: Option<String>,
    pub synopsis: Option<String>,
    pub episodes: Option<i32>,
    pub status: Option<String>,
    pub duration: Option<String>,
    pub broadcast: Option<String>,
    pub source: Option<String>,
    pub created_at: Option<i64>,
    pub updated_at: Option<i64>,
    pub rating: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub title_synonyms: Option<String>,
    /// JSON array of genre names, stored as text upstream.
    pub genres: Option<String>,
    pub licensors: Option<String>,
    pub studios: Option<String>,
    pub ranking: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordType {
    Tv,
    Movie,
    Ova,
    Ona,
    Special,
    Music,
    Other(String),
}

impl RecordType {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "tv" => RecordType::Tv,
            "movie" => RecordType::Movie,
            "ova" => RecordType::Ova,
            "ona" => RecordType::Ona,
            "special" => RecordType::Special,
            "music" => RecordType::Music,
            _ => RecordType::Other(raw.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            RecordType::Tv => "TV",
            RecordType::Movie => "Movie",
            RecordType::Ova => "OVA",
            RecordType::Ona => "ONA",
            RecordType::Special => "Special",
            RecordType::Music => "Music",
            RecordType::Other(raw) => raw,
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Anime {
    pub id: String,
    pub anidb_id: Option<String>,
    pub the_tvdb_id: Option<String>,
    pub record_type: Option<RecordType>,
    pub title_en: Option<String>,
    pub title_jp: Option<String>,
    pub title_romaji: Option<String>,
    pub title_kanji: Option<String>,
    pub title_synonyms: Option<String>,
    pub image_url: Option<String>,
    pub synopsis: Option<String>,
    pub episodes: Option<i32>,
    pub status: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub genres: Option<String>,
    pub duration: Option<String>,
    pub broadcast: Option<String>,
    pub source: Option<String>,
    pub licensors: Option<String>,
    pub studios: Option<String>,
    pub rating: Option<f64>,
    pub ranking: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Record for Anime {
    const TABLE: &'static str = "anime";

    fn id(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn set_created_at(&mut self, at: DateTime<Utc>) {
        self.created_at = at;
    }
}

pub struct AnimeKind {
    tags: TagReconciler,
}

impl AnimeKind {
    pub fn new(tags: TagReconciler) -> Self {
        Self { tags }
    }
}

#[async_trait]
impl EntityKind for AnimeKind {
    type Schema = AnimeSchema;
    type Entity = Anime;

    const NAME: &'static str = "anime";

    fn map_to_entity(&self, data: &AnimeSchema) -> Result<Anime> {
        let start_date = normalize_timestamp("start_date", data.start_date.as_deref())?;
        let end_date = normalize_timestamp("end_date", data.end_date.as_deref())?;
        let now = Utc::now();

        Ok(Anime {
            id: data.id.clone(),
            anidb_id: data.anidbid.clone(),
            the_tvdb_id: data.thetvdbid.clone(),
            record_type: data.record_type.as_deref().map(RecordType::parse),
            title_en: data.title_en.clone(),
            title_jp: data.title_jp.clone(),
            title_romaji: data.title_romaji.clone(),
            title_kanji: data.title_kanji.clone(),
            title_synonyms: data.title_synonyms.clone(),
            image_url: data.image_url.clone(),
            synopsis: data.synopsis.clone(),
            episodes: data.episodes,
            status: data.status.clone(),
            start_date,
            end_date,
            genres: data.genres.clone(),
            duration: data.duration.clone(),
            broadcast: data.broadcast.clone(),
            source: data.source.clone(),
            licensors: data.licensors.clone(),
            studios: data.studios.clone(),
            rating: lenient_f64("rating", &data.id, data.rating.as_deref()),
            ranking: data.ranking,
            created_at: now,
            updated_at: now,
        })
    }

    fn old_title(&self, before: &AnimeSchema, after: &AnimeSchema) -> Option<String> {
        match (&before.title_en, &before.title_jp) {
            (Some(en), _) if after.title_en.as_ref() != Some(en) => Some(en.clone()),
            (None, Some(jp)) if after.title_jp.as_ref() != Some(jp) => Some(jp.clone()),
            _ => None,
        }
    }

    async fn sync_relations(&self, entity: &Anime) -> Result<()> {
        self.tags.sync_tags(&entity.id, entity.genres.as_deref()).await?;
        Ok(())
    }

    fn fan_out<'a>(&self, action: Action, after: &'a AnimeSchema) -> FanOutPlan<'a, AnimeSchema> {
        let Some(title) = after.title_en.as_deref().or(after.title_jp.as_deref()) else {
            debug!(id = %after.id, "No title to key derived messages, skipping fan-out");
            return FanOutPlan::empty();
        };
        let slug = title_slug(title);

        FanOutPlan {
            search: Some(ProducerPayload { action, data: after }),
            image: after.image_url.as_ref().map(|url| ImagePayload {
                data: ImageSchema {
                    name: slug,
                    url: url.clone(),
                    data_type: DataType::Anime,
                },
            }),
        }
    }
}
