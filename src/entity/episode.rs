use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::dates::normalize_timestamp;
use super::{EntityKind, Record};
use crate::Result;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EpisodeSchema {
    pub id: String,
    pub anime_id: Option<String>,
    pub episode: Option<i32>,
    pub title_en: Option<String>,
    pub title_jp: Option<String>,
    pub aired: Option<String>,
    pub synopsis: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnimeEpisode {
    pub id: String,
    pub anime_id: Option<String>,
    pub episode: Option<i32>,
    pub title_en: Option<String>,
    pub title_jp: Option<String>,
    pub aired: Option<String>,
    pub synopsis: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Record for AnimeEpisode {
    const TABLE: &'static str = "episodes";

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

/// Episodes are persisted only: no relations, no derived messages and no
/// routing decision.
pub struct EpisodeKind;

impl EntityKind for EpisodeKind {
    type Schema = EpisodeSchema;
    type Entity = AnimeEpisode;

    const NAME: &'static str = "anime_episode";

    fn map_to_entity(&self, data: &EpisodeSchema) -> Result<AnimeEpisode> {
        let aired = normalize_timestamp("aired", data.aired.as_deref())?;
        let now = Utc::now();

        Ok(AnimeEpisode {
            id: data.id.clone(),
            anime_id: data.anime_id.clone(),
            episode: data.episode,
            title_en: data.title_en.clone(),
            title_jp: data.title_jp.clone(),
            aired,
            synopsis: data.synopsis.clone(),
            created_at: now,
            updated_at: now,
        })
    }

    fn consults_flags(&self) -> bool {
        false
    }
}
