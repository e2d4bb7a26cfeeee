use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{EntityKind, Record};
use crate::fanout::{Action, FanOutPlan, ProducerPayload};
use crate::Result;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeasonSchema {
    pub id: String,
    #[serde(default)]
    pub season: String,
    pub status: Option<String>,
    pub episode_count: Option<i32>,
    pub notes: Option<String>,
    pub anime_id: Option<String>,
    pub created_at: Option<i64>,
    pub updated_at: Option<i64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SeasonStatus {
    #[default]
    Unknown,
    Confirmed,
    Announced,
    Cancelled,
}

impl SeasonStatus {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("confirmed") => SeasonStatus::Confirmed,
            Some("announced") => SeasonStatus::Announced,
            Some("cancelled") => SeasonStatus::Cancelled,
            _ => SeasonStatus::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SeasonStatus::Unknown => "unknown",
            SeasonStatus::Confirmed => "confirmed",
            SeasonStatus::Announced => "announced",
            SeasonStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnimeSeason {
    pub id: String,
    pub season: String,
    pub status: SeasonStatus,
    pub episode_count: Option<i32>,
    pub notes: Option<String>,
    pub anime_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Record for AnimeSeason {
    const TABLE: &'static str = "anime_seasons";

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

/// Seasons have no relations and fan out to the search index only.
pub struct SeasonKind;

impl EntityKind for SeasonKind {
    type Schema = SeasonSchema;
    type Entity = AnimeSeason;

    const NAME: &'static str = "anime_season";

    fn map_to_entity(&self, data: &SeasonSchema) -> Result<AnimeSeason> {
        let now = Utc::now();
        Ok(AnimeSeason {
            id: data.id.clone(),
            season: data.season.clone(),
            status: SeasonStatus::parse(data.status.as_deref()),
            episode_count: data.episode_count,
            notes: data.notes.clone(),
            anime_id: data.anime_id.clone(),
            created_at: now,
            updated_at: now,
        })
    }

    fn fan_out<'a>(&self, action: Action, after: &'a SeasonSchema) -> FanOutPlan<'a, SeasonSchema> {
        FanOutPlan {
            search: Some(ProducerPayload { action, data: after }),
            image: None,
        }
    }
}
