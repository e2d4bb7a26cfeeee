//! Wire schemas, persisted entities and the per-kind sync strategy.
//!
//! Each replicated table implements [`EntityKind`]; the reconcile engine is
//! generic over it and owns the create/update/delete state machine.

pub mod anime;
pub mod dates;
pub mod episode;
pub mod season;

use std::fmt::Debug;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::fanout::{Action, FanOutPlan};
use crate::Result;

pub use anime::{Anime, AnimeKind, AnimeSchema, RecordType};
pub use episode::{AnimeEpisode, EpisodeKind, EpisodeSchema};
pub use season::{AnimeSeason, SeasonKind, SeasonSchema, SeasonStatus};

/// A persisted row with a stable string identity.
pub trait Record: Debug + Send + Sync + 'static {
    const TABLE: &'static str;

    fn id(&self) -> &str;

    /// First-insert time. Stores keep it across upserts of the same id.
    fn created_at(&self) -> DateTime<Utc>;

    fn set_created_at(&mut self, at: DateTime<Utc>);
}

/// Strategy for one replicated entity type.
#[async_trait]
pub trait EntityKind: Send + Sync + 'static {
    /// Row shape as it appears in the CDC `before`/`after` blocks.
    type Schema: DeserializeOwned + Serialize + Debug + Send + Sync;
    /// Row shape as persisted locally.
    type Entity: Record;

    const NAME: &'static str;

    /// Pure conversion from the wire row. Stamps `created_at`/`updated_at`
    /// with the current time.
    fn map_to_entity(&self, schema: &Self::Schema) -> Result<Self::Entity>;

    /// Previous-title hint passed to the store on updates.
    fn old_title(&self, _before: &Self::Schema, _after: &Self::Schema) -> Option<String> {
        None
    }

    /// Brings secondary relations in line with a freshly upserted entity.
    async fn sync_relations(&self, _entity: &Self::Entity) -> Result<()> {
        Ok(())
    }

    /// Derived messages for a created or updated row.
    fn fan_out<'a>(&self, _action: Action, _after: &'a Self::Schema) -> FanOutPlan<'a, Self::Schema> {
        FanOutPlan::empty()
    }

    /// Whether events of this kind need the image-routing flag.
    fn consults_flags(&self) -> bool {
        true
    }
}
