//! Storage gateway: idempotent upsert/delete of entities plus the tag tables.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;

use crate::entity::Record;
use crate::Result;

pub use memory::{MemoryStore, MemoryTable};
pub use postgres::PgStore;

/// Durable identity of a tag.
pub type TagId = i64;

#[async_trait]
pub trait EntityStore<E: Record>: Send + Sync {
    /// Full-record replace keyed by `entity.id()`.
    ///
    /// `old_title` names the row's previous title for backends that key
    /// lookups by title. Identity-keyed backends ignore it.
    async fn upsert(&self, entity: &E, old_title: Option<&str>) -> Result<()>;

    /// Removes the row keyed by `entity.id()`. A missing row is
    /// [`crate::Error::NotFound`].
    async fn delete(&self, entity: &E) -> Result<()>;
}

#[async_trait]
pub trait TagStore: Send + Sync {
    /// Atomic insert-if-absent-else-read by exact name.
    async fn find_or_create(&self, name: &str) -> Result<TagId>;
}

#[async_trait]
pub trait AssociationStore: Send + Sync {
    /// Makes the entity's association set equal to `tag_ids`.
    async fn replace_all(&self, entity_id: &str, tag_ids: &[TagId]) -> Result<()>;
}
