//! In-process storage backend for tests.
//!
//! Keeps every row and every upsert's title hint for inspection, so it is
//! not meant for long-running use.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{AssociationStore, EntityStore, TagId, TagStore};
use crate::entity::Record;
use crate::{Error, Result};

/// One entity table keyed by id.
pub struct MemoryTable<E> {
    rows: Mutex<BTreeMap<String, E>>,
    old_titles: Mutex<Vec<Option<String>>>,
}

impl<E: Record + Clone> MemoryTable<E> {
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(BTreeMap::new()),
            old_titles: Mutex::new(Vec::new()),
        }
    }

    pub fn get(&self, id: &str) -> Option<E> {
        lock(&self.rows).get(id).cloned()
    }

    pub fn len(&self) -> usize {
        lock(&self.rows).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Title hints received by `upsert`, in call order.
    pub fn old_title_hints(&self) -> Vec<Option<String>> {
        lock(&self.old_titles).clone()
    }
}

impl<E: Record + Clone> Default for MemoryTable<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<E: Record + Clone> EntityStore<E> for MemoryTable<E> {
    async fn upsert(&self, entity: &E, old_title: Option<&str>) -> Result<()> {
        lock(&self.old_titles).push(old_title.map(str::to_string));

        let mut row = entity.clone();
        let mut rows = lock(&self.rows);
        if let Some(existing) = rows.get(entity.id()) {
            row.set_created_at(existing.created_at());
        }
        rows.insert(entity.id().to_string(), row);
        Ok(())
    }

    async fn delete(&self, entity: &E) -> Result<()> {
        match lock(&self.rows).remove(entity.id()) {
            Some(_) => Ok(()),
            None => Err(Error::NotFound {
                table: E::TABLE,
                id: entity.id().to_string(),
            }),
        }
    }
}

#[derive(Default)]
struct TagTables {
    by_name: HashMap<String, TagId>,
    next_id: TagId,
    associations: HashMap<String, BTreeSet<TagId>>,
}

/// Tag and association tables behind one lock, so find-or-create is atomic.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<TagTables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tag_count(&self) -> usize {
        lock(&self.tables).by_name.len()
    }

    pub fn tag_ids(&self, entity_id: &str) -> BTreeSet<TagId> {
        lock(&self.tables)
            .associations
            .get(entity_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Names of the tags currently associated with `entity_id`.
    pub fn tag_names(&self, entity_id: &str) -> BTreeSet<String> {
        let tables = lock(&self.tables);
        let Some(ids) = tables.associations.get(entity_id) else {
            return BTreeSet::new();
        };
        tables
            .by_name
            .iter()
            .filter(|(_, id)| ids.contains(*id))
            .map(|(name, _)| name.clone())
            .collect()
    }
}

#[async_trait]
impl TagStore for MemoryStore {
    async fn find_or_create(&self, name: &str) -> Result<TagId> {
        let mut tables = lock(&self.tables);
        if let Some(id) = tables.by_name.get(name) {
            return Ok(*id);
        }
        tables.next_id += 1;
        let id = tables.next_id;
        tables.by_name.insert(name.to_string(), id);
        Ok(id)
    }
}

#[async_trait]
impl AssociationStore for MemoryStore {
    async fn replace_all(&self, entity_id: &str, tag_ids: &[TagId]) -> Result<()> {
        let mut tables = lock(&self.tables);
        if tag_ids.is_empty() {
            tables.associations.remove(entity_id);
        } else {
            tables
                .associations
                .insert(entity_id.to_string(), tag_ids.iter().copied().collect());
        }
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
