//! Genre field to tag association sync.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::store::{AssociationStore, TagId, TagStore};
use crate::Result;

/// Turns the free-text genre column into a tag name list.
///
/// The column holds a JSON array of strings. Null, empty and unparseable
/// values all yield no names; names are trimmed, blanks dropped and
/// duplicates collapsed keeping first occurrence order.
pub fn parse_genres(raw: Option<&str>) -> Vec<String> {
    let raw = match raw {
        Some(raw) if !raw.is_empty() => raw,
        _ => return Vec::new(),
    };

    let parsed: Vec<Option<String>> = match serde_json::from_str(raw) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!(genres = raw, error = %e, "Failed to parse genres as JSON array");
            return Vec::new();
        }
    };

    let mut seen = HashSet::new();
    parsed
        .into_iter()
        .flatten()
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .filter(|name| seen.insert(name.clone()))
        .collect()
}

#[derive(Clone)]
pub struct TagReconciler {
    tags: Arc<dyn TagStore>,
    associations: Arc<dyn AssociationStore>,
}

impl TagReconciler {
    pub fn new(tags: Arc<dyn TagStore>, associations: Arc<dyn AssociationStore>) -> Self {
        Self { tags, associations }
    }

    /// Replaces the entity's tag set with exactly the tags named by `genres`.
    ///
    /// A tag that cannot be resolved is logged and left out; only a failure
    /// to replace the association set is returned. Yields the tag ids that
    /// were written.
    pub async fn sync_tags(&self, entity_id: &str, genres: Option<&str>) -> Result<Vec<TagId>> {
        let names = parse_genres(genres);

        let mut tag_ids = Vec::with_capacity(names.len());
        for name in &names {
            match self.tags.find_or_create(name).await {
                Ok(id) => {
                    if !tag_ids.contains(&id) {
                        tag_ids.push(id);
                    }
                }
                Err(e) => {
                    warn!(entity_id, tag = %name, error = %e, "Failed to find or create tag");
                }
            }
        }

        self.associations.replace_all(entity_id, &tag_ids).await?;
        debug!(entity_id, tags = tag_ids.len(), "Tag associations replaced");

        Ok(tag_ids)
    }
}
