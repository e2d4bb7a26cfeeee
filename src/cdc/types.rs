use serde::{Deserialize, Serialize};

/// One row-level change as emitted by the upstream connector.
///
/// `before` is null for inserts, `after` is null for deletes. A pair of
/// nulls is not a valid change and is rejected by [`ChangeEvent::kind`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(deserialize = "S: Deserialize<'de>"))]
pub struct ChangeEvent<S> {
    #[serde(default = "Option::default")]
    pub before: Option<S>,
    #[serde(default = "Option::default")]
    pub after: Option<S>,
    #[serde(default)]
    pub source: Option<SourceMetadata>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Create,
    Update,
    Delete,
    Malformed,
}

impl<S> ChangeEvent<S> {
    pub fn kind(&self) -> ChangeKind {
        match (&self.before, &self.after) {
            (None, Some(_)) => ChangeKind::Create,
            (Some(_), Some(_)) => ChangeKind::Update,
            (Some(_), None) => ChangeKind::Delete,
            (None, None) => ChangeKind::Malformed,
        }
    }
}

/// Debezium `source` block. Every field is optional; the block is only
/// carried for logging.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceMetadata {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub connector: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub ts_ms: Option<i64>,
    #[serde(default)]
    pub snapshot: Option<String>,
    #[serde(default)]
    pub db: Option<String>,
    #[serde(default)]
    pub sequence: Option<String>,
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default, rename = "txId")]
    pub tx_id: Option<i64>,
    #[serde(default)]
    pub lsn: Option<i64>,
    #[serde(default)]
    pub xmin: Option<serde_json::Value>,
}

impl SourceMetadata {
    /// `db.schema.table` for log lines, with `?` for missing parts.
    pub fn qualified_table(&self) -> String {
        format!(
            "{}.{}.{}",
            self.db.as_deref().unwrap_or("?"),
            self.schema.as_deref().unwrap_or("?"),
            self.table.as_deref().unwrap_or("?")
        )
    }
}
