//! Per-event create/update/delete state machine.

use std::sync::Arc;

use tracing::{debug, field, info, instrument, warn, Span};

use crate::cdc::{ChangeEvent, ChangeKind};
use crate::entity::{EntityKind, Record};
use crate::fanout::{Action, Dispatcher, FanOutReport};
use crate::flags::{FlagService, IMAGE_BUS_FLAG};
use crate::store::EntityStore;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    /// Treat a delete of a missing row as success.
    pub ignore_missing_on_delete: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            ignore_missing_on_delete: true,
        }
    }
}

/// What one reconciled event did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Created(FanOutReport),
    Updated(FanOutReport),
    Deleted,
    /// Delete of a row that was already gone, swallowed by
    /// [`EngineOptions::ignore_missing_on_delete`].
    DeleteSkipped,
}

pub struct ReconcileEngine<K: EntityKind> {
    kind: K,
    store: Arc<dyn EntityStore<K::Entity>>,
    flags: Arc<dyn FlagService>,
    dispatcher: Arc<Dispatcher>,
    options: EngineOptions,
}

impl<K: EntityKind> ReconcileEngine<K> {
    pub fn new(
        kind: K,
        store: Arc<dyn EntityStore<K::Entity>>,
        flags: Arc<dyn FlagService>,
        dispatcher: Arc<Dispatcher>,
        options: EngineOptions,
    ) -> Self {
        Self {
            kind,
            store,
            flags,
            dispatcher,
            options,
        }
    }

    pub fn kind(&self) -> &K {
        &self.kind
    }

    /// Applies one change to storage and sends the derived messages.
    ///
    /// Every error is returned to the caller except a missing row on
    /// delete when the options allow it.
    #[instrument(skip_all, fields(kind = K::NAME, change = ?event.kind(), id = field::Empty))]
    pub async fn reconcile(&self, event: &ChangeEvent<K::Schema>) -> Result<Outcome> {
        if event.kind() == ChangeKind::Malformed {
            return Err(malformed());
        }

        if let Some(source) = &event.source {
            debug!(table = %source.qualified_table(), lsn = ?source.lsn, "Change source");
        }

        let message_bus_enabled = if self.kind.consults_flags() {
            self.flags.is_enabled(IMAGE_BUS_FLAG).await?
        } else {
            false
        };

        match (&event.before, &event.after) {
            (None, Some(after)) => {
                let report = self.apply(Action::Create, after, None, message_bus_enabled).await?;
                info!("Created");
                Ok(Outcome::Created(report))
            }
            (Some(before), Some(after)) => {
                let old_title = self.kind.old_title(before, after);
                let report = self
                    .apply(Action::Update, after, old_title.as_deref(), message_bus_enabled)
                    .await?;
                info!(old_title = ?old_title, "Updated");
                Ok(Outcome::Updated(report))
            }
            (Some(before), None) => self.delete(before).await,
            (None, None) => Err(malformed()),
        }
    }

    async fn apply(
        &self,
        action: Action,
        after: &K::Schema,
        old_title: Option<&str>,
        message_bus_enabled: bool,
    ) -> Result<FanOutReport> {
        let entity = self.kind.map_to_entity(after)?;
        Span::current().record("id", entity.id());

        self.store.upsert(&entity, old_title).await?;
        self.kind.sync_relations(&entity).await?;

        let plan = self.kind.fan_out(action, after);
        if plan.is_empty() {
            return Ok(FanOutReport::default());
        }
        self.dispatcher
            .dispatch(entity.id(), plan, message_bus_enabled)
            .await
    }

    async fn delete(&self, before: &K::Schema) -> Result<Outcome> {
        let entity = self.kind.map_to_entity(before)?;
        Span::current().record("id", entity.id());

        match self.store.delete(&entity).await {
            Ok(()) => {
                info!("Deleted");
                Ok(Outcome::Deleted)
            }
            Err(e) if e.is_not_found() && self.options.ignore_missing_on_delete => {
                warn!(error = %e, "Row already absent, ignoring delete");
                Ok(Outcome::DeleteSkipped)
            }
            Err(e) => Err(e),
        }
    }
}

fn malformed() -> Error {
    Error::MalformedEvent {
        message: "both before and after are null".to_string(),
    }
}
