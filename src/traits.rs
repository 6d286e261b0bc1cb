//! Traits for storage abstraction and external collaborators

use async_trait::async_trait;
use chrono::NaiveDateTime;

use crate::types::*;

/// A persisted entity the repository base can manage
pub trait CoreEntity: Clone + Send + Sync + 'static {
    /// Entity family, used for logging and error context
    const KIND: EntityKind;

    fn id(&self) -> EntityId;
}

/// Opt-in to recoverable deletion. Implementing this trait registers the
/// entity for soft delete; `Repository::soft_delete`/`restore` only exist
/// for implementors, so an unregistered entity fails to compile rather
/// than fails at call time.
pub trait SoftDeletable: CoreEntity {
    fn deleted_at(&self) -> Option<NaiveDateTime>;

    /// Set or clear the deletion timestamp and deleting actor
    fn set_deleted(&mut self, at: Option<NaiveDateTime>, by: Option<ActorId>);

    fn is_deleted(&self) -> bool {
        self.deleted_at().is_some()
    }
}

/// Storage abstraction for one entity family
///
/// This trait allows the workflow core to work with any storage backend
/// (PostgreSQL, MySQL, SQLite, in-memory, etc.) by implementing these
/// methods. Reads return rows regardless of deletion state; the repository
/// layer applies the soft-delete read filter.
#[async_trait]
pub trait EntityStore<E: CoreEntity>: Send + Sync {
    /// Insert a new row; fails if the id already exists
    async fn insert(&mut self, entity: &E) -> CoreResult<()>;

    /// Fetch a row by id, deleted or not
    async fn fetch(&self, id: EntityId) -> CoreResult<Option<E>>;

    /// Fetch every row, deleted or not
    async fn fetch_all(&self) -> CoreResult<Vec<E>>;

    /// Overwrite an existing row; fails if the id does not exist
    async fn update(&mut self, entity: &E) -> CoreResult<()>;

    /// Conditional update: `apply` observes the current row and either
    /// returns the replacement or an error, in which case the row is left
    /// untouched. The storage engine must run the whole step atomically so
    /// two concurrent guarded writes cannot both observe the same prior
    /// state and both succeed.
    async fn update_with(
        &mut self,
        id: EntityId,
        apply: Box<dyn for<'a> FnOnce(&'a E) -> CoreResult<E> + Send>,
    ) -> CoreResult<E>;

    /// Conditional update with visibility of every row in the family.
    /// `apply` receives the current row and a snapshot of all rows taken
    /// under the same atomic step, for invariants that span rows (e.g.
    /// at most one confirmed match per item).
    async fn update_with_all(
        &mut self,
        id: EntityId,
        apply: Box<dyn for<'a> FnOnce(&'a E, &'a [E]) -> CoreResult<E> + Send>,
    ) -> CoreResult<E>;

    /// Irreversible row removal
    async fn remove(&mut self, id: EntityId) -> CoreResult<()>;
}

/// Read-only view of the internal invoice ledger, scoped per vendor and
/// company. The reconciliation engine only ever reads through this.
#[async_trait]
pub trait InvoiceSource: Send + Sync {
    async fn invoices_for(
        &self,
        vendor_id: EntityId,
        company_id: EntityId,
    ) -> CoreResult<Vec<Invoice>>;
}

/// External ledger/accounting collaborator that books an approved debit
/// note. Returns the ledger-side posting timestamp on success; the core
/// marks the note POSTED only after this call succeeds.
#[async_trait]
pub trait LedgerPoster: Send + Sync {
    async fn post_adjustment(&self, note: &DebitNote) -> CoreResult<NaiveDateTime>;
}

/// Data produced for every accepted state transition, handed to the
/// notification sink and returned to callers for audit timelines
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TransitionEvent {
    pub kind: EntityKind,
    pub entity_id: EntityId,
    pub from: String,
    pub to: String,
    pub actor: Option<ActorId>,
    pub at: NaiveDateTime,
}

/// Side channel for transition notifications. Failures are logged and
/// never fail or roll back the transition itself.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, event: &TransitionEvent) -> Result<(), String>;
}

/// Default sink that drops every event
pub struct NoopNotificationSink;

impl NotificationSink for NoopNotificationSink {
    fn notify(&self, _event: &TransitionEvent) -> Result<(), String> {
        Ok(())
    }
}
