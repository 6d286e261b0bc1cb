//! Soft-delete repository base
//!
//! Generic CRUD with recoverable deletion, used by every persisted entity in
//! the core. Callers never touch storage directly: ordinary reads filter out
//! soft-deleted rows, and `soft_delete`/`restore` are single-step conditional
//! writes so two concurrent deletes cannot both succeed.

use std::marker::PhantomData;

use crate::traits::{CoreEntity, EntityStore, SoftDeletable};
use crate::types::*;

/// Repository over one entity family and a storage backend
pub struct Repository<E, S> {
    store: S,
    _entity: PhantomData<E>,
}

impl<E, S> Repository<E, S>
where
    E: CoreEntity,
    S: EntityStore<E>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            _entity: PhantomData,
        }
    }

    /// Persist a new entity
    pub async fn insert(&mut self, entity: &E) -> CoreResult<()> {
        self.store.insert(entity).await
    }

    /// Overwrite an existing entity
    pub async fn update(&mut self, entity: &E) -> CoreResult<()> {
        self.store.update(entity).await
    }

    /// Audit/administrative read that ignores the soft-delete filter
    pub async fn find_by_id_including_deleted(&self, id: EntityId) -> CoreResult<Option<E>> {
        self.store.fetch(id).await
    }

    /// Audit/administrative read of every row, deleted included
    pub async fn find_all_including_deleted(&self) -> CoreResult<Vec<E>> {
        self.store.fetch_all().await
    }

    pub async fn count_all(&self) -> CoreResult<usize> {
        Ok(self.store.fetch_all().await?.len())
    }

    /// Fetch by id, failing if the row does not exist at all
    pub async fn get_required(&self, id: EntityId) -> CoreResult<E> {
        self.store
            .fetch(id)
            .await?
            .ok_or(CoreError::NotFound { kind: E::KIND, id })
    }

    /// Guarded write: re-check the source state inside the store's
    /// conditional update. On error the row is left untouched.
    pub async fn update_guarded(
        &mut self,
        id: EntityId,
        apply: Box<dyn for<'a> FnOnce(&'a E) -> CoreResult<E> + Send>,
    ) -> CoreResult<E> {
        self.store.update_with(id, apply).await
    }

    /// Guarded write that also sees a same-step snapshot of every row,
    /// for invariants spanning the family
    pub async fn update_guarded_with_all(
        &mut self,
        id: EntityId,
        apply: Box<dyn for<'a> FnOnce(&'a E, &'a [E]) -> CoreResult<E> + Send>,
    ) -> CoreResult<E> {
        self.store.update_with_all(id, apply).await
    }

    /// Irreversible row removal. Bypasses all soft-delete bookkeeping;
    /// reserved for retention/compliance flows, never ordinary business
    /// logic.
    pub async fn hard_delete(&mut self, id: EntityId) -> CoreResult<()> {
        tracing::warn!(kind = %E::KIND, %id, "hard delete");
        self.store.remove(id).await
    }
}

impl<E, S> Repository<E, S>
where
    E: SoftDeletable,
    S: EntityStore<E>,
{
    /// Standard read path: invisible if soft-deleted
    pub async fn find_by_id(&self, id: EntityId) -> CoreResult<Option<E>> {
        Ok(self.store.fetch(id).await?.filter(|e| !e.is_deleted()))
    }

    /// Fetch by id, failing if missing or soft-deleted
    pub async fn find_required(&self, id: EntityId) -> CoreResult<E> {
        self.find_by_id(id)
            .await?
            .ok_or(CoreError::NotFound { kind: E::KIND, id })
    }

    /// Non-deleted entities ordered by a caller-supplied key
    pub async fn find_all_active<K, F>(&self, order_by: F, ascending: bool) -> CoreResult<Vec<E>>
    where
        F: Fn(&E) -> K,
        K: Ord,
    {
        let mut active: Vec<E> = self
            .store
            .fetch_all()
            .await?
            .into_iter()
            .filter(|e| !e.is_deleted())
            .collect();
        active.sort_by(|a, b| {
            let ord = order_by(a).cmp(&order_by(b));
            if ascending {
                ord
            } else {
                ord.reverse()
            }
        });
        Ok(active)
    }

    pub async fn count_active(&self) -> CoreResult<usize> {
        Ok(self
            .store
            .fetch_all()
            .await?
            .iter()
            .filter(|e| !e.is_deleted())
            .count())
    }

    /// Set the deletion timestamp, only if currently not deleted. The guard
    /// runs inside the store's conditional write, not as read-then-write.
    pub async fn soft_delete(&mut self, id: EntityId, actor: &ActorId) -> CoreResult<E> {
        let actor = actor.clone();
        let result = self
            .store
            .update_with(
                id,
                Box::new(move |current: &E| {
                    if current.is_deleted() {
                        return Err(CoreError::AlreadyDeletedOrNotFound { kind: E::KIND, id });
                    }
                    let mut next = current.clone();
                    next.set_deleted(Some(chrono::Utc::now().naive_utc()), Some(actor));
                    Ok(next)
                }),
            )
            .await;
        match result {
            Ok(entity) => {
                tracing::debug!(kind = %E::KIND, %id, "soft deleted");
                Ok(entity)
            }
            Err(CoreError::NotFound { kind, id }) => {
                Err(CoreError::AlreadyDeletedOrNotFound { kind, id })
            }
            Err(other) => Err(other),
        }
    }

    /// Clear the deletion timestamp, only if currently deleted. Symmetric
    /// conditional-write guard to `soft_delete`.
    pub async fn restore(&mut self, id: EntityId) -> CoreResult<E> {
        let result = self
            .store
            .update_with(
                id,
                Box::new(move |current: &E| {
                    if !current.is_deleted() {
                        return Err(CoreError::NotDeletedOrNotFound { kind: E::KIND, id });
                    }
                    let mut next = current.clone();
                    next.set_deleted(None, None);
                    Ok(next)
                }),
            )
            .await;
        match result {
            Ok(entity) => {
                tracing::debug!(kind = %E::KIND, %id, "restored");
                Ok(entity)
            }
            Err(CoreError::NotFound { kind, id }) => {
                Err(CoreError::NotDeletedOrNotFound { kind, id })
            }
            Err(other) => Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::memory_store::MemoryStore;
    use bigdecimal::BigDecimal;
    use chrono::NaiveDate;

    fn sample_item(invoice_number: &str, amount: i64) -> SoaItem {
        SoaItem::new(
            EntityId::new(),
            EntityId::new(),
            EntityId::new(),
            invoice_number.to_string(),
            BigDecimal::from(amount),
            "USD".to_string(),
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
        )
    }

    fn repo() -> Repository<SoaItem, MemoryStore> {
        Repository::new(MemoryStore::new())
    }

    #[tokio::test]
    async fn soft_delete_hides_entity_from_standard_reads() {
        let mut repo = repo();
        let item = sample_item("INV-001", 100);
        repo.insert(&item).await.unwrap();

        repo.soft_delete(item.id, &ActorId::new("alice")).await.unwrap();

        assert!(repo.find_by_id(item.id).await.unwrap().is_none());
        assert!(repo
            .find_by_id_including_deleted(item.id)
            .await
            .unwrap()
            .is_some());
        assert_eq!(repo.count_active().await.unwrap(), 0);
        assert_eq!(repo.count_all().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn soft_delete_then_restore_round_trips_visible_record() {
        let mut repo = repo();
        let item = sample_item("INV-002", 250);
        repo.insert(&item).await.unwrap();

        repo.soft_delete(item.id, &ActorId::new("alice")).await.unwrap();
        let restored = repo.restore(item.id).await.unwrap();

        // Indistinguishable from pre-delete except audit timestamps
        assert_eq!(restored.invoice_number, item.invoice_number);
        assert_eq!(restored.amount, item.amount);
        assert_eq!(restored.status, item.status);
        assert!(restored.deleted_at.is_none());
        assert!(restored.deleted_by.is_none());
        assert!(repo.find_by_id(item.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn double_soft_delete_fails_with_already_deleted() {
        let mut repo = repo();
        let item = sample_item("INV-003", 10);
        repo.insert(&item).await.unwrap();

        repo.soft_delete(item.id, &ActorId::new("alice")).await.unwrap();
        let err = repo
            .soft_delete(item.id, &ActorId::new("bob"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::AlreadyDeletedOrNotFound { kind: EntityKind::SoaItem, .. }
        ));
    }

    #[tokio::test]
    async fn restore_of_live_entity_fails_with_not_deleted() {
        let mut repo = repo();
        let item = sample_item("INV-004", 10);
        repo.insert(&item).await.unwrap();

        let err = repo.restore(item.id).await.unwrap_err();
        assert!(matches!(err, CoreError::NotDeletedOrNotFound { .. }));
    }

    #[tokio::test]
    async fn soft_delete_of_missing_entity_fails() {
        let mut repo = repo();
        let err = repo
            .soft_delete(EntityId::new(), &ActorId::new("alice"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::AlreadyDeletedOrNotFound { .. }));
    }

    #[tokio::test]
    async fn find_all_active_orders_by_caller_key() {
        let mut repo = repo();
        let a = sample_item("INV-B", 200);
        let b = sample_item("INV-A", 100);
        let c = sample_item("INV-C", 300);
        for item in [&a, &b, &c] {
            repo.insert(item).await.unwrap();
        }
        repo.soft_delete(c.id, &ActorId::new("alice")).await.unwrap();

        let asc = repo
            .find_all_active(|i| i.invoice_number.clone(), true)
            .await
            .unwrap();
        assert_eq!(asc.len(), 2);
        assert_eq!(asc[0].invoice_number, "INV-A");
        assert_eq!(asc[1].invoice_number, "INV-B");

        let desc = repo
            .find_all_active(|i| i.invoice_number.clone(), false)
            .await
            .unwrap();
        assert_eq!(desc[0].invoice_number, "INV-B");
    }

    #[tokio::test]
    async fn hard_delete_removes_row_entirely() {
        let mut repo = repo();
        let item = sample_item("INV-005", 10);
        repo.insert(&item).await.unwrap();

        repo.hard_delete(item.id).await.unwrap();
        assert!(repo
            .find_by_id_including_deleted(item.id)
            .await
            .unwrap()
            .is_none());
        assert_eq!(repo.count_all().await.unwrap(), 0);
    }
}
