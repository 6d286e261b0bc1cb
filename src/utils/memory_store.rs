//! In-memory storage implementation for testing and development

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::payment::Payment;
use crate::traits::{CoreEntity, EntityStore, InvoiceSource};
use crate::types::*;

/// In-memory store backing every entity family. Clones share the underlying
/// maps, so one store can be handed to several managers. Each guarded write
/// holds the map's write lock across the predicate check and the write,
/// which gives the conditional-update atomicity the repository relies on.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    soa_items: Arc<RwLock<HashMap<EntityId, SoaItem>>>,
    soa_matches: Arc<RwLock<HashMap<EntityId, SoaMatch>>>,
    discrepancies: Arc<RwLock<HashMap<EntityId, SoaDiscrepancy>>>,
    debit_notes: Arc<RwLock<HashMap<EntityId, DebitNote>>>,
    payments: Arc<RwLock<HashMap<EntityId, Payment>>>,
}

impl MemoryStore {
    /// Create a new memory store instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all data (useful for testing)
    pub fn clear(&self) {
        self.soa_items.write().unwrap().clear();
        self.soa_matches.write().unwrap().clear();
        self.discrepancies.write().unwrap().clear();
        self.debit_notes.write().unwrap().clear();
        self.payments.write().unwrap().clear();
    }
}

macro_rules! impl_entity_store {
    ($entity:ty, $field:ident) => {
        #[async_trait]
        impl EntityStore<$entity> for MemoryStore {
            async fn insert(&mut self, entity: &$entity) -> CoreResult<()> {
                let mut map = self.$field.write().unwrap();
                if map.contains_key(&entity.id()) {
                    return Err(CoreError::Validation(format!(
                        "{} {} already exists",
                        <$entity as CoreEntity>::KIND,
                        entity.id()
                    )));
                }
                map.insert(entity.id(), entity.clone());
                Ok(())
            }

            async fn fetch(&self, id: EntityId) -> CoreResult<Option<$entity>> {
                Ok(self.$field.read().unwrap().get(&id).cloned())
            }

            async fn fetch_all(&self) -> CoreResult<Vec<$entity>> {
                Ok(self.$field.read().unwrap().values().cloned().collect())
            }

            async fn update(&mut self, entity: &$entity) -> CoreResult<()> {
                let mut map = self.$field.write().unwrap();
                if !map.contains_key(&entity.id()) {
                    return Err(CoreError::NotFound {
                        kind: <$entity as CoreEntity>::KIND,
                        id: entity.id(),
                    });
                }
                map.insert(entity.id(), entity.clone());
                Ok(())
            }

            async fn update_with(
                &mut self,
                id: EntityId,
                apply: Box<dyn for<'a> FnOnce(&'a $entity) -> CoreResult<$entity> + Send>,
            ) -> CoreResult<$entity> {
                // Lock held across check and write: the guarded step is atomic
                let mut map = self.$field.write().unwrap();
                let current = map.get(&id).ok_or(CoreError::NotFound {
                    kind: <$entity as CoreEntity>::KIND,
                    id,
                })?;
                let next = apply(current)?;
                map.insert(id, next.clone());
                Ok(next)
            }

            async fn update_with_all(
                &mut self,
                id: EntityId,
                apply: Box<dyn for<'a> FnOnce(&'a $entity, &'a [$entity]) -> CoreResult<$entity> + Send>,
            ) -> CoreResult<$entity> {
                // Same lock across the family snapshot and the write
                let mut map = self.$field.write().unwrap();
                let all: Vec<$entity> = map.values().cloned().collect();
                let current = map.get(&id).ok_or(CoreError::NotFound {
                    kind: <$entity as CoreEntity>::KIND,
                    id,
                })?;
                let next = apply(current, &all)?;
                map.insert(id, next.clone());
                Ok(next)
            }

            async fn remove(&mut self, id: EntityId) -> CoreResult<()> {
                if self.$field.write().unwrap().remove(&id).is_some() {
                    Ok(())
                } else {
                    Err(CoreError::NotFound {
                        kind: <$entity as CoreEntity>::KIND,
                        id,
                    })
                }
            }
        }
    };
}

impl_entity_store!(SoaItem, soa_items);
impl_entity_store!(SoaMatch, soa_matches);
impl_entity_store!(SoaDiscrepancy, discrepancies);
impl_entity_store!(DebitNote, debit_notes);
impl_entity_store!(Payment, payments);

/// Fixed set of ledger invoices, served by vendor and company. Stands in
/// for the accounting system during testing and development.
#[derive(Debug, Clone, Default)]
pub struct StaticInvoiceSource {
    invoices: Vec<Invoice>,
}

impl StaticInvoiceSource {
    pub fn new(invoices: Vec<Invoice>) -> Self {
        Self { invoices }
    }

    pub fn push(&mut self, invoice: Invoice) {
        self.invoices.push(invoice);
    }
}

#[async_trait]
impl InvoiceSource for StaticInvoiceSource {
    async fn invoices_for(
        &self,
        vendor_id: EntityId,
        company_id: EntityId,
    ) -> CoreResult<Vec<Invoice>> {
        Ok(self
            .invoices
            .iter()
            .filter(|inv| inv.vendor_id == vendor_id && inv.company_id == company_id)
            .cloned()
            .collect())
    }
}
