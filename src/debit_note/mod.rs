//! Debit note lifecycle: propose, approve, post

use bigdecimal::BigDecimal;
use chrono::NaiveDateTime;

use crate::repository::Repository;
use crate::traits::{EntityStore, LedgerPoster};
use crate::types::*;
use crate::utils::validation::validate_positive_amount;

/// Manager for vendor debit notes. Notes move draft -> approved -> posted,
/// each step a conditional write against the stored status. Posted notes are
/// immutable audit artifacts; a wrong one is replaced by a superseding note,
/// never edited or deleted.
pub struct DebitNoteManager<S: EntityStore<DebitNote>> {
    repo: Repository<DebitNote, S>,
}

impl<S: EntityStore<DebitNote>> DebitNoteManager<S> {
    pub fn new(store: S) -> Self {
        Self {
            repo: Repository::new(store),
        }
    }

    /// Draft a debit note against a vendor statement. The adjustment amount
    /// must be positive; the direction is carried by the document type.
    pub async fn propose(
        &mut self,
        vendor_id: EntityId,
        statement_id: EntityId,
        discrepancy_id: Option<EntityId>,
        amount: BigDecimal,
        reason_code: ReasonCode,
    ) -> CoreResult<DebitNote> {
        validate_positive_amount(&amount)?;

        let note = DebitNote::draft(
            vendor_id,
            statement_id,
            discrepancy_id,
            generate_document_number(),
            amount,
            reason_code,
        );
        self.repo.insert(&note).await?;
        tracing::info!(
            debit_note_id = %note.id,
            document_number = %note.document_number,
            "debit note proposed"
        );
        Ok(note)
    }

    pub async fn get_debit_note(&self, id: EntityId) -> CoreResult<Option<DebitNote>> {
        self.repo.find_by_id_including_deleted(id).await
    }

    /// All notes raised against one statement, oldest first
    pub async fn notes_for_statement(&self, statement_id: EntityId) -> CoreResult<Vec<DebitNote>> {
        let mut notes: Vec<DebitNote> = self
            .repo
            .find_all_including_deleted()
            .await?
            .into_iter()
            .filter(|note| note.statement_id == statement_id)
            .collect();
        notes.sort_by_key(|note| note.created_at);
        Ok(notes)
    }

    /// Approve a draft note, stamping the approval time
    pub async fn approve(&mut self, id: EntityId) -> CoreResult<DebitNote> {
        let note = self
            .repo
            .update_guarded(
                id,
                Box::new(|current: &DebitNote| {
                    if current.status != DebitNoteStatus::Draft {
                        return Err(CoreError::InvalidTransition(format!(
                            "approval requires status {}, debit note is {}",
                            DebitNoteStatus::Draft,
                            current.status
                        )));
                    }
                    let now = chrono::Utc::now().naive_utc();
                    let mut next = current.clone();
                    next.status = DebitNoteStatus::Approved;
                    next.approved_at = Some(now);
                    next.updated_at = now;
                    Ok(next)
                }),
            )
            .await?;
        tracing::info!(debit_note_id = %note.id, "debit note approved");
        Ok(note)
    }

    /// Post an approved note, recording when the adjustment landed in the
    /// ledger. `ledger_posted_at` comes from the posting collaborator so the
    /// note carries the ledger's own timestamp, not ours.
    pub async fn post(
        &mut self,
        id: EntityId,
        ledger_posted_at: NaiveDateTime,
    ) -> CoreResult<DebitNote> {
        let note = self
            .repo
            .update_guarded(
                id,
                Box::new(move |current: &DebitNote| {
                    if current.status != DebitNoteStatus::Approved {
                        return Err(CoreError::InvalidTransition(format!(
                            "posting requires status {}, debit note is {}",
                            DebitNoteStatus::Approved,
                            current.status
                        )));
                    }
                    let now = chrono::Utc::now().naive_utc();
                    let mut next = current.clone();
                    next.status = DebitNoteStatus::Posted;
                    next.posted_at = Some(now);
                    next.ledger_posted_at = Some(ledger_posted_at);
                    next.updated_at = now;
                    Ok(next)
                }),
            )
            .await?;
        tracing::info!(
            debit_note_id = %note.id,
            document_number = %note.document_number,
            "debit note posted"
        );
        Ok(note)
    }

    /// Post an approved note through the ledger collaborator. The ledger is
    /// written first; the note only becomes posted once the ledger accepted
    /// the adjustment. A note left approved after a ledger failure can be
    /// retried.
    pub async fn post_with_ledger(
        &mut self,
        id: EntityId,
        ledger: &dyn LedgerPoster,
    ) -> CoreResult<DebitNote> {
        let note = self.repo.get_required(id).await?;
        if note.status != DebitNoteStatus::Approved {
            return Err(CoreError::InvalidTransition(format!(
                "posting requires status {}, debit note is {}",
                DebitNoteStatus::Approved,
                note.status
            )));
        }
        let ledger_posted_at = ledger.post_adjustment(&note).await?;
        self.post(id, ledger_posted_at).await
    }

    /// Replace a posted note with a corrected draft. The original stays
    /// posted; the new note records what it supersedes and starts its own
    /// approval cycle.
    pub async fn supersede(
        &mut self,
        id: EntityId,
        amount: BigDecimal,
        reason_code: ReasonCode,
    ) -> CoreResult<DebitNote> {
        validate_positive_amount(&amount)?;

        let original = self.repo.get_required(id).await?;
        if original.status != DebitNoteStatus::Posted {
            return Err(CoreError::InvalidTransition(format!(
                "only a {} debit note can be superseded, debit note is {}",
                DebitNoteStatus::Posted,
                original.status
            )));
        }

        let mut replacement = DebitNote::draft(
            original.vendor_id,
            original.statement_id,
            original.discrepancy_id,
            generate_document_number(),
            amount,
            reason_code,
        );
        replacement.supersedes_id = Some(original.id);
        self.repo.insert(&replacement).await?;
        tracing::info!(
            debit_note_id = %replacement.id,
            supersedes = %original.id,
            "superseding debit note drafted"
        );
        Ok(replacement)
    }
}

/// Document numbers are unique and human-referenceable, e.g.
/// `DN-20240312-9f8a2c41`
fn generate_document_number() -> String {
    format!(
        "DN-{}-{}",
        chrono::Utc::now().format("%Y%m%d"),
        &uuid::Uuid::new_v4().simple().to_string()[..8]
    )
}
