//! Core types and data structures for the vendor financial workflow system

use bigdecimal::BigDecimal;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::traits::{CoreEntity, SoftDeletable};

/// Opaque identifier for a persisted entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityId(Uuid);

impl EntityId {
    /// Generate a fresh identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Opaque, exactly-comparable actor identity supplied by the caller's auth
/// context. Dual-control checks compare these for equality and nothing else.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActorId(String);

impl ActorId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ActorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Entity families persisted through the repository base, used for
/// logging and error context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    SoaItem,
    SoaMatch,
    SoaDiscrepancy,
    DebitNote,
    Payment,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::SoaItem => "soa_item",
            EntityKind::SoaMatch => "soa_match",
            EntityKind::SoaDiscrepancy => "soa_discrepancy",
            EntityKind::DebitNote => "debit_note",
            EntityKind::Payment => "payment",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a vendor-submitted statement line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SoaItemStatus {
    /// Freshly ingested from the submitted statement
    Extracted,
    /// Confirmed against a ledger invoice
    Matched,
    /// No acceptable ledger candidate found
    Unmatched,
    /// Ambiguous (e.g. duplicate candidates), pending review
    Disputed,
}

/// One statement line as submitted by a vendor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoaItem {
    pub id: EntityId,
    /// Owning case/statement
    pub case_id: EntityId,
    pub vendor_id: EntityId,
    pub company_id: EntityId,
    /// As extracted; not necessarily unique
    pub invoice_number: String,
    pub amount: BigDecimal,
    pub currency: String,
    pub invoice_date: NaiveDate,
    pub status: SoaItemStatus,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub deleted_at: Option<NaiveDateTime>,
    pub deleted_by: Option<ActorId>,
}

impl SoaItem {
    pub fn new(
        case_id: EntityId,
        vendor_id: EntityId,
        company_id: EntityId,
        invoice_number: String,
        amount: BigDecimal,
        currency: String,
        invoice_date: NaiveDate,
    ) -> Self {
        let now = chrono::Utc::now().naive_utc();
        Self {
            id: EntityId::new(),
            case_id,
            vendor_id,
            company_id,
            invoice_number,
            amount,
            currency,
            invoice_date,
            status: SoaItemStatus::Extracted,
            created_at: now,
            updated_at: now,
            deleted_at: None,
            deleted_by: None,
        }
    }
}

/// External ledger record, read-only from this core's perspective.
/// The reconciliation engine never mutates invoices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: EntityId,
    pub vendor_id: EntityId,
    pub company_id: EntityId,
    pub invoice_number: String,
    pub amount: BigDecimal,
    pub currency: String,
    pub invoice_date: NaiveDate,
}

/// How a match was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    /// Exact field equality, no human confirmation needed
    Deterministic,
    /// Heuristic match, requires reviewer confirmation
    Fuzzy,
}

/// Review status of a match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Proposed,
    Confirmed,
    Rejected,
}

/// Links exactly one statement item to exactly one ledger invoice.
/// An item has at most one confirmed match at any time; additional
/// proposed matches may coexist pending review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoaMatch {
    pub id: EntityId,
    pub item_id: EntityId,
    pub invoice_id: EntityId,
    pub match_type: MatchType,
    pub is_exact_match: bool,
    /// Confidence in [0.0, 1.0]; 1.0 for deterministic matches
    pub match_confidence: f64,
    pub status: MatchStatus,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub deleted_at: Option<NaiveDateTime>,
    pub deleted_by: Option<ActorId>,
}

impl SoaMatch {
    pub fn deterministic(item_id: EntityId, invoice_id: EntityId) -> Self {
        Self::new(
            item_id,
            invoice_id,
            MatchType::Deterministic,
            true,
            1.0,
            MatchStatus::Confirmed,
        )
    }

    pub fn fuzzy(item_id: EntityId, invoice_id: EntityId, confidence: f64) -> Self {
        Self::new(
            item_id,
            invoice_id,
            MatchType::Fuzzy,
            false,
            confidence,
            MatchStatus::Proposed,
        )
    }

    fn new(
        item_id: EntityId,
        invoice_id: EntityId,
        match_type: MatchType,
        is_exact_match: bool,
        match_confidence: f64,
        status: MatchStatus,
    ) -> Self {
        let now = chrono::Utc::now().naive_utc();
        Self {
            id: EntityId::new(),
            item_id,
            invoice_id,
            match_type,
            is_exact_match,
            match_confidence,
            status,
            created_at: now,
            updated_at: now,
            deleted_at: None,
            deleted_by: None,
        }
    }
}

/// Classification of a reconciliation variance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscrepancyType {
    /// Candidate invoice exists but the amount differs beyond tolerance
    AmountMismatch,
    /// No ledger candidate at all
    MissingInvoice,
    /// More than one exact ledger candidate
    Duplicate,
    /// Dates disagree beyond the configured window
    DateMismatch,
}

/// Severity assigned from the magnitude of the variance
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscrepancyStatus {
    Open,
    Resolved,
}

/// An unresolved variance tied to a case and, optionally, a specific item.
/// `resolution_action` and `resolved_at` are set together, only when the
/// status transitions to resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoaDiscrepancy {
    pub id: EntityId,
    pub case_id: EntityId,
    pub item_id: Option<EntityId>,
    pub discrepancy_type: DiscrepancyType,
    pub severity: Severity,
    pub description: String,
    /// Signed: statement amount minus ledger amount
    pub difference_amount: BigDecimal,
    pub status: DiscrepancyStatus,
    pub resolution_action: Option<String>,
    pub resolved_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub deleted_at: Option<NaiveDateTime>,
    pub deleted_by: Option<ActorId>,
}

impl SoaDiscrepancy {
    pub fn open(
        case_id: EntityId,
        item_id: Option<EntityId>,
        discrepancy_type: DiscrepancyType,
        severity: Severity,
        description: String,
        difference_amount: BigDecimal,
    ) -> Self {
        let now = chrono::Utc::now().naive_utc();
        Self {
            id: EntityId::new(),
            case_id,
            item_id,
            discrepancy_type,
            severity,
            description,
            difference_amount,
            status: DiscrepancyStatus::Open,
            resolution_action: None,
            resolved_at: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
            deleted_by: None,
        }
    }
}

/// Enumerated business reason for raising a debit note
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    Overpayment,
    PriceVariance,
    QuantityVariance,
    /// Withholding tax
    Wht,
    DuplicateBilling,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::Overpayment => "OVERPAYMENT",
            ReasonCode::PriceVariance => "PRICE_VARIANCE",
            ReasonCode::QuantityVariance => "QUANTITY_VARIANCE",
            ReasonCode::Wht => "WHT",
            ReasonCode::DuplicateBilling => "DUPLICATE_BILLING",
        }
    }
}

/// Debit note lifecycle states. POSTED is terminal and reachable only via
/// APPROVED; approved/posted documents are immutable audit artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DebitNoteStatus {
    Draft,
    Approved,
    Posted,
}

impl std::fmt::Display for DebitNoteStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DebitNoteStatus::Draft => "DRAFT",
            DebitNoteStatus::Approved => "APPROVED",
            DebitNoteStatus::Posted => "POSTED",
        };
        f.write_str(s)
    }
}

/// A financial adjustment document raised against a discrepancy.
/// Never destroyed; only transitioned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebitNote {
    pub id: EntityId,
    pub vendor_id: EntityId,
    pub statement_id: EntityId,
    /// A note may be raised independent of a formally tracked discrepancy
    pub discrepancy_id: Option<EntityId>,
    /// The rejected note this one replaces, if any
    pub supersedes_id: Option<EntityId>,
    pub document_number: String,
    pub amount: BigDecimal,
    pub reason_code: ReasonCode,
    pub status: DebitNoteStatus,
    pub approved_at: Option<NaiveDateTime>,
    pub posted_at: Option<NaiveDateTime>,
    pub ledger_posted_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl DebitNote {
    pub fn draft(
        vendor_id: EntityId,
        statement_id: EntityId,
        discrepancy_id: Option<EntityId>,
        document_number: String,
        amount: BigDecimal,
        reason_code: ReasonCode,
    ) -> Self {
        let now = chrono::Utc::now().naive_utc();
        Self {
            id: EntityId::new(),
            vendor_id,
            statement_id,
            discrepancy_id,
            supersedes_id: None,
            document_number,
            amount,
            reason_code,
            status: DebitNoteStatus::Draft,
            approved_at: None,
            posted_at: None,
            ledger_posted_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

// Repository base wiring. The SoftDeletable impls below are the soft-delete
// registry: an entity without one cannot be soft-deleted, and that is a
// compile error rather than a runtime failure. DebitNote is deliberately
// absent; posted adjustments are never deleted.

impl CoreEntity for SoaItem {
    const KIND: EntityKind = EntityKind::SoaItem;

    fn id(&self) -> EntityId {
        self.id
    }
}

impl SoftDeletable for SoaItem {
    fn deleted_at(&self) -> Option<NaiveDateTime> {
        self.deleted_at
    }

    fn set_deleted(&mut self, at: Option<NaiveDateTime>, by: Option<ActorId>) {
        self.deleted_at = at;
        self.deleted_by = by;
        self.updated_at = chrono::Utc::now().naive_utc();
    }
}

impl CoreEntity for SoaMatch {
    const KIND: EntityKind = EntityKind::SoaMatch;

    fn id(&self) -> EntityId {
        self.id
    }
}

impl SoftDeletable for SoaMatch {
    fn deleted_at(&self) -> Option<NaiveDateTime> {
        self.deleted_at
    }

    fn set_deleted(&mut self, at: Option<NaiveDateTime>, by: Option<ActorId>) {
        self.deleted_at = at;
        self.deleted_by = by;
        self.updated_at = chrono::Utc::now().naive_utc();
    }
}

impl CoreEntity for SoaDiscrepancy {
    const KIND: EntityKind = EntityKind::SoaDiscrepancy;

    fn id(&self) -> EntityId {
        self.id
    }
}

impl SoftDeletable for SoaDiscrepancy {
    fn deleted_at(&self) -> Option<NaiveDateTime> {
        self.deleted_at
    }

    fn set_deleted(&mut self, at: Option<NaiveDateTime>, by: Option<ActorId>) {
        self.deleted_at = at;
        self.deleted_by = by;
        self.updated_at = chrono::Utc::now().naive_utc();
    }
}

impl CoreEntity for DebitNote {
    const KIND: EntityKind = EntityKind::DebitNote;

    fn id(&self) -> EntityId {
        self.id
    }
}

/// Errors surfaced by the workflow core
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
    #[error("{kind} {id} not found")]
    NotFound { kind: EntityKind, id: EntityId },
    #[error("{kind} {id} is already deleted or does not exist")]
    AlreadyDeletedOrNotFound { kind: EntityKind, id: EntityId },
    #[error("{kind} {id} is not deleted or does not exist")]
    NotDeletedOrNotFound { kind: EntityKind, id: EntityId },
    #[error("Dual control unsatisfied: {0}")]
    DualControlUnsatisfied(String),
}

/// Result type for workflow core operations
pub type CoreResult<T> = Result<T, CoreError>;
