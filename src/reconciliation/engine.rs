//! Statement-of-account reconciliation engine
//!
//! Matches vendor-submitted statement items against ledger invoices and
//! raises a typed discrepancy for everything that fails to match. Ledger
//! invoices are never mutated.

use bigdecimal::{BigDecimal, ToPrimitive};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::reconciliation::policy::ReconciliationPolicy;
use crate::repository::Repository;
use crate::traits::{EntityStore, InvoiceSource, SoftDeletable};
use crate::types::*;
use crate::utils::validation::{validate_currency, validate_non_empty};

/// One raw line from a submitted statement, before it becomes a persisted
/// item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatementLine {
    pub invoice_number: String,
    pub amount: BigDecimal,
    pub currency: String,
    pub invoice_date: NaiveDate,
}

/// What the matching pass decided for one item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReconcileOutcome {
    /// Deterministic hit, confirmed without review
    Matched(SoaMatch),
    /// Fuzzy hit proposed for human confirmation
    Proposed(SoaMatch),
    /// No acceptable match; a discrepancy was raised
    Discrepancy(SoaDiscrepancy),
}

/// Reconciliation engine over statement items, matches, and discrepancies
pub struct ReconciliationEngine<S>
where
    S: EntityStore<SoaItem> + EntityStore<SoaMatch> + EntityStore<SoaDiscrepancy>,
{
    items: Repository<SoaItem, S>,
    matches: Repository<SoaMatch, S>,
    discrepancies: Repository<SoaDiscrepancy, S>,
    policy: ReconciliationPolicy,
}

impl<S> ReconciliationEngine<S>
where
    S: EntityStore<SoaItem> + EntityStore<SoaMatch> + EntityStore<SoaDiscrepancy> + Clone,
{
    /// Create an engine with the stock policy
    pub fn new(store: S) -> Self {
        Self::with_policy(store, ReconciliationPolicy::default())
    }

    /// Create an engine with tenant-specific thresholds
    pub fn with_policy(store: S, policy: ReconciliationPolicy) -> Self {
        Self {
            items: Repository::new(store.clone()),
            matches: Repository::new(store.clone()),
            discrepancies: Repository::new(store),
            policy,
        }
    }

    /// Persist the lines of a submitted statement as extracted items
    pub async fn ingest_statement(
        &mut self,
        case_id: EntityId,
        vendor_id: EntityId,
        company_id: EntityId,
        lines: Vec<StatementLine>,
    ) -> CoreResult<Vec<SoaItem>> {
        let mut items = Vec::with_capacity(lines.len());
        for line in lines {
            validate_non_empty("invoice number", &line.invoice_number)?;
            validate_currency(&line.currency)?;

            let item = SoaItem::new(
                case_id,
                vendor_id,
                company_id,
                line.invoice_number,
                line.amount,
                line.currency,
                line.invoice_date,
            );
            self.items.insert(&item).await?;
            items.push(item);
        }
        tracing::info!(%case_id, count = items.len(), "statement ingested");
        Ok(items)
    }

    pub async fn get_item(&self, id: EntityId) -> CoreResult<Option<SoaItem>> {
        self.items.find_by_id(id).await
    }

    pub async fn get_match(&self, id: EntityId) -> CoreResult<Option<SoaMatch>> {
        self.matches.find_by_id(id).await
    }

    pub async fn get_discrepancy(&self, id: EntityId) -> CoreResult<Option<SoaDiscrepancy>> {
        self.discrepancies.find_by_id(id).await
    }

    /// Open discrepancies for a case, newest first
    pub async fn open_discrepancies(&self, case_id: EntityId) -> CoreResult<Vec<SoaDiscrepancy>> {
        Ok(self
            .discrepancies
            .find_all_active(|d| d.created_at, false)
            .await?
            .into_iter()
            .filter(|d| d.case_id == case_id && d.status == DiscrepancyStatus::Open)
            .collect())
    }

    /// Run the matching pass for every extracted item of a case
    pub async fn reconcile_statement(
        &mut self,
        case_id: EntityId,
        ledger: &dyn InvoiceSource,
    ) -> CoreResult<Vec<ReconcileOutcome>> {
        let pending: Vec<SoaItem> = self
            .items
            .find_all_active(|i| i.created_at, true)
            .await?
            .into_iter()
            .filter(|i| i.case_id == case_id && i.status == SoaItemStatus::Extracted)
            .collect();

        let mut outcomes = Vec::with_capacity(pending.len());
        for item in pending {
            outcomes.push(self.reconcile_item(item.id, ledger).await?);
        }
        Ok(outcomes)
    }

    /// Match one statement item against the ledger. Deterministic first,
    /// then fuzzy, otherwise a discrepancy.
    pub async fn reconcile_item(
        &mut self,
        item_id: EntityId,
        ledger: &dyn InvoiceSource,
    ) -> CoreResult<ReconcileOutcome> {
        let item = self.items.find_required(item_id).await?;
        if item.status == SoaItemStatus::Matched {
            return Err(CoreError::Validation(format!(
                "soa_item {item_id} is already matched"
            )));
        }

        let candidates: Vec<Invoice> = ledger
            .invoices_for(item.vendor_id, item.company_id)
            .await?
            .into_iter()
            .filter(|inv| inv.currency == item.currency)
            .collect();

        let exact: Vec<&Invoice> = candidates
            .iter()
            .filter(|inv| {
                inv.invoice_number == item.invoice_number
                    && self.policy.amounts_match(&inv.amount, &item.amount)
            })
            .collect();

        match exact.len() {
            1 => self.confirm_deterministic(item, exact[0]).await,
            0 => self.try_fuzzy(item, &candidates).await,
            n => self.raise_duplicate(item, n).await,
        }
    }

    /// Move an item's lifecycle status inside a guarded write
    async fn set_item_status(
        &mut self,
        item_id: EntityId,
        status: SoaItemStatus,
    ) -> CoreResult<SoaItem> {
        self.items
            .update_guarded(
                item_id,
                Box::new(move |current: &SoaItem| {
                    let mut next = current.clone();
                    next.status = status;
                    next.updated_at = chrono::Utc::now().naive_utc();
                    Ok(next)
                }),
            )
            .await
    }

    async fn confirm_deterministic(
        &mut self,
        item: SoaItem,
        invoice: &Invoice,
    ) -> CoreResult<ReconcileOutcome> {
        let soa_match = SoaMatch::deterministic(item.id, invoice.id);
        self.matches.insert(&soa_match).await?;
        self.set_item_status(item.id, SoaItemStatus::Matched).await?;

        tracing::debug!(item_id = %item.id, invoice_id = %invoice.id, "deterministic match");
        Ok(ReconcileOutcome::Matched(soa_match))
    }

    async fn raise_duplicate(
        &mut self,
        item: SoaItem,
        candidate_count: usize,
    ) -> CoreResult<ReconcileOutcome> {
        let discrepancy = SoaDiscrepancy::open(
            item.case_id,
            Some(item.id),
            DiscrepancyType::Duplicate,
            Severity::High,
            format!(
                "{candidate_count} ledger invoices match {} exactly",
                item.invoice_number
            ),
            BigDecimal::from(0),
        );
        self.discrepancies.insert(&discrepancy).await?;
        self.set_item_status(item.id, SoaItemStatus::Disputed).await?;

        Ok(ReconcileOutcome::Discrepancy(discrepancy))
    }

    async fn try_fuzzy(
        &mut self,
        item: SoaItem,
        candidates: &[Invoice],
    ) -> CoreResult<ReconcileOutcome> {
        // Only candidates inside the amount band and date window qualify
        // for a proposal; anything beyond those is a discrepancy, however
        // similar the invoice number.
        let best = candidates
            .iter()
            .filter(|inv| {
                self.policy.within_fuzzy_band(&item.amount, &inv.amount)
                    && (item.invoice_date - inv.invoice_date).num_days().abs()
                        <= self.policy.date_window_days
            })
            .map(|inv| (inv, self.fuzzy_confidence(&item, inv)))
            .max_by(|a, b| a.1.total_cmp(&b.1));

        if let Some((invoice, confidence)) = best {
            if confidence >= self.policy.min_fuzzy_confidence {
                let soa_match = SoaMatch::fuzzy(item.id, invoice.id, confidence);
                self.matches.insert(&soa_match).await?;
                tracing::debug!(
                    item_id = %item.id,
                    invoice_id = %invoice.id,
                    confidence,
                    "fuzzy match proposed"
                );
                // The item stays extracted until a reviewer confirms
                return Ok(ReconcileOutcome::Proposed(soa_match));
            }
        }

        self.raise_unmatched(item, candidates).await
    }

    /// Classify why no match was possible and raise the discrepancy
    async fn raise_unmatched(
        &mut self,
        item: SoaItem,
        candidates: &[Invoice],
    ) -> CoreResult<ReconcileOutcome> {
        let same_number: Vec<&Invoice> = candidates
            .iter()
            .filter(|inv| inv.invoice_number == item.invoice_number)
            .collect();

        let discrepancy = if let Some(closest) = same_number.iter().min_by_key(|inv| {
            (&inv.amount - &item.amount).abs()
        }) {
            let difference = &item.amount - &closest.amount;
            if !self.policy.within_fuzzy_band(&item.amount, &closest.amount) {
                SoaDiscrepancy::open(
                    item.case_id,
                    Some(item.id),
                    DiscrepancyType::AmountMismatch,
                    self.policy.severity_for(&difference, &item.amount),
                    format!(
                        "statement amount {} differs from invoice {} amount {}",
                        item.amount, closest.invoice_number, closest.amount
                    ),
                    difference,
                )
            } else {
                let days = (item.invoice_date - closest.invoice_date).num_days().abs();
                SoaDiscrepancy::open(
                    item.case_id,
                    Some(item.id),
                    DiscrepancyType::DateMismatch,
                    self.policy.severity_for(&difference, &item.amount),
                    format!(
                        "statement date {} is {days} days from invoice {} date {}",
                        item.invoice_date, closest.invoice_number, closest.invoice_date
                    ),
                    difference,
                )
            }
        } else {
            SoaDiscrepancy::open(
                item.case_id,
                Some(item.id),
                DiscrepancyType::MissingInvoice,
                Severity::High,
                format!("no ledger invoice for {}", item.invoice_number),
                item.amount.clone(),
            )
        };
        self.discrepancies.insert(&discrepancy).await?;
        self.set_item_status(item.id, SoaItemStatus::Unmatched).await?;

        tracing::debug!(
            item_id = %item.id,
            discrepancy_type = ?discrepancy.discrepancy_type,
            "discrepancy raised"
        );
        Ok(ReconcileOutcome::Discrepancy(discrepancy))
    }

    /// Confidence in [0, 1] from invoice-number similarity, amount
    /// closeness, and date proximity
    fn fuzzy_confidence(&self, item: &SoaItem, invoice: &Invoice) -> f64 {
        let name_score = strsim::jaro_winkler(&item.invoice_number, &invoice.invoice_number);

        let base = item.amount.abs();
        let amount_score = if base == BigDecimal::from(0) {
            0.0
        } else {
            let ratio = ((&item.amount - &invoice.amount).abs() / base)
                .to_f64()
                .unwrap_or(1.0);
            (1.0 - ratio).clamp(0.0, 1.0)
        };

        let days = (item.invoice_date - invoice.invoice_date).num_days().abs() as f64;
        let date_score = (1.0 - days / self.policy.date_window_days as f64).clamp(0.0, 1.0);

        0.5 * name_score + 0.3 * amount_score + 0.2 * date_score
    }

    /// Reviewer confirms a proposed match; the item becomes matched. An
    /// item has at most one confirmed match at any time, and that check
    /// runs inside the same atomic step as the write so two reviewers
    /// cannot confirm competing proposals for one item.
    pub async fn confirm_match(&mut self, match_id: EntityId) -> CoreResult<SoaMatch> {
        let confirmed = self
            .matches
            .update_guarded_with_all(
                match_id,
                Box::new(|current: &SoaMatch, all: &[SoaMatch]| {
                    if current.status != MatchStatus::Proposed {
                        return Err(CoreError::InvalidTransition(format!(
                            "only a proposed match can be confirmed, match is {:?}",
                            current.status
                        )));
                    }
                    let other_confirmed = all.iter().any(|m| {
                        m.id != current.id
                            && m.item_id == current.item_id
                            && m.status == MatchStatus::Confirmed
                            && !m.is_deleted()
                    });
                    if other_confirmed {
                        return Err(CoreError::Validation(format!(
                            "soa_item {} already has a confirmed match",
                            current.item_id
                        )));
                    }
                    let mut next = current.clone();
                    next.status = MatchStatus::Confirmed;
                    next.updated_at = chrono::Utc::now().naive_utc();
                    Ok(next)
                }),
            )
            .await?;

        self.set_item_status(confirmed.item_id, SoaItemStatus::Matched)
            .await?;
        Ok(confirmed)
    }

    /// Reviewer rejects a proposed match; the item is left for re-matching
    /// or manual handling
    pub async fn reject_match(&mut self, match_id: EntityId) -> CoreResult<SoaMatch> {
        self.matches
            .update_guarded(
                match_id,
                Box::new(|current: &SoaMatch| {
                    if current.status != MatchStatus::Proposed {
                        return Err(CoreError::InvalidTransition(format!(
                            "only a proposed match can be rejected, match is {:?}",
                            current.status
                        )));
                    }
                    let mut next = current.clone();
                    next.status = MatchStatus::Rejected;
                    next.updated_at = chrono::Utc::now().naive_utc();
                    Ok(next)
                }),
            )
            .await
    }

    /// Resolve an open discrepancy, stamping the action and timestamp
    /// together. Resolution does not touch the originating item or match;
    /// whatever corrective action triggered it updates those independently.
    pub async fn resolve_discrepancy(
        &mut self,
        id: EntityId,
        resolution_action: String,
    ) -> CoreResult<SoaDiscrepancy> {
        validate_non_empty("resolution action", &resolution_action)?;
        self.discrepancies
            .update_guarded(
                id,
                Box::new(move |current: &SoaDiscrepancy| {
                    if current.status != DiscrepancyStatus::Open {
                        return Err(CoreError::InvalidTransition(format!(
                            "discrepancy {id} is already resolved"
                        )));
                    }
                    let mut next = current.clone();
                    next.status = DiscrepancyStatus::Resolved;
                    next.resolution_action = Some(resolution_action);
                    next.resolved_at = Some(chrono::Utc::now().naive_utc());
                    next.updated_at = chrono::Utc::now().naive_utc();
                    Ok(next)
                }),
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::memory_store::{MemoryStore, StaticInvoiceSource};
    use std::str::FromStr;

    fn engine() -> ReconciliationEngine<MemoryStore> {
        ReconciliationEngine::new(MemoryStore::new())
    }

    fn invoice(
        vendor_id: EntityId,
        company_id: EntityId,
        number: &str,
        amount: &str,
        date: (i32, u32, u32),
    ) -> Invoice {
        Invoice {
            id: EntityId::new(),
            vendor_id,
            company_id,
            invoice_number: number.to_string(),
            amount: BigDecimal::from_str(amount).unwrap(),
            currency: "USD".to_string(),
            invoice_date: NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
        }
    }

    fn line(number: &str, amount: &str, date: (i32, u32, u32)) -> StatementLine {
        StatementLine {
            invoice_number: number.to_string(),
            amount: BigDecimal::from_str(amount).unwrap(),
            currency: "USD".to_string(),
            invoice_date: NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
        }
    }

    #[tokio::test]
    async fn exact_fields_produce_confirmed_deterministic_match() {
        let mut engine = engine();
        let (case, vendor, company) = (EntityId::new(), EntityId::new(), EntityId::new());
        let ledger = StaticInvoiceSource::new(vec![invoice(
            vendor,
            company,
            "INV-003",
            "3000.00",
            (2024, 3, 10),
        )]);

        let items = engine
            .ingest_statement(case, vendor, company, vec![line("INV-003", "3000.00", (2024, 3, 10))])
            .await
            .unwrap();

        let outcome = engine.reconcile_item(items[0].id, &ledger).await.unwrap();
        match outcome {
            ReconcileOutcome::Matched(m) => {
                assert_eq!(m.match_type, MatchType::Deterministic);
                assert!(m.is_exact_match);
                assert_eq!(m.match_confidence, 1.0);
                assert_eq!(m.status, MatchStatus::Confirmed);
            }
            other => panic!("expected deterministic match, got {other:?}"),
        }

        let item = engine.get_item(items[0].id).await.unwrap().unwrap();
        assert_eq!(item.status, SoaItemStatus::Matched);
    }

    #[tokio::test]
    async fn missing_invoice_raises_open_discrepancy_without_match() {
        let mut engine = engine();
        let (case, vendor, company) = (EntityId::new(), EntityId::new(), EntityId::new());
        let ledger = StaticInvoiceSource::new(vec![]);

        let items = engine
            .ingest_statement(case, vendor, company, vec![line("INV-404", "500.00", (2024, 3, 10))])
            .await
            .unwrap();

        let outcome = engine.reconcile_item(items[0].id, &ledger).await.unwrap();
        match outcome {
            ReconcileOutcome::Discrepancy(d) => {
                assert_eq!(d.discrepancy_type, DiscrepancyType::MissingInvoice);
                assert_eq!(d.status, DiscrepancyStatus::Open);
                assert_eq!(d.severity, Severity::High);
                assert_eq!(d.item_id, Some(items[0].id));
            }
            other => panic!("expected discrepancy, got {other:?}"),
        }

        let item = engine.get_item(items[0].id).await.unwrap().unwrap();
        assert_eq!(item.status, SoaItemStatus::Unmatched);
        assert_eq!(engine.open_discrepancies(case).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_exact_candidates_dispute_the_item() {
        let mut engine = engine();
        let (case, vendor, company) = (EntityId::new(), EntityId::new(), EntityId::new());
        let ledger = StaticInvoiceSource::new(vec![
            invoice(vendor, company, "INV-007", "100.00", (2024, 1, 5)),
            invoice(vendor, company, "INV-007", "100.00", (2024, 1, 6)),
        ]);

        let items = engine
            .ingest_statement(case, vendor, company, vec![line("INV-007", "100.00", (2024, 1, 5))])
            .await
            .unwrap();

        let outcome = engine.reconcile_item(items[0].id, &ledger).await.unwrap();
        match outcome {
            ReconcileOutcome::Discrepancy(d) => {
                assert_eq!(d.discrepancy_type, DiscrepancyType::Duplicate);
                assert_eq!(d.severity, Severity::High);
            }
            other => panic!("expected duplicate discrepancy, got {other:?}"),
        }

        let item = engine.get_item(items[0].id).await.unwrap().unwrap();
        assert_eq!(item.status, SoaItemStatus::Disputed);
    }

    #[tokio::test]
    async fn amount_beyond_tolerance_raises_amount_mismatch() {
        let mut engine = engine();
        let (case, vendor, company) = (EntityId::new(), EntityId::new(), EntityId::new());
        // 25% over the invoiced amount, far outside the fuzzy band
        let ledger = StaticInvoiceSource::new(vec![invoice(
            vendor,
            company,
            "INV-010",
            "1000.00",
            (2024, 2, 1),
        )]);

        let items = engine
            .ingest_statement(case, vendor, company, vec![line("INV-010", "1250.00", (2024, 2, 1))])
            .await
            .unwrap();

        let outcome = engine.reconcile_item(items[0].id, &ledger).await.unwrap();
        match outcome {
            ReconcileOutcome::Discrepancy(d) => {
                assert_eq!(d.discrepancy_type, DiscrepancyType::AmountMismatch);
                assert_eq!(d.difference_amount, BigDecimal::from_str("250.00").unwrap());
                assert_eq!(d.severity, Severity::High);
            }
            other => panic!("expected amount mismatch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn stale_date_with_close_amount_raises_date_mismatch() {
        let mut engine = engine();
        let (case, vendor, company) = (EntityId::new(), EntityId::new(), EntityId::new());
        // 2% amount variance, but the dates are two months apart
        let ledger = StaticInvoiceSource::new(vec![invoice(
            vendor,
            company,
            "INV-011",
            "1000.00",
            (2024, 1, 5),
        )]);

        let items = engine
            .ingest_statement(case, vendor, company, vec![line("INV-011", "1020.00", (2024, 3, 5))])
            .await
            .unwrap();

        let outcome = engine.reconcile_item(items[0].id, &ledger).await.unwrap();
        match outcome {
            ReconcileOutcome::Discrepancy(d) => {
                assert_eq!(d.discrepancy_type, DiscrepancyType::DateMismatch);
                assert_eq!(d.difference_amount, BigDecimal::from_str("20.00").unwrap());
            }
            other => panic!("expected date mismatch, got {other:?}"),
        }

        let item = engine.get_item(items[0].id).await.unwrap().unwrap();
        assert_eq!(item.status, SoaItemStatus::Unmatched);
    }

    #[tokio::test]
    async fn near_miss_is_proposed_for_review_and_confirmable() {
        let mut engine = engine();
        let (case, vendor, company) = (EntityId::new(), EntityId::new(), EntityId::new());
        // Same amount and date, one transposed character in the number
        let ledger = StaticInvoiceSource::new(vec![invoice(
            vendor,
            company,
            "INV-2024-0153",
            "780.00",
            (2024, 4, 2),
        )]);

        let items = engine
            .ingest_statement(
                case,
                vendor,
                company,
                vec![line("INV-2024-0135", "780.00", (2024, 4, 2))],
            )
            .await
            .unwrap();

        let outcome = engine.reconcile_item(items[0].id, &ledger).await.unwrap();
        let proposed = match outcome {
            ReconcileOutcome::Proposed(m) => {
                assert_eq!(m.match_type, MatchType::Fuzzy);
                assert!(!m.is_exact_match);
                assert!(m.match_confidence >= 0.75);
                assert!(m.match_confidence < 1.0);
                assert_eq!(m.status, MatchStatus::Proposed);
                m
            }
            other => panic!("expected proposed match, got {other:?}"),
        };

        // Item is not resolved until a reviewer confirms
        let item = engine.get_item(items[0].id).await.unwrap().unwrap();
        assert_eq!(item.status, SoaItemStatus::Extracted);

        let confirmed = engine.confirm_match(proposed.id).await.unwrap();
        assert_eq!(confirmed.status, MatchStatus::Confirmed);
        let item = engine.get_item(items[0].id).await.unwrap().unwrap();
        assert_eq!(item.status, SoaItemStatus::Matched);
    }

    #[tokio::test]
    async fn second_confirmed_match_for_an_item_is_rejected() {
        let mut engine = engine();
        let (case, vendor, company) = (EntityId::new(), EntityId::new(), EntityId::new());
        let inv_a = invoice(vendor, company, "INV-2024-0153", "780.00", (2024, 4, 2));
        let inv_b = invoice(vendor, company, "INV-2024-0154", "780.00", (2024, 4, 2));
        let ledger = StaticInvoiceSource::new(vec![inv_a, inv_b]);

        let items = engine
            .ingest_statement(
                case,
                vendor,
                company,
                vec![line("INV-2024-0135", "780.00", (2024, 4, 2))],
            )
            .await
            .unwrap();
        let first = match engine.reconcile_item(items[0].id, &ledger).await.unwrap() {
            ReconcileOutcome::Proposed(m) => m,
            other => panic!("expected proposal, got {other:?}"),
        };

        // A second, manually created proposal for the same item
        let second = SoaMatch::fuzzy(items[0].id, EntityId::new(), 0.8);
        engine.matches.insert(&second).await.unwrap();

        engine.confirm_match(first.id).await.unwrap();
        let err = engine.confirm_match(second.id).await.unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[tokio::test]
    async fn confirm_checks_competing_matches_at_write_time() {
        let mut engine = engine();
        let (case, vendor, company) = (EntityId::new(), EntityId::new(), EntityId::new());
        let ledger = StaticInvoiceSource::new(vec![invoice(
            vendor,
            company,
            "INV-2024-0153",
            "780.00",
            (2024, 4, 2),
        )]);

        let items = engine
            .ingest_statement(
                case,
                vendor,
                company,
                vec![line("INV-2024-0135", "780.00", (2024, 4, 2))],
            )
            .await
            .unwrap();
        let proposed = match engine.reconcile_item(items[0].id, &ledger).await.unwrap() {
            ReconcileOutcome::Proposed(m) => m,
            other => panic!("expected proposal, got {other:?}"),
        };

        // Another writer lands a confirmed match for the same item after
        // the proposal was read
        let rival = SoaMatch::deterministic(items[0].id, EntityId::new());
        engine.matches.insert(&rival).await.unwrap();

        let err = engine.confirm_match(proposed.id).await.unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
        let unchanged = engine.get_match(proposed.id).await.unwrap().unwrap();
        assert_eq!(unchanged.status, MatchStatus::Proposed);
    }

    #[tokio::test]
    async fn rejected_match_stays_rejected() {
        let mut engine = engine();
        let (case, vendor, company) = (EntityId::new(), EntityId::new(), EntityId::new());
        let ledger = StaticInvoiceSource::new(vec![invoice(
            vendor,
            company,
            "INV-2024-0153",
            "780.00",
            (2024, 4, 2),
        )]);

        let items = engine
            .ingest_statement(
                case,
                vendor,
                company,
                vec![line("INV-2024-0135", "780.00", (2024, 4, 2))],
            )
            .await
            .unwrap();
        let proposed = match engine.reconcile_item(items[0].id, &ledger).await.unwrap() {
            ReconcileOutcome::Proposed(m) => m,
            other => panic!("expected proposal, got {other:?}"),
        };

        let rejected = engine.reject_match(proposed.id).await.unwrap();
        assert_eq!(rejected.status, MatchStatus::Rejected);

        let err = engine.confirm_match(proposed.id).await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition(_)));
    }

    #[tokio::test]
    async fn resolving_a_discrepancy_twice_fails() {
        let mut engine = engine();
        let (case, vendor, company) = (EntityId::new(), EntityId::new(), EntityId::new());
        let ledger = StaticInvoiceSource::new(vec![]);

        let items = engine
            .ingest_statement(case, vendor, company, vec![line("INV-404", "500.00", (2024, 3, 10))])
            .await
            .unwrap();
        let discrepancy = match engine.reconcile_item(items[0].id, &ledger).await.unwrap() {
            ReconcileOutcome::Discrepancy(d) => d,
            other => panic!("expected discrepancy, got {other:?}"),
        };

        let resolved = engine
            .resolve_discrepancy(discrepancy.id, "vendor credited the line".to_string())
            .await
            .unwrap();
        assert_eq!(resolved.status, DiscrepancyStatus::Resolved);
        assert!(resolved.resolved_at.is_some());
        assert_eq!(
            resolved.resolution_action.as_deref(),
            Some("vendor credited the line")
        );

        let err = engine
            .resolve_discrepancy(discrepancy.id, "again".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition(_)));
    }

    #[tokio::test]
    async fn reconcile_statement_covers_every_extracted_item() {
        let mut engine = engine();
        let (case, vendor, company) = (EntityId::new(), EntityId::new(), EntityId::new());
        let ledger = StaticInvoiceSource::new(vec![invoice(
            vendor,
            company,
            "INV-001",
            "100.00",
            (2024, 1, 1),
        )]);

        engine
            .ingest_statement(
                case,
                vendor,
                company,
                vec![
                    line("INV-001", "100.00", (2024, 1, 1)),
                    line("INV-999", "250.00", (2024, 1, 2)),
                ],
            )
            .await
            .unwrap();

        let outcomes = engine.reconcile_statement(case, &ledger).await.unwrap();
        assert_eq!(outcomes.len(), 2);
        assert!(matches!(outcomes[0], ReconcileOutcome::Matched(_)));
        assert!(matches!(outcomes[1], ReconcileOutcome::Discrepancy(_)));
    }
}
