//! # VendorPay Core
//!
//! The financial workflow core of a vendor management platform: statement
//! reconciliation, debit notes, and payment approvals over a shared
//! soft-delete repository layer.
//!
//! ## Features
//!
//! - **Soft-delete repository**: Generic repository base with audited
//!   soft-delete and restore, gated at compile time by the `SoftDeletable`
//!   trait
//! - **SOA reconciliation**: Deterministic and fuzzy matching of statement
//!   items against ledger invoices, with typed discrepancies for everything
//!   that fails to match
//! - **Debit notes**: Draft/approve/post lifecycle producing immutable,
//!   supersedable adjustment documents
//! - **Payment approvals**: Table-driven state machine with threshold
//!   routing and dual-control approval
//! - **Storage abstraction**: Database-agnostic design with trait-based
//!   storage and atomic conditional writes
//!
//! ## Quick Start
//!
//! ```rust
//! use vendorpay_core::{PaymentManager, MemoryStore};
//!
//! // Managers are generic over the storage backend. MemoryStore works for
//! // tests and development; production supplies its own EntityStore impl.
//! let mut payments = PaymentManager::new(MemoryStore::new());
//! ```

pub mod debit_note;
pub mod payment;
pub mod reconciliation;
pub mod repository;
pub mod traits;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use debit_note::*;
pub use payment::*;
pub use reconciliation::*;
pub use repository::*;
pub use traits::*;
pub use types::*;
pub use utils::memory_store::{MemoryStore, StaticInvoiceSource};
