//! Statement-of-account reconciliation

pub mod engine;
pub mod policy;

pub use engine::*;
pub use policy::*;
