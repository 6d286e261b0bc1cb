//! Payment approval state machine and operations

pub mod manager;
pub mod workflow;

pub use manager::*;
pub use workflow::*;
