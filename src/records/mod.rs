//! Synthetic ledger records: charges, payments and the tag/user entities the
//! patch phase stamps onto them.

pub mod factory;
pub mod types;

pub use factory::RecordFactory;
pub use types::*;
