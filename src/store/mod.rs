//! Document store facade.
//!
//! The harness only talks to the store through [`DocumentStore`]; two
//! implementations exist:
//! ```text
//! RavenHttpStore   REST client against a live server
//! InMemoryStore    in-process stand-in for tests and dry runs
//! ```
//! Bulk insert sessions and long-running operation tracking are built on top
//! of the trait so both implementations share them.

pub mod bulk;
pub mod error;
pub mod http;
pub mod indexes;
pub mod memory;
pub mod operation;
pub mod query;
pub mod traits;
pub mod types;

pub use bulk::{BulkInsert, DEFAULT_CHUNK_SIZE};
pub use error::StoreError;
pub use http::RavenHttpStore;
pub use memory::{InMemoryStore, MemoryStoreConfig};
pub use operation::OperationHandle;
pub use query::{Clause, IndexQuery, PatchByQuery, TagPatch};
pub use traits::DocumentStore;
pub use types::*;
