//! Store communication errors.
//!
//! None of these are retried inside the harness; callers decide whether a
//! failure aborts the run or is recorded and absorbed.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Cannot connect to document store at {0}")]
    Connection(String),

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Document store returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Response parsing error: {0}")]
    ResponseParsing(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown operation {0}")]
    UnknownOperation(u64),

    #[error("Operation {id} faulted: {reason}")]
    OperationFaulted { id: u64, reason: String },

    #[error("Client certificate error: {0}")]
    Certificate(String),

    #[error("Bulk insert rejected: {0}")]
    BulkInsertRejected(String),
}
