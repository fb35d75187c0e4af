//! Buffered bulk insert session.
//!
//! Documents accumulate in memory and go to the store in fixed-size chunks.
//! Call [`BulkInsert::finish`] to flush the tail: async work cannot run in
//! `Drop`, so a session dropped with buffered documents only logs a warning.

use super::error::StoreError;
use super::traits::DocumentStore;
use super::types::{Document, StoredDocument};

/// Documents per store round trip.
pub const DEFAULT_CHUNK_SIZE: usize = 512;

pub struct BulkInsert<'a> {
    store: &'a dyn DocumentStore,
    buffer: Vec<StoredDocument>,
    chunk_size: usize,
    written: usize,
}

impl<'a> BulkInsert<'a> {
    pub fn new(store: &'a dyn DocumentStore) -> Self {
        Self::with_chunk_size(store, DEFAULT_CHUNK_SIZE)
    }

    pub fn with_chunk_size(store: &'a dyn DocumentStore, chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            store,
            buffer: Vec::with_capacity(chunk_size),
            chunk_size,
            written: 0,
        }
    }

    /// Queue a document. Returns how many documents were flushed as a result
    /// (0 while the chunk is still filling).
    pub async fn store<T: Document>(&mut self, entity: &T) -> Result<usize, StoreError> {
        self.buffer.push(StoredDocument::from_entity(entity)?);
        if self.buffer.len() >= self.chunk_size {
            return self.flush().await;
        }
        Ok(0)
    }

    /// Send everything buffered so far.
    pub async fn flush(&mut self) -> Result<usize, StoreError> {
        if self.buffer.is_empty() {
            return Ok(0);
        }
        let batch = std::mem::replace(&mut self.buffer, Vec::with_capacity(self.chunk_size));
        let accepted = self.store.bulk_insert(batch).await?;
        self.written += accepted;
        Ok(accepted)
    }

    /// Flush the tail and close the session. Returns the final flush count
    /// together with the session total.
    pub async fn finish(mut self) -> Result<(usize, usize), StoreError> {
        let last = self.flush().await?;
        Ok((last, self.written))
    }

    /// Documents acknowledged by the store so far.
    pub fn written(&self) -> usize {
        self.written
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

impl Drop for BulkInsert<'_> {
    fn drop(&mut self) {
        if !self.buffer.is_empty() {
            tracing::warn!(
                pending = self.buffer.len(),
                database = self.store.database(),
                "Bulk insert session dropped without finish(); buffered documents discarded"
            );
        }
    }
}
