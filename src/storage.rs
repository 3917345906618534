//! RocksDB-backed storage layer
//!
//! Thin wrapper exposing the few primitives the engine needs. All
//! multi-record mutations go through `batch_write`, which is the
//! atomicity guarantee behind the full-rollback fulfillment contract.

use crate::errors::{RifaResult, StorageError};
use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};
use std::path::Path;
use std::sync::Arc;

#[derive(Clone)]
pub struct Storage {
    db: Arc<DB>,
}

impl Storage {
    pub fn open<P: AsRef<Path>>(path: P) -> RifaResult<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_write_buffer_size(64 * 1024 * 1024);
        opts.set_max_write_buffer_number(4);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let db = DB::open(&opts, path)
            .map_err(|e| StorageError::DatabaseOpenFailed(e.to_string()))?;

        Ok(Self { db: Arc::new(db) })
    }

    pub fn get(&self, key: &[u8]) -> RifaResult<Option<Vec<u8>>> {
        self.db
            .get(key)
            .map_err(|e| StorageError::ReadFailed(e.to_string()).into())
    }

    pub fn put(&self, key: &[u8], value: &[u8]) -> RifaResult<()> {
        self.db
            .put(key, value)
            .map_err(|e| StorageError::WriteFailed(e.to_string()).into())
    }

    pub fn delete(&self, key: &[u8]) -> RifaResult<()> {
        self.db
            .delete(key)
            .map_err(|e| StorageError::WriteFailed(e.to_string()).into())
    }

    /// Write all items atomically: either every item lands or none does.
    pub fn batch_write(&self, items: &[(Vec<u8>, Vec<u8>)]) -> RifaResult<()> {
        let mut batch = WriteBatch::default();
        for (key, value) in items {
            batch.put(key, value);
        }
        self.db
            .write(batch)
            .map_err(|e| StorageError::WriteFailed(e.to_string()).into())
    }

    /// Scan keys under `prefix` in ascending key order, starting strictly
    /// after `cursor` when given. Returns at most `limit` rows.
    pub fn scan_prefix(
        &self,
        prefix: &[u8],
        cursor: Option<&[u8]>,
        limit: usize,
    ) -> Vec<(Vec<u8>, Vec<u8>)> {
        let start = cursor.unwrap_or(prefix);
        let iter = self
            .db
            .iterator(IteratorMode::From(start, Direction::Forward));

        let mut rows = Vec::new();
        for item in iter {
            let Ok((key, value)) = item else { break };
            if !key.starts_with(prefix) {
                break;
            }
            // Cursor is exclusive
            if cursor.map_or(false, |c| key.as_ref() == c) {
                continue;
            }
            rows.push((key.to_vec(), value.to_vec()));
            if rows.len() >= limit {
                break;
            }
        }

        rows
    }
}
