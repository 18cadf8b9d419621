//! Access contract for the key-value store backing the cache.
//!
//! The store offers lists, string hashes and plain strings, read one key at a time and
//! written through [`Batch`]es. A batch is applied in order but is not a transaction: a
//! reader may observe any prefix of it.

pub mod memory;
pub mod records;
pub mod redis_store;

use crate::codec::FieldMap;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store connection failed: {0}")]
    Connection(String),
    #[error("store command failed: {0}")]
    Command(String),
    #[error("store call timed out")]
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    Delete(String),
    /// Append to the tail, in the given order.
    RPush(String, Vec<String>),
    /// Prepend each value to the head, one at a time (so the list ends up reversed).
    LPush(String, Vec<String>),
    HSet(String, Vec<(String, String)>),
    Set(String, String),
    Expire(String, u64),
}

impl WriteOp {
    pub fn key(&self) -> &str {
        match self {
            WriteOp::Delete(k)
            | WriteOp::RPush(k, _)
            | WriteOp::LPush(k, _)
            | WriteOp::HSet(k, _)
            | WriteOp::Set(k, _)
            | WriteOp::Expire(k, _) => k,
        }
    }
}

/// Ordered list of writes sent to the store in one round trip.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    ops: Vec<WriteOp>,
    ttl_secs: Option<u64>,
}

impl Batch {
    pub fn new() -> Self {
        Batch::default()
    }

    /// Every key written after this call also gets an expiry.
    pub fn with_ttl(ttl_secs: Option<u64>) -> Self {
        Batch { ops: Vec::new(), ttl_secs }
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    fn expire(&mut self, key: &str) {
        if let Some(ttl) = self.ttl_secs {
            self.ops.push(WriteOp::Expire(key.to_string(), ttl));
        }
    }

    /// Replace a list wholesale, preserving `values` order.
    pub fn replace_list(&mut self, key: String, values: Vec<String>) {
        self.ops.push(WriteOp::Delete(key.clone()));
        if !values.is_empty() {
            self.ops.push(WriteOp::RPush(key.clone(), values));
            self.expire(&key);
        }
    }

    pub fn lpush(&mut self, key: String, values: Vec<String>) {
        self.ops.push(WriteOp::LPush(key.clone(), values));
        self.expire(&key);
    }

    /// Replace a hash wholesale so no field from a previous cycle survives.
    pub fn replace_hash(&mut self, key: String, fields: Vec<(&'static str, String)>) {
        self.ops.push(WriteOp::Delete(key.clone()));
        let fields = fields.into_iter().map(|(k, v)| (k.to_string(), v)).collect::<Vec<_>>();
        if !fields.is_empty() {
            self.ops.push(WriteOp::HSet(key.clone(), fields));
            self.expire(&key);
        }
    }

    pub fn set(&mut self, key: String, value: String) {
        self.ops.push(WriteOp::Set(key.clone(), value));
        self.expire(&key);
    }

    /// Set without expiry, for keys that must outlive the data they point at.
    pub fn set_persistent(&mut self, key: String, value: String) {
        self.ops.push(WriteOp::Set(key, value));
    }

    pub fn delete(&mut self, key: String) {
        self.ops.push(WriteOp::Delete(key));
    }
}

/// Minimal set of store primitives the cache relies on.
///
/// Methods take `&mut self`: each reader owns its connection, so reads never contend on an
/// in-process lock.
pub trait Store {
    /// Whole list, head to tail. A missing key is an empty list.
    fn list(&mut self, key: &str) -> Result<Vec<String>, StoreError>;
    /// Whole hash, or `None` when the key does not exist.
    fn hash(&mut self, key: &str) -> Result<Option<FieldMap>, StoreError>;
    fn get(&mut self, key: &str) -> Result<Option<String>, StoreError>;
    fn apply(&mut self, batch: &Batch) -> Result<(), StoreError>;
}

impl<S: Store + ?Sized> Store for &mut S {
    fn list(&mut self, key: &str) -> Result<Vec<String>, StoreError> {
        (**self).list(key)
    }

    fn hash(&mut self, key: &str) -> Result<Option<FieldMap>, StoreError> {
        (**self).hash(key)
    }

    fn get(&mut self, key: &str) -> Result<Option<String>, StoreError> {
        (**self).get(key)
    }

    fn apply(&mut self, batch: &Batch) -> Result<(), StoreError> {
        (**self).apply(batch)
    }
}
