//! In-process store with the same list/hash/string semantics as Redis.
//!
//! Clones share the same data, so a builder and several query engines can be pointed at one
//! instance. Expiry is recorded but never enforced.

use super::{Batch, Store, StoreError, WriteOp};
use crate::codec::FieldMap;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, PoisonError, RwLock};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Value {
    List(VecDeque<String>),
    Hash(FieldMap),
    Str(String),
}

#[derive(Debug, Default)]
struct Inner {
    values: HashMap<String, Value>,
    ttls: HashMap<String, u64>,
    unavailable: bool,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    /// Make every subsequent call fail, as if the server had gone away.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.write().unwrap_or_else(PoisonError::into_inner).unavailable = unavailable;
    }

    pub fn ttl(&self, key: &str) -> Option<u64> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .ttls
            .get(key)
            .copied()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys = self
            .inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values
            .keys()
            .cloned()
            .collect::<Vec<_>>();
        keys.sort();
        keys
    }

    fn read<T>(&self, f: impl FnOnce(&Inner) -> Result<T, StoreError>) -> Result<T, StoreError> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        if inner.unavailable {
            return Err(StoreError::Connection("memory store marked unavailable".to_string()));
        }
        f(&inner)
    }
}

fn wrong_type(key: &str) -> StoreError {
    StoreError::Command(format!("WRONGTYPE operation against key {key}"))
}

impl Inner {
    fn apply_op(&mut self, op: &WriteOp) -> Result<(), StoreError> {
        match op {
            WriteOp::Delete(k) => {
                self.values.remove(k);
                self.ttls.remove(k);
            }
            WriteOp::RPush(k, values) | WriteOp::LPush(k, values) => {
                let entry = self
                    .values
                    .entry(k.clone())
                    .or_insert_with(|| Value::List(VecDeque::new()));
                let Value::List(list) = entry else {
                    return Err(wrong_type(k));
                };
                for v in values {
                    if matches!(op, WriteOp::LPush(..)) {
                        list.push_front(v.clone());
                    } else {
                        list.push_back(v.clone());
                    }
                }
            }
            WriteOp::HSet(k, fields) => {
                let entry = self.values.entry(k.clone()).or_insert_with(|| Value::Hash(FieldMap::new()));
                let Value::Hash(hash) = entry else {
                    return Err(wrong_type(k));
                };
                for (f, v) in fields {
                    hash.insert(f.clone(), v.clone());
                }
            }
            WriteOp::Set(k, v) => {
                self.values.insert(k.clone(), Value::Str(v.clone()));
                self.ttls.remove(k);
            }
            WriteOp::Expire(k, ttl) => {
                if self.values.contains_key(k) {
                    self.ttls.insert(k.clone(), *ttl);
                }
            }
        }
        Ok(())
    }
}

impl Store for MemoryStore {
    fn list(&mut self, key: &str) -> Result<Vec<String>, StoreError> {
        self.read(|inner| match inner.values.get(key) {
            None => Ok(Vec::new()),
            Some(Value::List(list)) => Ok(list.iter().cloned().collect()),
            Some(_) => Err(wrong_type(key)),
        })
    }

    fn hash(&mut self, key: &str) -> Result<Option<FieldMap>, StoreError> {
        self.read(|inner| match inner.values.get(key) {
            None => Ok(None),
            Some(Value::Hash(hash)) => Ok(Some(hash.clone())),
            Some(_) => Err(wrong_type(key)),
        })
    }

    fn get(&mut self, key: &str) -> Result<Option<String>, StoreError> {
        self.read(|inner| match inner.values.get(key) {
            None => Ok(None),
            Some(Value::Str(s)) => Ok(Some(s.clone())),
            Some(_) => Err(wrong_type(key)),
        })
    }

    /// Ops run in order; a failing op leaves the earlier ones applied, like a Redis pipeline.
    fn apply(&mut self, batch: &Batch) -> Result<(), StoreError> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if inner.unavailable {
            return Err(StoreError::Connection("memory store marked unavailable".to_string()));
        }
        for op in batch.ops() {
            inner.apply_op(op)?;
        }
        Ok(())
    }
}
