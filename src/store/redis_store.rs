//! Redis-backed [`Store`].
//!
//! One blocking connection per `RedisStore`, opened lazily and reopened after an I/O failure.
//! Every connect, read and write is bounded by the configured timeout.

use super::{Batch, Store, StoreError, WriteOp};
use crate::codec::FieldMap;
use log::debug;
use redis::{Commands, RedisError};
use std::time::Duration;

pub struct RedisStore {
    client: redis::Client,
    conn: Option<redis::Connection>,
    timeout: Duration,
}

impl RedisStore {
    pub fn open(url: &str, timeout: Duration) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(RedisStore {
            client,
            conn: None,
            timeout,
        })
    }

    /// A second store on the same server with its own connection.
    pub fn reader(&self) -> Self {
        RedisStore {
            client: self.client.clone(),
            conn: None,
            timeout: self.timeout,
        }
    }

    fn connection(&mut self) -> Result<&mut redis::Connection, StoreError> {
        if self.conn.is_none() {
            let conn = self
                .client
                .get_connection_with_timeout(self.timeout)
                .map_err(classify)?;
            conn.set_read_timeout(Some(self.timeout)).map_err(classify)?;
            conn.set_write_timeout(Some(self.timeout)).map_err(classify)?;
            debug!("Opened store connection");
            self.conn = Some(conn);
        }
        self.conn
            .as_mut()
            .ok_or_else(|| StoreError::Connection("connection unavailable".to_string()))
    }

    fn run<T>(&mut self, f: impl FnOnce(&mut redis::Connection) -> Result<T, RedisError>) -> Result<T, StoreError> {
        let conn = self.connection()?;
        match f(conn) {
            Ok(v) => Ok(v),
            Err(e) => {
                if e.is_io_error() || e.is_connection_dropped() || e.is_timeout() {
                    self.conn = None;
                }
                Err(classify(e))
            }
        }
    }
}

fn classify(e: RedisError) -> StoreError {
    if e.is_timeout() {
        StoreError::Timeout
    } else if e.is_io_error() || e.is_connection_refusal() || e.is_connection_dropped() {
        StoreError::Connection(e.to_string())
    } else {
        StoreError::Command(e.to_string())
    }
}

impl Store for RedisStore {
    fn list(&mut self, key: &str) -> Result<Vec<String>, StoreError> {
        self.run(|c| c.lrange(key, 0, -1))
    }

    fn hash(&mut self, key: &str) -> Result<Option<FieldMap>, StoreError> {
        let fields: FieldMap = self.run(|c| c.hgetall(key))?;
        Ok(if fields.is_empty() { None } else { Some(fields) })
    }

    fn get(&mut self, key: &str) -> Result<Option<String>, StoreError> {
        self.run(|c| c.get(key))
    }

    fn apply(&mut self, batch: &Batch) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut pipe = redis::pipe();
        for op in batch.ops() {
            match op {
                WriteOp::Delete(k) => {
                    pipe.del(k).ignore();
                }
                WriteOp::RPush(k, values) => {
                    pipe.rpush(k, values).ignore();
                }
                WriteOp::LPush(k, values) => {
                    pipe.lpush(k, values).ignore();
                }
                WriteOp::HSet(k, fields) => {
                    pipe.hset_multiple(k, fields.as_slice()).ignore();
                }
                WriteOp::Set(k, v) => {
                    pipe.set(k, v).ignore();
                }
                WriteOp::Expire(k, ttl) => {
                    pipe.expire(k, i64::try_from(*ttl).unwrap_or(i64::MAX)).ignore();
                }
            }
        }
        debug!("Applying pipeline of {} op(s)", batch.len());
        self.run(|c| pipe.query::<()>(c))
    }
}
