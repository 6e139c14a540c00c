// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Key-value backing store contract for channel persistence. Nodes that
//! already run a database can adapt it to [`Store`]; [`MemoryDB`] covers
//! tests and ephemeral deployments.

use ahash::AHashMap;
use parking_lot::RwLock;

use crate::errors::Error;

/// Store interface used as a KV store implementation.
pub trait Store: Send + Sync {
    /// Read single value from data store and return `None` if key doesn't
    /// exist.
    fn read(&self, key: &[u8]) -> Result<Option<Vec<u8>>, Error>;

    /// Write a single value to the data store.
    fn write(&self, key: &[u8], value: &[u8]) -> Result<(), Error>;

    /// Delete value at key.
    fn delete(&self, key: &[u8]) -> Result<(), Error>;

    /// Returns `Ok(true)` if key exists in store.
    fn exists(&self, key: &[u8]) -> Result<bool, Error> {
        Ok(self.read(key)?.is_some())
    }

    /// All keys currently present, in unspecified order. Recovery walks
    /// this to find channels that survived a process restart.
    fn list(&self) -> Result<Vec<Vec<u8>>, Error>;
}

/// A thread-safe `HashMap` wrapper.
#[derive(Debug, Default, Clone)]
pub struct MemoryDB {
    db: std::sync::Arc<RwLock<AHashMap<Vec<u8>, Vec<u8>>>>,
}

impl Store for MemoryDB {
    fn read(&self, key: &[u8]) -> Result<Option<Vec<u8>>, Error> {
        Ok(self.db.read().get(key).cloned())
    }

    fn write(&self, key: &[u8], value: &[u8]) -> Result<(), Error> {
        self.db.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), Error> {
        self.db.write().remove(key);
        Ok(())
    }

    fn exists(&self, key: &[u8]) -> Result<bool, Error> {
        Ok(self.db.read().contains_key(key))
    }

    fn list(&self) -> Result<Vec<Vec<u8>>, Error> {
        Ok(self.db.read().keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mem_db_contract() {
        let db = MemoryDB::default();
        assert_eq!(db.read(b"a").unwrap(), None);
        assert!(!db.exists(b"a").unwrap());

        db.write(b"a", b"1").unwrap();
        db.write(b"b", b"2").unwrap();
        assert_eq!(db.read(b"a").unwrap(), Some(b"1".to_vec()));
        assert!(db.exists(b"b").unwrap());

        let mut keys = db.list().unwrap();
        keys.sort();
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec()]);

        db.delete(b"a").unwrap();
        assert!(!db.exists(b"a").unwrap());
        db.delete(b"a").unwrap();
    }

    #[test]
    fn overwrite_replaces_value() {
        let db = MemoryDB::default();
        db.write(b"k", b"old").unwrap();
        db.write(b"k", b"new").unwrap();
        assert_eq!(db.read(b"k").unwrap(), Some(b"new".to_vec()));
        assert_eq!(db.list().unwrap().len(), 1);
    }
}
