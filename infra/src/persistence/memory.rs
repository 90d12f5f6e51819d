//! An in-process store with the same semantics as the PostgreSQL one.
//!
//! A transaction holds the database lock from start to finish and works on a
//! private copy of the documents, which replaces the shared copy on commit.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use err_derive::Error;
use log::*;
use serde_json::Value;

use super::{json_contains, ConcurrencyError, RawStore, Session, Storage};
use crate::documents::Version;

type Key = (String, String);

#[derive(Debug, Default)]
struct Tables {
    docs: BTreeMap<Key, Value>,
    txid: u64,
}

#[derive(Debug, Error)]
#[error(display = "memory store lock poisoned")]
pub struct MemoryError;

#[derive(Debug, Clone, Default)]
pub struct MemoryConnectionManager {
    db: Arc<Mutex<Tables>>,
}

#[derive(Debug)]
pub struct MemoryStore {
    db: Arc<Mutex<Tables>>,
}

struct MemoryTxn {
    docs: RefCell<BTreeMap<Key, Value>>,
    version: Version,
}

impl MemoryConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every committed document, ordered by kind and id.
    pub fn documents(&self) -> Result<Vec<Value>> {
        let db = self.db.lock().map_err(|_| MemoryError)?;
        Ok(db.docs.values().cloned().collect())
    }
}

impl r2d2::ManageConnection for MemoryConnectionManager {
    type Connection = MemoryStore;
    type Error = MemoryError;

    fn connect(&self) -> Result<MemoryStore, MemoryError> {
        Ok(MemoryStore {
            db: self.db.clone(),
        })
    }

    fn is_valid(&self, _: &mut MemoryStore) -> Result<(), MemoryError> {
        Ok(())
    }

    fn has_broken(&self, _: &mut MemoryStore) -> bool {
        false
    }
}

impl Storage for MemoryStore {
    fn setup(&mut self) -> Result<()> {
        Ok(())
    }

    fn transaction<R, F>(&mut self, f: F) -> Result<R>
    where
        F: FnOnce(&Session<'_>) -> Result<R>,
    {
        let mut db = self.db.lock().map_err(|_| MemoryError)?;
        let txid = db.txid + 1;
        let txn = MemoryTxn {
            docs: RefCell::new(db.docs.clone()),
            version: format!("{:x}", txid).into(),
        };
        let res = f(&Session::wrap(&txn))?;
        db.docs = txn.docs.into_inner();
        db.txid = txid;
        trace!("Committed memory transaction {:x}", txid);
        Ok(res)
    }
}

impl MemoryTxn {
    fn stamped(&self, mut body: Value) -> Value {
        if let Some(obj) = body.as_object_mut() {
            obj.insert(
                "_version".to_string(),
                Value::String(self.version.to_string()),
            );
        }
        body
    }

    fn check_version(&self, key: &Key, expected: &Version) -> Result<()> {
        let docs = self.docs.borrow();
        let current = docs
            .get(key)
            .and_then(|body| body.get("_version"))
            .and_then(Value::as_str);
        if current != Some(expected.as_str()) {
            warn!(
                "Version mismatch on {}/{}: expected {}, found {:?}",
                key.0, key.1, expected, current
            );
            return Err(ConcurrencyError.into());
        }
        Ok(())
    }
}

fn key(kind: &str, id: &str) -> Key {
    (kind.to_string(), id.to_string())
}

impl RawStore for MemoryTxn {
    fn load_raw(&self, kind: &str, id: &str) -> Result<Option<Value>> {
        Ok(self.docs.borrow().get(&key(kind, id)).cloned())
    }

    fn insert_raw(&self, kind: &str, id: &str, body: Value) -> Result<Version> {
        let key = key(kind, id);
        let mut docs = self.docs.borrow_mut();
        if docs.contains_key(&key) {
            warn!("Insert of existing document {}/{}", kind, id);
            return Err(ConcurrencyError.into());
        }
        docs.insert(key, self.stamped(body));
        Ok(self.version.clone())
    }

    fn update_raw(
        &self,
        kind: &str,
        id: &str,
        expected: &Version,
        body: Value,
    ) -> Result<Version> {
        let key = key(kind, id);
        self.check_version(&key, expected)?;
        self.docs.borrow_mut().insert(key, self.stamped(body));
        Ok(self.version.clone())
    }

    fn delete_raw(&self, kind: &str, id: &str, expected: &Version) -> Result<()> {
        let key = key(kind, id);
        self.check_version(&key, expected)?;
        self.docs.borrow_mut().remove(&key);
        Ok(())
    }

    fn scan_raw(&self, kind: &str, filter: &Value) -> Result<Vec<Value>> {
        Ok(self
            .docs
            .borrow()
            .iter()
            .filter(|((k, _), body)| k == kind && json_contains(body, filter))
            .map(|(_, body)| body.clone())
            .collect())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::persistence::test as shared;
    use r2d2::ManageConnection;

    fn store() -> MemoryStore {
        env_logger::try_init().unwrap_or_default();
        MemoryConnectionManager::new().connect().expect("connect")
    }

    #[test]
    fn load_missing_document_should_return_none() {
        shared::load_missing_document_should_return_none(&mut store())
    }

    #[test]
    fn save_load() {
        shared::save_load(&mut store())
    }

    #[test]
    fn should_update_on_overwrite() {
        shared::should_update_on_overwrite(&mut store())
    }

    #[test]
    fn should_fail_on_overwrite_with_new() {
        shared::should_fail_on_overwrite_with_new(&mut store())
    }

    #[test]
    fn should_fail_on_overwrite_with_bogus_version() {
        shared::should_fail_on_overwrite_with_bogus_version(&mut store())
    }

    #[test]
    fn should_roll_back_on_error() {
        shared::should_roll_back_on_error(&mut store())
    }

    #[test]
    fn should_delete_with_current_version() {
        shared::should_delete_with_current_version(&mut store())
    }

    #[test]
    fn should_scan_by_containment() {
        shared::should_scan_by_containment(&mut store())
    }

    #[test]
    fn connections_share_one_database() {
        let manager = MemoryConnectionManager::new();
        let mut one = manager.connect().expect("connect");
        let mut two = manager.connect().expect("connect");
        let idgen = crate::ids::IdGen::new();
        let mut doc = shared::named(&idgen, "shared");

        one.transaction(|s| s.save(&mut doc)).expect("save");
        let loaded = two
            .transaction(|s| s.load(&doc.meta.id))
            .expect("load");

        assert_eq!(Some(doc), loaded);
        assert_eq!(manager.documents().expect("documents").len(), 1);
    }
}
