//! A transactional JSON document store.
//!
//! Each document is stored under its kind (`Entity::PREFIX`) and id, and
//! carries a `_version` that the store replaces on every write. Writes with
//! a stale version fail with [`ConcurrencyError`].
//!
//! All access happens through a [`Session`], which only exists for the
//! duration of a [`Storage::transaction`] call; everything done through one
//! session commits or rolls back together.

use anyhow::Result;
use err_derive::Error;
use log::*;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::documents::{HasMeta, Version};
use crate::ids::{Entity, Id};

pub mod memory;
pub mod postgres;

#[derive(Debug, Error, PartialEq, Eq)]
#[error(display = "stale version")]
pub struct ConcurrencyError;

/// The untyped operations a backend offers inside one transaction.
pub trait RawStore {
    fn load_raw(&self, kind: &str, id: &str) -> Result<Option<Value>>;
    fn insert_raw(&self, kind: &str, id: &str, body: Value) -> Result<Version>;
    fn update_raw(&self, kind: &str, id: &str, expected: &Version, body: Value)
        -> Result<Version>;
    fn delete_raw(&self, kind: &str, id: &str, expected: &Version) -> Result<()>;
    /// Every document of `kind` whose body contains `filter`, in the sense of
    /// PostgreSQL's `@>`.
    fn scan_raw(&self, kind: &str, filter: &Value) -> Result<Vec<Value>>;
}

/// A pooled connection to a document store.
pub trait Storage {
    fn setup(&mut self) -> Result<()>;

    /// Runs `f` in one transaction; commits iff `f` returns `Ok`.
    fn transaction<R, F>(&mut self, f: F) -> Result<R>
    where
        F: FnOnce(&Session<'_>) -> Result<R>;
}

/// Typed access to the store for the lifetime of one transaction.
pub struct Session<'a> {
    store: &'a dyn RawStore,
}

impl<'a> Session<'a> {
    pub fn wrap(store: &'a dyn RawStore) -> Self {
        Session { store }
    }

    pub fn load<D: DeserializeOwned + Entity>(&self, id: &Id<D>) -> Result<Option<D>> {
        match self.store.load_raw(D::PREFIX, &id.to_string())? {
            Some(json) => Ok(Some(serde_json::from_value(json)?)),
            None => Ok(None),
        }
    }

    /// Inserts a never-saved document, or updates one whose version still
    /// matches the store. The document's version is refreshed on success.
    pub fn save<D: Serialize + Entity + HasMeta>(&self, document: &mut D) -> Result<()> {
        let id = document.meta().id.to_string();
        let json = serde_json::to_value(&*document)?;
        let version = if document.meta().version.is_new() {
            self.store.insert_raw(D::PREFIX, &id, json)?
        } else {
            let expected = document.meta().version.clone();
            self.store.update_raw(D::PREFIX, &id, &expected, json)?
        };
        debug!("Saved {} at version {}", id, version);
        document.meta_mut().version = version;
        Ok(())
    }

    pub fn delete<D: Entity + HasMeta>(&self, document: &D) -> Result<()> {
        let meta = document.meta();
        self.store
            .delete_raw(D::PREFIX, &meta.id.to_string(), &meta.version)?;
        debug!("Deleted {}", meta.id);
        Ok(())
    }

    pub fn scan<D: DeserializeOwned + Entity>(&self, filter: &Value) -> Result<Vec<D>> {
        let docs = self
            .store
            .scan_raw(D::PREFIX, filter)?
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<D>, _>>()?;
        trace!("Scan of {} with {} found {}", D::PREFIX, filter, docs.len());
        Ok(docs)
    }
}

pub(crate) fn json_contains(haystack: &Value, needle: &Value) -> bool {
    match (haystack, needle) {
        (Value::Object(h), Value::Object(n)) => n
            .iter()
            .all(|(k, v)| h.get(k).map_or(false, |hv| json_contains(hv, v))),
        (Value::Array(h), Value::Array(n)) => n
            .iter()
            .all(|nv| h.iter().any(|hv| json_contains(hv, nv))),
        (h, n) => h == n,
    }
}
