use std::cell::RefCell;
use std::fmt;

use anyhow::Result;
use log::*;
use postgres::error::SqlState;
use postgres::{Client, IsolationLevel, NoTls, Transaction};
use r2d2::ManageConnection;
use r2d2_postgres::PostgresConnectionManager;
use serde_json::Value;

use super::{ConcurrencyError, RawStore, Session, Storage};
use crate::documents::Version;

const SETUP_SQL: &str = include_str!("persistence.sql");
const LOAD_SQL: &str = "SELECT body FROM documents WHERE kind = $1 AND id = $2";
const INSERT_SQL: &str = "INSERT INTO documents (id, kind, body) \
                          VALUES ($1, $2, jsonb_set($3::jsonb, '{_version}', to_jsonb(to_hex(txid_current())))) \
                          ON CONFLICT (id) DO NOTHING \
                          RETURNING body ->> '_version'";
const UPDATE_SQL: &str = "UPDATE documents \
                          SET body = jsonb_set($3::jsonb, '{_version}', to_jsonb(to_hex(txid_current()))) \
                          WHERE id = $1 AND kind = $2 AND body ->> '_version' = $4 \
                          RETURNING body ->> '_version'";
const DELETE_SQL: &str =
    "DELETE FROM documents WHERE id = $1 AND kind = $2 AND body ->> '_version' = $3";
const SCAN_SQL: &str = "SELECT body FROM documents WHERE kind = $1 AND body @> $2::jsonb";

/// A PostgreSQL connection speaking the document protocol.
pub struct Documents {
    client: Client,
}

pub struct DocumentConnectionManager {
    inner: PostgresConnectionManager<NoTls>,
}

struct PgTxn<'a> {
    t: RefCell<Transaction<'a>>,
}

impl Documents {
    pub fn new(client: Client) -> Self {
        Documents { client }
    }

    pub fn get_mut(&mut self) -> &mut Client {
        &mut self.client
    }
}

impl fmt::Debug for Documents {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("Documents").finish()
    }
}

impl DocumentConnectionManager {
    pub fn new(inner: PostgresConnectionManager<NoTls>) -> Self {
        DocumentConnectionManager { inner }
    }

    pub fn from_url(url: &str) -> Result<Self> {
        let config = url.parse::<postgres::Config>()?;
        Ok(Self::new(PostgresConnectionManager::new(config, NoTls)))
    }
}

impl fmt::Debug for DocumentConnectionManager {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("DocumentConnectionManager").finish()
    }
}

impl ManageConnection for DocumentConnectionManager {
    type Connection = Documents;
    type Error = postgres::Error;

    fn connect(&self) -> Result<Documents, postgres::Error> {
        self.inner.connect().map(Documents::new)
    }

    fn is_valid(&self, conn: &mut Documents) -> Result<(), postgres::Error> {
        self.inner.is_valid(&mut conn.client)
    }

    fn has_broken(&self, conn: &mut Documents) -> bool {
        self.inner.has_broken(&mut conn.client)
    }
}

impl Storage for Documents {
    fn setup(&mut self) -> Result<()> {
        self.client.batch_execute(SETUP_SQL)?;
        Ok(())
    }

    fn transaction<R, F>(&mut self, f: F) -> Result<R>
    where
        F: FnOnce(&Session<'_>) -> Result<R>,
    {
        let t = self
            .client
            .build_transaction()
            .isolation_level(IsolationLevel::Serializable)
            .start()
            .map_err(classify)?;
        let txn = PgTxn {
            t: RefCell::new(t),
        };
        let res = f(&Session::wrap(&txn))?;
        txn.t.into_inner().commit().map_err(classify)?;
        Ok(res)
    }
}

/// Serialization failures are reported as `ConcurrencyError`, the same as
/// stale version writes.
fn classify(err: postgres::Error) -> anyhow::Error {
    if err.code() == Some(&SqlState::T_R_SERIALIZATION_FAILURE) {
        warn!("Serialization failure: {}", err);
        ConcurrencyError.into()
    } else {
        err.into()
    }
}

impl PgTxn<'_> {
    fn returned_version(&self, sql: &str, rows: Vec<postgres::Row>) -> Result<Version> {
        match rows.first() {
            Some(row) => Ok(row.try_get::<_, String>(0)?.into()),
            None => {
                warn!("{:?} impacted no rows", sql);
                Err(ConcurrencyError.into())
            }
        }
    }
}

impl RawStore for PgTxn<'_> {
    fn load_raw(&self, kind: &str, id: &str) -> Result<Option<Value>> {
        let rows = self
            .t
            .borrow_mut()
            .query(LOAD_SQL, &[&kind, &id])
            .map_err(classify)?;
        match rows.first() {
            Some(row) => Ok(Some(row.try_get(0)?)),
            None => Ok(None),
        }
    }

    fn insert_raw(&self, kind: &str, id: &str, body: Value) -> Result<Version> {
        let rows = self
            .t
            .borrow_mut()
            .query(INSERT_SQL, &[&id, &kind, &body])
            .map_err(classify)?;
        self.returned_version(INSERT_SQL, rows)
    }

    fn update_raw(
        &self,
        kind: &str,
        id: &str,
        expected: &Version,
        body: Value,
    ) -> Result<Version> {
        let rows = self
            .t
            .borrow_mut()
            .query(UPDATE_SQL, &[&id, &kind, &body, &expected.as_str()])
            .map_err(classify)?;
        self.returned_version(UPDATE_SQL, rows)
    }

    fn delete_raw(&self, kind: &str, id: &str, expected: &Version) -> Result<()> {
        let nrows = self
            .t
            .borrow_mut()
            .execute(DELETE_SQL, &[&id, &kind, &expected.as_str()])
            .map_err(classify)?;
        debug!("Delete modified {} rows", nrows);
        if nrows != 1 {
            warn!("Delete impacted {} rows not 1", nrows);
            return Err(ConcurrencyError.into());
        }
        Ok(())
    }

    fn scan_raw(&self, kind: &str, filter: &Value) -> Result<Vec<Value>> {
        let rows = self
            .t
            .borrow_mut()
            .query(SCAN_SQL, &[&kind, filter])
            .map_err(classify)?;
        rows.iter()
            .map(|row| row.try_get::<_, Value>(0).map_err(anyhow::Error::from))
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ids::IdGen;
    use crate::persistence::test::{self as shared, named, ADocument};
    use anyhow::anyhow;
    use r2d2::Pool;
    use std::env;
    use std::sync::{Arc, Barrier};
    use std::thread;

    const DEFAULT_URL: &str = "postgres://postgres@localhost/";

    #[derive(Debug)]
    struct UseTempSchema(String);

    impl r2d2::CustomizeConnection<Documents, postgres::Error> for UseTempSchema {
        fn on_acquire(&self, conn: &mut Documents) -> Result<(), postgres::Error> {
            conn.get_mut()
                .batch_execute(&format!("SET search_path TO \"{}\"", self.0))
        }
    }

    fn pool(schema: &str) -> Pool<DocumentConnectionManager> {
        env_logger::try_init().unwrap_or_default();
        let url = env::var("POSTGRES_URL").unwrap_or_else(|_| DEFAULT_URL.to_string());
        debug!("Build pool for {} in schema {}", url, schema);
        let manager = DocumentConnectionManager::from_url(&url).expect("postgres url");
        manager
            .connect()
            .expect("connect")
            .get_mut()
            .batch_execute(&format!(
                "DROP SCHEMA IF EXISTS \"{0}\" CASCADE; CREATE SCHEMA \"{0}\"",
                schema
            ))
            .expect("create schema");

        let pool = r2d2::Pool::builder()
            .max_size(2)
            .connection_customizer(Box::new(UseTempSchema(schema.to_string())))
            .build(manager)
            .expect("pool");
        pool.get().expect("temp connection").setup().expect("setup");
        pool
    }

    #[test]
    #[ignore]
    fn load_missing_document_should_return_none() {
        let pool = pool("load_missing_document_should_return_none");
        shared::load_missing_document_should_return_none(&mut *pool.get().expect("conn"))
    }

    #[test]
    #[ignore]
    fn save_load() {
        let pool = pool("save_load");
        shared::save_load(&mut *pool.get().expect("conn"))
    }

    #[test]
    #[ignore]
    fn should_update_on_overwrite() {
        let pool = pool("should_update_on_overwrite");
        shared::should_update_on_overwrite(&mut *pool.get().expect("conn"))
    }

    #[test]
    #[ignore]
    fn should_fail_on_overwrite_with_new() {
        let pool = pool("should_fail_on_overwrite_with_new");
        shared::should_fail_on_overwrite_with_new(&mut *pool.get().expect("conn"))
    }

    #[test]
    #[ignore]
    fn should_fail_on_overwrite_with_bogus_version() {
        let pool = pool("should_fail_on_overwrite_with_bogus_version");
        shared::should_fail_on_overwrite_with_bogus_version(&mut *pool.get().expect("conn"))
    }

    #[test]
    #[ignore]
    fn should_roll_back_on_error() {
        let pool = pool("should_roll_back_on_error");
        shared::should_roll_back_on_error(&mut *pool.get().expect("conn"))
    }

    #[test]
    #[ignore]
    fn should_delete_with_current_version() {
        let pool = pool("should_delete_with_current_version");
        shared::should_delete_with_current_version(&mut *pool.get().expect("conn"))
    }

    #[test]
    #[ignore]
    fn should_scan_by_containment() {
        let pool = pool("should_scan_by_containment");
        shared::should_scan_by_containment(&mut *pool.get().expect("conn"))
    }

    #[test]
    #[ignore]
    fn serialization_failures_are_concurrency_errors() {
        let pool = pool("serialization_failures_are_concurrency_errors");
        let mut doc = named(&IdGen::new(), "contended");
        pool.get()
            .expect("conn")
            .transaction(|s| s.save(&mut doc))
            .expect("save");

        let both_loaded = Arc::new(Barrier::new(2));
        let writers = ["left", "right"]
            .iter()
            .map(|&name| {
                let pool = pool.clone();
                let both_loaded = both_loaded.clone();
                let id = doc.meta.id;
                thread::spawn(move || {
                    let mut conn = pool.get().expect("conn");
                    conn.transaction(|s| {
                        let mut doc = s
                            .load::<ADocument>(&id)?
                            .ok_or_else(|| anyhow!("missing {}", id))?;
                        both_loaded.wait();
                        doc.name = name.to_string();
                        s.save(&mut doc)
                    })
                })
            })
            .collect::<Vec<_>>();
        let outcomes = writers
            .into_iter()
            .map(|w| w.join().expect("writer"))
            .collect::<Vec<_>>();

        assert_eq!(outcomes.iter().filter(|o| o.is_ok()).count(), 1);
        let loser = outcomes
            .into_iter()
            .find_map(Result::err)
            .expect("one writer loses");
        assert_eq!(
            loser.downcast_ref::<ConcurrencyError>(),
            Some(&ConcurrencyError),
            "{:?}",
            loser
        );
    }
}
