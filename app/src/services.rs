use anyhow::Result;
use r2d2::{ManageConnection, Pool};

use infra::persistence::{Session, Storage};

pub trait Request {
    type Resp;
}

pub trait Queryable<Req>
where
    Req: Request,
{
    fn query(&self, req: Req) -> Result<Req::Resp>;
}

pub trait Commandable<Req>
where
    Req: Request,
{
    fn execute(&self, req: Req) -> Result<Req::Resp>;
}

/// Checks out a connection and runs `f` as one unit of work on it.
pub(crate) fn transact<M, D, R, F>(db: &Pool<M>, f: F) -> Result<R>
where
    M: ManageConnection<Connection = D>,
    D: Storage + Send + 'static,
    F: FnOnce(&Session<'_>) -> Result<R>,
{
    let mut conn = db.get()?;
    conn.transaction(f)
}

/// A window onto a larger, ordered result set.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
}

pub const DEFAULT_PAGE_SIZE: usize = 50;

impl<T> Page<T> {
    pub(crate) fn of(all: Vec<T>, offset: usize, limit: Option<usize>) -> Self {
        let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE);
        let total = all.len();
        let items = all.into_iter().skip(offset).take(limit).collect();
        Page {
            items,
            total,
            offset,
            limit,
        }
    }
}
