//! Tenant and branch scoping. Every document carries a `Scope`, and every
//! lookup goes through the helpers here so that documents belonging to
//! another tenant look exactly like missing ones.

use anyhow::Result;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};

use infra::ids::{Entity, Id};
use infra::persistence::Session;

use crate::error::ServiceError;

/// Marker for tenant ids; tenants themselves are provisioned elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tenant {}

/// Marker for branch ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Branch {}

impl Entity for Tenant {
    const PREFIX: &'static str = "tenant";
}

impl Entity for Branch {
    const PREFIX: &'static str = "branch";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    pub tenant: Id<Tenant>,
    pub branch: Id<Branch>,
}

pub trait Scoped {
    fn scope(&self) -> &Scope;
}

impl Scope {
    pub fn new(tenant: Id<Tenant>, branch: Id<Branch>) -> Self {
        Scope { tenant, branch }
    }

    /// Scan filter matching documents of exactly this tenant and branch.
    pub fn filter(&self) -> Value {
        json!({ "scope": self })
    }
}

/// Scan filter for a tenant, optionally narrowed to one branch.
pub fn tenant_filter(tenant: Id<Tenant>, branch: Option<Id<Branch>>) -> Value {
    match branch {
        Some(branch) => Scope::new(tenant, branch).filter(),
        None => json!({ "scope": { "tenant": tenant } }),
    }
}

/// Loads `id`, failing with `NotFound` if it is absent or outside `scope`.
pub fn load_in_scope<D>(session: &Session<'_>, scope: &Scope, id: &Id<D>) -> Result<D>
where
    D: DeserializeOwned + Entity + Scoped,
{
    match session.load(id)? {
        Some(doc) if Scoped::scope(&doc) == scope => Ok(doc),
        _ => Err(ServiceError::not_found(id).into()),
    }
}

/// Loads `id` from any branch of `tenant`.
pub fn load_in_tenant<D>(session: &Session<'_>, tenant: Id<Tenant>, id: &Id<D>) -> Result<D>
where
    D: DeserializeOwned + Entity + Scoped,
{
    match session.load(id)? {
        Some(doc) if Scoped::scope(&doc).tenant == tenant => Ok(doc),
        _ => Err(ServiceError::not_found(id).into()),
    }
}
