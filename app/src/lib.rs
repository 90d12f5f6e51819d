use anyhow::{Context, Result};
use log::*;
use r2d2::{ManageConnection, Pool};

use infra::ids::IdGen;
use infra::persistence::postgres::DocumentConnectionManager;
use infra::persistence::Storage;

pub mod approvals;
pub mod config;
pub mod error;
pub mod inventory;
pub mod production;
pub mod recipes;
pub mod services;
pub mod tenancy;
pub mod waste;

#[cfg(test)]
mod test;

pub use crate::error::ServiceError;
pub use crate::services::{Commandable, Page, Queryable, Request};
pub use crate::tenancy::{Branch, Scope, Tenant};

/// The kitchen back office: one pool and one id generator shared by every
/// service.
#[derive(Debug)]
pub struct Rustaurant<M: ManageConnection> {
    db: Pool<M>,
    idgen: IdGen,
}

impl Rustaurant<DocumentConnectionManager> {
    pub fn new(config: &config::Config) -> Result<Self> {
        let db = config.db.build()?;
        Ok(Rustaurant::with_pool(db))
    }
}

impl<M: ManageConnection<Connection = D>, D: Storage + Send + 'static> Rustaurant<M> {
    pub fn with_pool(db: Pool<M>) -> Self {
        Rustaurant {
            db,
            idgen: IdGen::new(),
        }
    }

    pub fn setup(&self) -> Result<()> {
        debug!("Init schema");
        self.db
            .get()?
            .setup()
            .context("Setup persistence")?;
        Ok(())
    }

    pub fn idgen(&self) -> &IdGen {
        &self.idgen
    }

    pub fn inventory(&self) -> inventory::Inventory<M> {
        inventory::Inventory::new(self.db.clone(), self.idgen.clone())
    }

    pub fn recipes(&self) -> recipes::Recipes<M> {
        recipes::Recipes::new(self.db.clone(), self.idgen.clone())
    }

    pub fn production(&self) -> production::ProductionEngine<M> {
        production::ProductionEngine::new(self.db.clone(), self.idgen.clone())
    }

    pub fn waste(&self) -> waste::WasteLogs<M> {
        waste::WasteLogs::new(self.db.clone(), self.idgen.clone())
    }

    pub fn approvals(&self) -> approvals::Approvals<M> {
        approvals::Approvals::new(self.db.clone(), self.idgen.clone())
    }
}
