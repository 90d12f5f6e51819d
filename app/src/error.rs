use std::fmt;

use err_derive::Error;
use serde::{Deserialize, Serialize};

use infra::ids::{Entity, Id};

/// Business-rule failures. Services return these wrapped in `anyhow::Error`;
/// callers recover them with `downcast_ref::<ServiceError>()`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ServiceError {
    #[error(display = "{} not found: {}", kind, id)]
    NotFound { kind: &'static str, id: String },
    #[error(display = "insufficient {}: short by {}", item, shortfall)]
    InsufficientInventory { item: String, shortfall: f64 },
    #[error(display = "cannot produce; missing {}", _0)]
    CannotProduce(Shortages),
    #[error(display = "approval request {} has already been reviewed", _0)]
    AlreadyReviewed(String),
    #[error(display = "invalid request: {}", _0)]
    Validation(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shortage {
    pub ingredient_name: String,
    pub category: String,
    pub unit: String,
    pub required: f64,
    pub available: f64,
    pub shortage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shortages(pub Vec<Shortage>);

impl ServiceError {
    pub fn not_found<T: Entity>(id: &Id<T>) -> Self {
        ServiceError::NotFound {
            kind: T::PREFIX,
            id: id.to_string(),
        }
    }

    pub fn invalid<S: Into<String>>(msg: S) -> Self {
        ServiceError::Validation(msg.into())
    }
}

/// Fails with `ServiceError::Validation` unless `cond` holds.
pub(crate) fn ensure(cond: bool, msg: &str) -> Result<(), ServiceError> {
    if cond {
        Ok(())
    } else {
        Err(ServiceError::invalid(msg))
    }
}

impl fmt::Display for Shortage {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(
            fmt,
            "{} ({}): need {} {}, have {}, short {}",
            self.ingredient_name,
            self.category,
            self.required,
            self.unit,
            self.available,
            self.shortage
        )
    }
}

impl fmt::Display for Shortages {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        for (i, shortage) in self.0.iter().enumerate() {
            if i > 0 {
                fmt.write_str("; ")?;
            }
            write!(fmt, "{}", shortage)?;
        }
        Ok(())
    }
}
