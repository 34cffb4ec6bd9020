use sea_orm::error::DbErr;
use serde::Serialize;
use uuid::Uuid;

use crate::costing::CostingError;

#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(
        #[from]
        #[serde(skip)]
        DbErr,
    ),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Costing error: {0}")]
    CostingError(#[from] CostingError),

    #[error("Event error: {0}")]
    EventError(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Concurrent modification: {0}")]
    ConcurrentModification(Uuid),

    #[error("Lock contention not resolved after {attempts} attempts: {message}")]
    LockContention { attempts: u32, message: String },

    #[error("Other error: {0}")]
    Other(
        #[from]
        #[serde(skip)]
        anyhow::Error,
    ),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

pub trait IntoDbErr {
    fn into_db_err(self) -> DbErr;
}

impl IntoDbErr for DbErr {
    fn into_db_err(self) -> DbErr {
        self
    }
}

impl IntoDbErr for String {
    fn into_db_err(self) -> DbErr {
        DbErr::Custom(self)
    }
}

impl IntoDbErr for &str {
    fn into_db_err(self) -> DbErr {
        DbErr::Custom(self.to_string())
    }
}

impl ServiceError {
    /// Generic constructor that normalizes any supported database error input.
    pub fn db_error<E: IntoDbErr>(error: E) -> Self {
        ServiceError::DatabaseError(error.into_db_err())
    }

    /// True for transient contention errors that warrant retrying the whole
    /// mutation transaction. Lock waits and deadlocks only; constraint
    /// violations and connection failures are not retriable.
    pub fn is_lock_contention(&self) -> bool {
        match self {
            ServiceError::DatabaseError(db_err) => {
                let msg = db_err.to_string().to_lowercase();
                msg.contains("deadlock")
                    || msg.contains("lock timeout")
                    || msg.contains("could not obtain lock")
                    || msg.contains("database is locked")
                    || msg.contains("database table is locked")
            }
            ServiceError::LockContention { .. } => true,
            _ => false,
        }
    }
}
