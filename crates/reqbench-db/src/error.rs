use reqbench_core::HarnessError;
use thiserror::Error;

/// Errors surfaced by [`Store`](crate::Store) implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} `{id}` not found")]
    NotFound { entity: &'static str, id: String },

    #[error("{0}")]
    Conflict(String),

    /// Delete refused because dependent rows exist and force was not set.
    #[error("{entity} `{id}` has {children} dependent row(s)")]
    HasChildren {
        entity: &'static str,
        id: String,
        children: u64,
    },

    #[error("invalid input: {0}")]
    Invalid(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("store is closed")]
    Closed,

    #[error("transaction was rolled back during cleanup")]
    RolledBack,
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }

    /// Stable code used in API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::Conflict(_) | Self::HasChildren { .. } => "conflict",
            Self::Invalid(_) => "invalid_input",
            Self::Database(_) | Self::Migrate(_) | Self::Closed | Self::RolledBack => "internal",
        }
    }
}

impl From<StoreError> for HarnessError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Migrate(_) => HarnessError::Provision(err.to_string()),
            StoreError::Database(sqlx::Error::PoolTimedOut)
            | StoreError::Database(sqlx::Error::Io(_)) => HarnessError::TransientTransport {
                message: err.to_string(),
                during_connect: true,
            },
            other => HarnessError::Database(other.to_string()),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Maps unique and foreign-key violations onto domain errors.
pub(crate) fn map_sqlx_error(entity: &'static str, id: impl ToString, err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        match db_err.code().as_deref() {
            Some("23505") => {
                return StoreError::Conflict(format!("{entity} `{}` already exists", id.to_string()))
            }
            Some("23503") => {
                return StoreError::invalid(format!(
                    "{entity} references a missing row: {}",
                    db_err.message()
                ))
            }
            _ => {}
        }
    }
    match err {
        sqlx::Error::RowNotFound => StoreError::not_found(entity, id),
        other => StoreError::Database(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqbench_core::ErrorKind;

    #[test]
    fn test_codes() {
        assert_eq!(StoreError::not_found("epic", "x").code(), "not_found");
        assert_eq!(StoreError::Conflict("dup".into()).code(), "conflict");
        assert_eq!(
            StoreError::HasChildren {
                entity: "epic",
                id: "x".into(),
                children: 2
            }
            .code(),
            "conflict"
        );
    }

    #[test]
    fn test_pool_timeout_is_retryable() {
        let err: HarnessError = StoreError::Database(sqlx::Error::PoolTimedOut).into();
        assert!(err.is_retryable());

        let err: HarnessError = StoreError::invalid("bad").into();
        assert_eq!(err.kind(), ErrorKind::Infrastructure);
    }

    #[test]
    fn test_row_not_found_maps_to_not_found() {
        let err = map_sqlx_error("epic", "abc", sqlx::Error::RowNotFound);
        assert!(matches!(err, StoreError::NotFound { entity: "epic", .. }));
    }
}
