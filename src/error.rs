use sea_orm::DbErr;
use thiserror::Error;

/// Failures surfaced by the tracking core.
///
/// Every variant carries enough context (operation, guild, member) for the caller to log or
/// alert. Ambiguous invite matches are not errors; see
/// [`JoinMatch`](crate::modules::invite_tracking::tracking::JoinMatch).
#[derive(Debug, Error)]
pub enum Error {
    #[error("{what} {id} not found")]
    NotFound { what: &'static str, id: String },

    #[error("{field} is out of range: {value}")]
    OutOfRange { field: &'static str, value: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("store unavailable during {operation} (guild {guild_id:?}): {source}")]
    StoreUnavailable {
        operation: &'static str,
        guild_id: Option<u64>,
        #[source]
        source: DbErr,
    },

    #[error("scheduled action {action_id} ({action_type}) failed: {source}")]
    HandlerFailed {
        action_id: i32,
        action_type: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("{operation} failed at the platform: {source}")]
    Collaborator {
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<DbErr> for Error {
    fn from(source: DbErr) -> Self {
        Error::StoreUnavailable {
            operation: "query",
            guild_id: None,
            source,
        }
    }
}

impl Error {
    /// Whether the caller should retry with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::StoreUnavailable { .. } | Error::Collaborator { .. }
        )
    }

    pub fn not_found(what: &'static str, id: impl ToString) -> Self {
        Error::NotFound {
            what,
            id: id.to_string(),
        }
    }

    /// Attaches the operation name and guild to store failures that were raised without them.
    pub fn in_operation(self, operation: &'static str, guild_id: Option<u64>) -> Self {
        match self {
            Error::StoreUnavailable {
                operation: "query",
                guild_id: None,
                source,
            } => Error::StoreUnavailable {
                operation,
                guild_id,
                source,
            },
            other => other,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_pick_up_operation_context() {
        let err: Error = DbErr::Custom("connection reset".into()).into();
        let err = err.in_operation("member_join", Some(42));

        match &err {
            Error::StoreUnavailable {
                operation,
                guild_id,
                ..
            } => {
                assert_eq!(*operation, "member_join");
                assert_eq!(*guild_id, Some(42));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.is_transient());
    }

    #[test]
    fn context_is_not_overwritten() {
        let err = Error::StoreUnavailable {
            operation: "recompute_leaves",
            guild_id: Some(1),
            source: DbErr::Custom("boom".into()),
        }
        .in_operation("member_leave", Some(2));

        assert!(err.to_string().contains("recompute_leaves"));
    }

    #[test]
    fn out_of_range_is_not_transient() {
        let err = Error::OutOfRange {
            field: "amount",
            value: "1e30".into(),
        };
        assert!(!err.is_transient());
    }
}
