use crate::error::{Error, Result};
use sea_orm::DbErr;
use std::future::Future;
use std::time::Duration;

/// Runs one tracking operation under `timeout`.
///
/// Store failures raised inside pick up `operation` and `guild_id`; an expired timeout is
/// reported as [`Error::StoreUnavailable`] so callers handle it like any other transient
/// store failure.
pub async fn bounded<T, F>(
    operation: &'static str,
    guild_id: Option<u64>,
    timeout: Duration,
    fut: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(res) => res.map_err(|e| e.in_operation(operation, guild_id)),
        Err(_) => {
            tracing::error!(operation, ?guild_id, ?timeout, "Store operation timed out");
            Err(Error::StoreUnavailable {
                operation,
                guild_id,
                source: DbErr::Custom(format!("timed out after {timeout:?}")),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn slow_operations_are_reported_as_store_unavailable() {
        let res: Result<()> = bounded("slow", Some(7), Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        match res {
            Err(Error::StoreUnavailable {
                operation,
                guild_id,
                ..
            }) => {
                assert_eq!(operation, "slow");
                assert_eq!(guild_id, Some(7));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn errors_pass_through_with_context() {
        let res: Result<()> = bounded("member_leave", Some(3), Duration::from_secs(1), async {
            Err(DbErr::Custom("gone".into()).into())
        })
        .await;

        let err = res.unwrap_err();
        assert!(err.to_string().contains("member_leave"));
    }
}
