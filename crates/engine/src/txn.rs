use stepwise_storage::ProcessStorage;

use crate::error::EngineError;

/// Finish a unit of work: commit on success, abort on failure.
///
/// Every engine operation opens one snapshot, runs its reads and writes
/// against it, and hands the outcome here. A failed commit surfaces as an
/// error; a failed abort is logged and the original error wins.
pub(crate) async fn settle<S, T>(
    storage: &S,
    snapshot: S::Snapshot,
    result: Result<T, EngineError>,
) -> Result<T, EngineError>
where
    S: ProcessStorage,
{
    match result {
        Ok(value) => {
            storage.commit_snapshot(snapshot).await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(abort) = storage.abort_snapshot(snapshot).await {
                tracing::warn!(error = %abort, "abort after failed operation also failed");
            }
            Err(e)
        }
    }
}
