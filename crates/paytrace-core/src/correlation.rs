//! Ambient "current action" for implicit parent resolution
//!
//! The current action is a tokio task-local, so it is scoped to one
//! logical call chain and nests strictly: leaving a scope restores whatever
//! was current before. Independent tasks never see each other's value.
//!
//! Task-locals do not cross `tokio::spawn`. Wrap the spawned future in
//! [`propagate`] to carry the caller's current action into the new task.

use std::future::Future;

use paytrace_span::ActionId;

tokio::task_local! {
    static CURRENT_ACTION: ActionId;
}

/// The action currently open in this call chain, if any.
pub fn current() -> Option<ActionId> {
    CURRENT_ACTION.try_with(|id| *id).ok()
}

/// Run `fut` with `id` as the current action.
pub async fn scope<F>(id: ActionId, fut: F) -> F::Output
where
    F: Future,
{
    CURRENT_ACTION.scope(id, fut).await
}

/// Run `f` synchronously with `id` as the current action.
pub fn sync_scope<R>(id: ActionId, f: impl FnOnce() -> R) -> R {
    CURRENT_ACTION.sync_scope(id, f)
}

/// Capture the caller's current action (if any) so that `fut` sees it too,
/// typically before handing `fut` to `tokio::spawn`.
pub fn propagate<F>(fut: F) -> impl Future<Output = F::Output>
where
    F: Future,
{
    let captured = current();
    async move {
        match captured {
            Some(id) => CURRENT_ACTION.scope(id, fut).await,
            None => fut.await,
        }
    }
}
