//! Step engine — drives one step of one node through
//! `Pending → InProgress → Complete | Error`, persisting each transition.
//!
//! The engine has no timeouts or retries of its own; an action bounds itself
//! (usually through the remote executor's timeout).

use std::future::Future;

use anyhow::Result;

use super::state::StateHolder;

/// Run `action` as step `step` of `node`. The action's string becomes the
/// step output; on failure the error chain is recorded and returned.
pub async fn run_step<F>(state: &StateHolder, node: &str, step: usize, action: F) -> Result<()>
where
    F: Future<Output = Result<String>>,
{
    state.update(|s| s.start_step(node, step)).await;

    match action.await {
        Ok(output) => {
            state.update(|s| s.finish_step(node, step, output)).await;
            Ok(())
        }
        Err(e) => {
            let message = format!("{e:#}");
            state.update(|s| s.fail_step(node, step, message)).await;
            Err(e)
        }
    }
}
