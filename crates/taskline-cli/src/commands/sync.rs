//! Sync command handlers

use anyhow::Result;

use taskline_core::{CancelToken, PatchOutcome, ReconciliationStore, SyncStatus};

use crate::output::{with_cause, Output};

/// Replace the local list with the server's
pub async fn load(store: &ReconciliationStore, output: &Output) -> Result<()> {
    output.message("Fetching list from server...");

    let cancel = cancel_on_ctrl_c();
    let status = store.load_cancellable(&cancel).await?;

    if cancel.is_cancelled() {
        output.message("Sync cancelled.");
        return Ok(());
    }

    match status {
        SyncStatus::Clean => {
            let items = store.items().await;
            output.success(&format!("Sync complete - {} item(s)", items.len()));
        }
        SyncStatus::Dirty => {
            output.warn(&with_cause(
                "Sync failed; local list kept and marked for repair",
                store.last_failure().as_ref(),
            ));
        }
    }
    Ok(())
}

/// Push the local list to the server
pub async fn patch(store: &ReconciliationStore, force: bool, output: &Output) -> Result<()> {
    let outcome = if force {
        store.force_patch().await?
    } else {
        store.patch_cancellable(&cancel_on_ctrl_c()).await?
    };

    match outcome {
        PatchOutcome::NotNeeded => output.success("Already up to date"),
        PatchOutcome::Patched => output.success("Local changes sent to server"),
        PatchOutcome::Failed => output.warn(&with_cause(
            "Patch failed; will retry on next write",
            store.last_failure().as_ref(),
        )),
        PatchOutcome::Cancelled => output.message("Patch cancelled."),
    }
    Ok(())
}

/// A token that fires when the user presses Ctrl-C
fn cancel_on_ctrl_c() -> CancelToken {
    let cancel = CancelToken::new();
    let handle = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handle.cancel();
        }
    });
    cancel
}
