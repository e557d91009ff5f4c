//! Status command handler

use anyhow::Result;

use taskline_core::{Config, ReconciliationStore};

use crate::output::{Output, OutputFormat};

/// Show sync status and counts
pub async fn show(store: &ReconciliationStore, config: &Config, output: &Output) -> Result<()> {
    let status = store.status().await;
    let last_synced = store.last_synced_at().await;
    let revision = store.gateway().revision().await;
    let total = store.items().await.len();
    let completed = store.completed_count().await;

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "status": status,
                    "last_synced_at": last_synced.map(|t| t.to_rfc3339()),
                    "revision": revision,
                    "server": config.api_url,
                    "storage": config.storage.to_string(),
                    "counts": {
                        "items": total,
                        "completed": completed
                    }
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", status);
        }
        OutputFormat::Human => {
            println!("Taskline Status");
            println!("===============");
            println!();
            println!("Sync:");
            println!("  Status:      {}", status);
            println!(
                "  Last synced: {}",
                last_synced
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "never".to_string())
            );
            println!("  Server:      {}", config.api_url);
            println!();
            println!("Storage:");
            println!("  Backend:  {}", config.storage);
            println!("  Location: {}", config.data_dir.display());
            println!();
            println!("Contents:");
            println!("  Items:     {}", total);
            println!("  Completed: {}", completed);
        }
    }

    Ok(())
}
