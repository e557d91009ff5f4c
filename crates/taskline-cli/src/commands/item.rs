//! Item command handlers

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use clap::Args;

use taskline_core::{Importance, Item, ItemQuery, ReconciliationStore, SortKey, SortOrder};

use crate::output::{short_id, sync_warning, Output};

#[derive(Args)]
pub struct ListArgs {
    /// Hide completed items
    #[arg(long)]
    hide_done: bool,
    /// Sort by "created" or "importance"
    #[arg(short, long, default_value = "created")]
    sort: SortKey,
    /// Sort descending
    #[arg(long)]
    desc: bool,
}

#[derive(Args)]
pub struct AddArgs {
    /// Item text
    text: String,
    /// low, basic or important
    #[arg(short, long)]
    importance: Option<Importance>,
    /// Due date (YYYY-MM-DD or RFC 3339)
    #[arg(short, long, value_parser = parse_due)]
    due: Option<DateTime<Utc>>,
    /// Color tag, e.g. #FF0000
    #[arg(short, long)]
    color: Option<String>,
}

#[derive(Args)]
pub struct EditArgs {
    /// Item ID (full ID or prefix)
    id: String,
    /// New text
    #[arg(short, long)]
    text: Option<String>,
    /// low, basic or important
    #[arg(short, long)]
    importance: Option<Importance>,
    /// Due date (YYYY-MM-DD or RFC 3339), or "none" to clear
    #[arg(short, long)]
    due: Option<String>,
    /// Color tag, or "none" to clear
    #[arg(short, long)]
    color: Option<String>,
}

/// List items from the local cache
pub async fn list(store: &ReconciliationStore, args: ListArgs, output: &Output) -> Result<()> {
    let order = if args.desc {
        SortOrder::Descending
    } else {
        SortOrder::Ascending
    };
    let mut query = ItemQuery::default().sorted_by(args.sort, order);
    if args.hide_done {
        query = query.hide_completed();
    }

    let items = store.fetch(&query).await?;
    output.print_items(&items, store.completed_count().await);
    Ok(())
}

/// Create a new item
pub async fn add(
    store: &ReconciliationStore,
    args: AddArgs,
    device: Option<&str>,
    output: &Output,
) -> Result<()> {
    let mut item = Item::new(args.text);
    if let Some(importance) = args.importance {
        item = item.with_importance(importance);
    }
    if let Some(due) = args.due {
        item = item.with_due(due);
    }
    if let Some(color) = args.color {
        item = item.with_color(color);
    }
    if let Some(device) = device {
        item.last_updated_by = Some(device.to_string());
    }

    store.add(item.clone()).await.context("Failed to add item")?;
    report_sync(store, output).await;

    output.success(&format!("Added item: {}", item.id));
    if !output.is_quiet() {
        output.print_item(&item);
    }
    Ok(())
}

/// Show a single item
pub async fn show(store: &ReconciliationStore, id: &str, output: &Output) -> Result<()> {
    let item = resolve_item(store, id).await?;
    output.print_item(&item);
    Ok(())
}

/// Flip an item's completion flag
pub async fn toggle(
    store: &ReconciliationStore,
    id: &str,
    device: Option<&str>,
    output: &Output,
) -> Result<()> {
    let mut item = resolve_item(store, id).await?;
    item.toggle_completed();
    let item = item.edited(device);

    store
        .add_or_update(item.clone())
        .await
        .context("Failed to update item")?;
    report_sync(store, output).await;

    let state = if item.done { "done" } else { "not done" };
    output.success(&format!("Marked {} as {}", short_id(&item.id), state));
    Ok(())
}

/// Change the given fields of an item
pub async fn edit(
    store: &ReconciliationStore,
    args: EditArgs,
    device: Option<&str>,
    output: &Output,
) -> Result<()> {
    let mut item = resolve_item(store, &args.id).await?;

    if let Some(text) = args.text {
        item.text = text;
    }
    if let Some(importance) = args.importance {
        item.importance = importance;
    }
    if let Some(due) = args.due {
        item.due = if due == "none" {
            None
        } else {
            Some(parse_due(&due).map_err(anyhow::Error::msg)?)
        };
    }
    if let Some(color) = args.color {
        item.color = if color == "none" { None } else { Some(color) };
    }
    let item = item.edited(device);

    store
        .add_or_update(item.clone())
        .await
        .context("Failed to update item")?;
    report_sync(store, output).await;

    output.success("Item updated");
    if !output.is_quiet() {
        output.print_item(&item);
    }
    Ok(())
}

/// Delete an item
pub async fn delete(
    store: &ReconciliationStore,
    id: &str,
    yes: bool,
    output: &Output,
) -> Result<()> {
    let item = resolve_item(store, id).await?;

    if output.should_prompt() && !yes {
        println!("Delete item: {} - {}", short_id(&item.id), item.text);
        if !confirm("Are you sure?")? {
            println!("Cancelled.");
            return Ok(());
        }
    }

    store
        .delete(&item.id)
        .await
        .context("Failed to delete item")?;
    report_sync(store, output).await;

    output.success(&format!("Deleted item: {}", item.id));
    Ok(())
}

/// Tell the user when a write stayed local, and why
async fn report_sync(store: &ReconciliationStore, output: &Output) {
    if store.is_dirty().await {
        output.warn(&sync_warning(store.last_failure().as_ref()));
    }
}

/// Find an item by full ID or unique prefix
async fn resolve_item(store: &ReconciliationStore, id: &str) -> Result<Item> {
    if let Some(item) = store.get(id).await {
        return Ok(item);
    }

    let items = store.items().await;
    let matches: Vec<_> = items.iter().filter(|i| i.id.starts_with(id)).collect();

    match matches.len() {
        0 => bail!("No item found matching: {}", id),
        1 => Ok(matches[0].clone()),
        _ => {
            eprintln!("Multiple items match '{}':", id);
            for item in &matches {
                eprintln!("  {} - {}", item.id, item.text);
            }
            bail!("Ambiguous ID. Please provide more characters.");
        }
    }
}

fn parse_due(value: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(instant) = DateTime::parse_from_rfc3339(value) {
        return Ok(instant.with_timezone(&Utc));
    }

    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|e| format!("invalid date '{}': {}", value, e))?;
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| format!("invalid date '{}'", value))?;
    Ok(Utc.from_utc_datetime(&midnight))
}

/// Ask a yes/no question on stdin
fn confirm(prompt: &str) -> Result<bool> {
    use std::io::{self, Write};

    print!("{} [y/N]: ", prompt);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(matches!(input.trim().to_lowercase().as_str(), "y" | "yes"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    #[test]
    fn test_parse_due() {
        let due = parse_due("2024-03-15").unwrap();
        assert_eq!((due.year(), due.month(), due.day()), (2024, 3, 15));
        assert!(parse_due("15/03/2024").is_err());

        let due = parse_due("2024-03-15T10:30:00+02:00").unwrap();
        assert_eq!(due.to_rfc3339(), "2024-03-15T08:30:00+00:00");
    }
}
