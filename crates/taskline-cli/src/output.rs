//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use serde::Serialize;

use taskline_core::{Importance, Item, RemoteError, StorageError};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn is_quiet(&self) -> bool {
        matches!(self.format, OutputFormat::Quiet)
    }

    pub fn is_json(&self) -> bool {
        matches!(self.format, OutputFormat::Json)
    }

    /// Print a single item with all its fields
    pub fn print_item(&self, item: &Item) {
        match self.format {
            OutputFormat::Human => {
                println!("ID:         {}", item.id);
                println!("Text:       {}", item.text);
                println!("Importance: {}", item.importance);
                println!("Done:       {}", if item.done { "yes" } else { "no" });
                if let Some(due) = item.due {
                    println!("Due:        {}", due.format("%Y-%m-%d"));
                }
                if let Some(ref color) = item.color {
                    println!("Color:      {}", color);
                }
                println!("Created:    {}", item.created_at.format("%Y-%m-%d %H:%M"));
                if let Some(changed) = item.changed_at {
                    println!("Changed:    {}", changed.format("%Y-%m-%d %H:%M"));
                }
                if let Some(ref by) = item.last_updated_by {
                    println!("Changed by: {}", by);
                }
            }
            OutputFormat::Json => print_json(item),
            OutputFormat::Quiet => {
                println!("{}", item.id);
            }
        }
    }

    /// Print a list of items, one per line
    pub fn print_items(&self, items: &[Item], completed: usize) {
        match self.format {
            OutputFormat::Human => {
                if items.is_empty() {
                    println!("No items.");
                    return;
                }
                for item in items {
                    let due = item
                        .due
                        .map(|d| format!(" (due {})", d.format("%Y-%m-%d")))
                        .unwrap_or_default();
                    println!(
                        "{} {} {}{}{}",
                        short_id(&item.id),
                        if item.done { "[x]" } else { "[ ]" },
                        importance_marker(item.importance),
                        truncate(&item.text, 50),
                        due
                    );
                }
                println!("\n{} item(s), {} done", items.len(), completed);
            }
            OutputFormat::Json => print_json(items),
            OutputFormat::Quiet => {
                for item in items {
                    println!("{}", item.id);
                }
            }
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print a warning to stderr (suppressed in quiet mode)
    pub fn warn(&self, message: &str) {
        if !self.is_quiet() {
            eprintln!("⚠ {}", message);
        }
    }

    /// Check if we should prompt for confirmation
    pub fn should_prompt(&self) -> bool {
        self.format == OutputFormat::Human
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Failed to encode JSON: {}", e),
    }
}

fn importance_marker(importance: Importance) -> &'static str {
    match importance {
        Importance::Important => "!! ",
        Importance::Low => "↓ ",
        Importance::Basic => "",
    }
}

/// Warning for a write that stayed local, naming what went wrong
pub fn sync_warning(failure: Option<&RemoteError>) -> String {
    const QUEUED: &str = "Change saved locally and will be sent on next sync";
    match failure {
        Some(RemoteError::TransportFailed(reason)) => {
            format!("Server unreachable ({}). {}", reason, QUEUED)
        }
        Some(error) => format!("Not synced: {}. {}", error, QUEUED),
        // This write went through, but earlier offline changes did not
        None => "Earlier changes have not reached the server yet; they will be sent on next sync"
            .to_string(),
    }
}

/// Append the remote failure, when one is known
pub fn with_cause(message: &str, failure: Option<&RemoteError>) -> String {
    match failure {
        Some(error) => format!("{} ({})", message, error),
        None => message.to_string(),
    }
}

/// What the user can do about a storage failure anywhere in the chain
pub fn recovery_hint(error: &anyhow::Error) -> Option<&'static str> {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<StorageError>())
        .and_then(StorageError::recovery_hint)
}

/// First eight characters of an id
pub fn short_id(id: &str) -> &str {
    match id.char_indices().nth(8) {
        Some((end, _)) => &id[..end],
        None => id,
    }
}

/// Truncate a string to max length, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len - 3).collect();
        format!("{}...", kept)
    }
}
