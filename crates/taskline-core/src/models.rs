//! Data models for Taskline
//!
//! Defines the synchronized unit (`Item`), its importance level, and the
//! query type used to filter and sort a local collection.
//!
//! The serde representation of `Item` is the REST wire encoding:
//! `id, text, importance, deadline, done, color, created_at, changed_at,
//! last_updated_by`, with instants as seconds since the epoch. Local file
//! formats use their own record types (see `storage::codec`).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Importance level of an item, ordered low < basic < important
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Importance {
    Low,
    #[default]
    Basic,
    Important,
}

impl Importance {
    /// Name used on the wire and in local files
    pub fn as_str(&self) -> &'static str {
        match self {
            Importance::Low => "low",
            Importance::Basic => "basic",
            Importance::Important => "important",
        }
    }

    /// Parse a stored name, falling back to `Basic` for anything unknown
    pub fn parse_lenient(value: &str) -> Self {
        value.parse().unwrap_or_default()
    }

    pub fn is_basic(&self) -> bool {
        matches!(self, Importance::Basic)
    }
}

impl fmt::Display for Importance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Importance {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Importance::Low),
            "basic" | "normal" => Ok(Importance::Basic),
            "important" | "high" => Ok(Importance::Important),
            other => Err(format!("unknown importance: {}", other)),
        }
    }
}

/// A task list item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Globally unique identifier, immutable once created
    pub id: String,
    /// Free-text body
    pub text: String,
    #[serde(default)]
    pub importance: Importance,
    /// Optional due instant
    #[serde(
        rename = "deadline",
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_seconds_option"
    )]
    pub due: Option<DateTime<Utc>>,
    pub done: bool,
    /// Optional color tag (hex string)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub created_at: DateTime<Utc>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_seconds_option"
    )]
    pub changed_at: Option<DateTime<Utc>>,
    /// Device or client that produced the current revision of this item
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated_by: Option<String>,
}

impl Item {
    /// Create a new item with a random ID
    pub fn new(text: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), text)
    }

    /// Create an item with a specific ID
    pub fn with_id(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            importance: Importance::Basic,
            due: None,
            done: false,
            color: None,
            created_at: whole_seconds(Utc::now()),
            changed_at: None,
            last_updated_by: None,
        }
    }

    pub fn with_importance(mut self, importance: Importance) -> Self {
        self.importance = importance;
        self
    }

    pub fn with_due(mut self, due: DateTime<Utc>) -> Self {
        self.due = Some(whole_seconds(due));
        self
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = whole_seconds(created_at);
        self
    }

    pub fn completed(mut self, done: bool) -> Self {
        self.done = done;
        self
    }

    /// Stamp the edit time and the writer of this revision
    pub fn edited(mut self, by: Option<&str>) -> Self {
        self.changed_at = Some(whole_seconds(Utc::now()));
        if let Some(by) = by {
            self.last_updated_by = Some(by.to_string());
        }
        self
    }

    /// Flip the completion flag
    pub fn toggle_completed(&mut self) {
        self.done = !self.done;
        self.changed_at = Some(whole_seconds(Utc::now()));
    }
}

/// Drop the sub-second part; every persisted format stores whole seconds
pub fn whole_seconds(instant: DateTime<Utc>) -> DateTime<Utc> {
    instant.trunc_subsecs(0)
}

/// Field an item list is sorted by
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortKey {
    #[default]
    Created,
    Importance,
}

impl FromStr for SortKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" | "date" => Ok(SortKey::Created),
            "importance" => Ok(SortKey::Importance),
            other => Err(format!("unknown sort key: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

/// Filter and ordering applied by `LocalStore::fetch`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemQuery {
    pub include_completed: bool,
    pub sort: SortKey,
    pub order: SortOrder,
}

impl Default for ItemQuery {
    fn default() -> Self {
        Self {
            include_completed: true,
            sort: SortKey::Created,
            order: SortOrder::Ascending,
        }
    }
}

impl ItemQuery {
    pub fn hide_completed(mut self) -> Self {
        self.include_completed = false;
        self
    }

    pub fn sorted_by(mut self, sort: SortKey, order: SortOrder) -> Self {
        self.sort = sort;
        self.order = order;
        self
    }

    /// Evaluate the query in memory
    pub fn apply(&self, items: &[Item]) -> Vec<Item> {
        let mut result: Vec<Item> = items
            .iter()
            .filter(|item| self.include_completed || !item.done)
            .cloned()
            .collect();

        // Stable sort keeps insertion order among equal keys
        match self.sort {
            SortKey::Created => result.sort_by(|a, b| a.created_at.cmp(&b.created_at)),
            SortKey::Importance => result.sort_by(|a, b| a.importance.cmp(&b.importance)),
        }

        if self.order == SortOrder::Descending {
            result.reverse();
        }

        result
    }
}
