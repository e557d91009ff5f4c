//! Local file encodings
//!
//! Two interchangeable formats for a whole collection:
//!
//! - **JSON**: a pretty-printed array of records keyed `id, text,
//!   importance, dueDate, isCompleted, color, dateCreated, dateEdited,
//!   lastUpdatedBy`. `importance` is omitted when it is `basic`.
//! - **CSV**: a header line followed by one quoted row per item, columns
//!   `id, text, importance, dueDate, isCompleted, color, dateCreated,
//!   dateEdited, lastUpdatedBy`. Present values are always quoted; an
//!   absent optional is an unquoted empty field, so `None` and `Some("")`
//!   stay distinct.
//!
//! Instants are stored as whole seconds since the epoch. Records that
//! cannot be turned into an item are skipped with a warning rather than
//! failing the whole load.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::models::{Importance, Item};

/// CSV column names, in file order
pub const CSV_FIELDS: [&str; 9] = [
    "id",
    "text",
    "importance",
    "dueDate",
    "isCompleted",
    "color",
    "dateCreated",
    "dateEdited",
    "lastUpdatedBy",
];

/// Rows written before `lastUpdatedBy` existed have this many columns
const LEGACY_CSV_COLUMNS: usize = 8;

// ==================== JSON ====================

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemRecord {
    id: String,
    text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    importance: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    due_date: Option<i64>,
    is_completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    color: Option<String>,
    date_created: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    date_edited: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_updated_by: Option<String>,
}

impl From<&Item> for ItemRecord {
    fn from(item: &Item) -> Self {
        Self {
            id: item.id.clone(),
            text: item.text.clone(),
            importance: (!item.importance.is_basic()).then(|| item.importance.to_string()),
            due_date: item.due.map(|d| d.timestamp()),
            is_completed: item.done,
            color: item.color.clone(),
            date_created: item.created_at.timestamp(),
            date_edited: item.changed_at.map(|d| d.timestamp()),
            last_updated_by: item.last_updated_by.clone(),
        }
    }
}

impl TryFrom<ItemRecord> for Item {
    type Error = String;

    fn try_from(record: ItemRecord) -> Result<Self, Self::Error> {
        Ok(Item {
            importance: record
                .importance
                .as_deref()
                .map(Importance::parse_lenient)
                .unwrap_or_default(),
            due: record.due_date.map(instant).transpose()?,
            done: record.is_completed,
            color: record.color,
            created_at: instant(record.date_created)?,
            changed_at: record.date_edited.map(instant).transpose()?,
            last_updated_by: record.last_updated_by,
            id: record.id,
            text: record.text,
        })
    }
}

/// Serialize a collection as a pretty-printed JSON record list
pub fn encode_json(items: &[Item]) -> Result<String, serde_json::Error> {
    let records: Vec<ItemRecord> = items.iter().map(ItemRecord::from).collect();
    serde_json::to_string_pretty(&records)
}

/// Parse a JSON record list
///
/// Fails only if the document is not a JSON array; malformed entries are
/// skipped.
pub fn decode_json(data: &str) -> Result<Vec<Item>, String> {
    let values: Vec<serde_json::Value> =
        serde_json::from_str(data).map_err(|e| e.to_string())?;

    let mut items = Vec::with_capacity(values.len());
    for (index, value) in values.into_iter().enumerate() {
        let parsed = serde_json::from_value::<ItemRecord>(value)
            .map_err(|e| e.to_string())
            .and_then(Item::try_from);
        match parsed {
            Ok(item) => items.push(item),
            Err(e) => warn!(index, error = %e, "Skipping malformed JSON record"),
        }
    }
    Ok(items)
}

// ==================== CSV ====================

/// Serialize a collection as a quoted CSV table with a header line
pub fn encode_csv(items: &[Item]) -> String {
    let mut out = header_line();
    for item in items {
        let fields = [
            Some(item.id.clone()),
            Some(item.text.clone()),
            Some(item.importance.to_string()),
            item.due.map(|d| d.timestamp().to_string()),
            Some(item.done.to_string()),
            item.color.clone(),
            Some(item.created_at.timestamp().to_string()),
            item.changed_at.map(|d| d.timestamp().to_string()),
            item.last_updated_by.clone(),
        ];
        let row: Vec<String> = fields.iter().map(|f| quote(f.as_deref())).collect();
        out.push_str(&row.join(","));
        out.push('\n');
    }
    out
}

/// Parse a CSV table produced by `encode_csv`
///
/// The first row is the header. Rows with the wrong number of columns or
/// unparseable values are skipped; an unterminated quote fails the load.
pub fn decode_csv(data: &str) -> Result<Vec<Item>, String> {
    let rows = parse_rows(data)?;

    let mut items = Vec::new();
    for (line, row) in rows.into_iter().enumerate().skip(1) {
        if is_blank(&row) {
            continue;
        }
        match item_from_row(&row) {
            Ok(item) => items.push(item),
            Err(e) => warn!(row = line, error = %e, "Skipping malformed CSV row"),
        }
    }
    Ok(items)
}

fn header_line() -> String {
    let header: Vec<String> = CSV_FIELDS.iter().map(|f| quote(Some(*f))).collect();
    format!("{}\n", header.join(","))
}

fn quote(value: Option<&str>) -> String {
    match value {
        Some(v) => format!("\"{}\"", v.replace('"', "\"\"")),
        None => String::new(),
    }
}

#[derive(Debug, Default)]
struct Field {
    value: String,
    quoted: bool,
}

impl Field {
    fn optional(&self) -> Option<String> {
        (self.quoted || !self.value.is_empty()).then(|| self.value.clone())
    }
}

fn is_blank(row: &[Field]) -> bool {
    row.len() == 1 && !row[0].quoted && row[0].value.is_empty()
}

fn parse_rows(data: &str) -> Result<Vec<Vec<Field>>, String> {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut field = Field::default();
    let mut in_quotes = false;
    let mut at_field_start = true;
    let mut chars = data.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    field.value.push('"');
                } else {
                    in_quotes = false;
                }
            } else {
                field.value.push(c);
            }
            continue;
        }

        match c {
            '"' if at_field_start => {
                in_quotes = true;
                field.quoted = true;
                at_field_start = false;
            }
            '"' => return Err(format!("unexpected quote in row {}", rows.len() + 1)),
            ',' => {
                row.push(std::mem::take(&mut field));
                at_field_start = true;
            }
            '\r' => {}
            '\n' => {
                row.push(std::mem::take(&mut field));
                rows.push(std::mem::take(&mut row));
                at_field_start = true;
            }
            _ => {
                field.value.push(c);
                at_field_start = false;
            }
        }
    }

    if in_quotes {
        return Err("unterminated quoted field".to_string());
    }
    if !at_field_start || !row.is_empty() {
        row.push(field);
        rows.push(row);
    }
    Ok(rows)
}

fn item_from_row(row: &[Field]) -> Result<Item, String> {
    if row.len() != LEGACY_CSV_COLUMNS && row.len() != CSV_FIELDS.len() {
        return Err(format!("expected {} columns, found {}", CSV_FIELDS.len(), row.len()));
    }

    let id = row[0].value.clone();
    if id.is_empty() {
        return Err("missing id".to_string());
    }

    let done = match row[4].value.as_str() {
        "true" | "1" => true,
        "false" | "0" => false,
        other => return Err(format!("invalid isCompleted value: {}", other)),
    };

    Ok(Item {
        id,
        text: row[1].value.clone(),
        importance: Importance::parse_lenient(&row[2].value),
        due: optional_instant(&row[3])?,
        done,
        color: row[5].optional(),
        created_at: parse_instant(&row[6].value)?,
        changed_at: optional_instant(&row[7])?,
        last_updated_by: row.get(8).and_then(Field::optional),
    })
}

fn optional_instant(field: &Field) -> Result<Option<DateTime<Utc>>, String> {
    if field.value.is_empty() {
        return Ok(None);
    }
    parse_instant(&field.value).map(Some)
}

fn parse_instant(value: &str) -> Result<DateTime<Utc>, String> {
    let seconds: i64 = value
        .trim()
        .parse()
        .map_err(|_| format!("invalid timestamp: {}", value))?;
    instant(seconds)
}

fn instant(seconds: i64) -> Result<DateTime<Utc>, String> {
    DateTime::from_timestamp(seconds, 0).ok_or_else(|| format!("timestamp out of range: {}", seconds))
}
