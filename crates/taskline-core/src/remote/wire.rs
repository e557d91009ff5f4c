//! Request and response envelopes
//!
//! Requests and responses share one shape: `status` and the list revision
//! next to either a `list` or a single `element`. Items use their own serde
//! encoding (see `models::Item`).

use serde::{Deserialize, Serialize};

use crate::models::Item;

/// Status string the server puts in every envelope
pub const STATUS_OK: &str = "ok";

/// Envelope for whole-list calls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListEnvelope {
    #[serde(default = "ok_status")]
    pub status: String,
    pub list: Vec<Item>,
    pub revision: u32,
}

impl ListEnvelope {
    pub fn request(list: Vec<Item>, revision: u32) -> Self {
        Self {
            status: STATUS_OK.to_string(),
            list,
            revision,
        }
    }
}

/// Envelope for single-item calls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemEnvelope {
    #[serde(default = "ok_status")]
    pub status: String,
    pub element: Item,
    pub revision: u32,
}

impl ItemEnvelope {
    pub fn request(element: Item, revision: u32) -> Self {
        Self {
            status: STATUS_OK.to_string(),
            element,
            revision,
        }
    }
}

fn ok_status() -> String {
    STATUS_OK.to_string()
}
