//! Change events published by tables

use bson::Document;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What happened to a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// Current state replayed when a feed starts with `include_initial`
    Initial,
    Insert,
    Update,
    Delete,
}

/// A single committed mutation, or a replayed initial state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub table: String,
    pub id: String,
    pub old_val: Option<Document>,
    pub new_val: Option<Document>,
    pub at: DateTime<Utc>,
}

impl ChangeEvent {
    /// Build an event from the before/after images of a write
    pub fn from_write(
        table: &str,
        id: &str,
        old_val: Option<Document>,
        new_val: Option<Document>,
    ) -> Self {
        let kind = match (&old_val, &new_val) {
            (None, Some(_)) => ChangeKind::Insert,
            (Some(_), None) => ChangeKind::Delete,
            _ => ChangeKind::Update,
        };
        Self {
            kind,
            table: table.to_string(),
            id: id.to_string(),
            old_val,
            new_val,
            at: Utc::now(),
        }
    }

    /// Event describing a document as it currently is
    pub fn initial(table: &str, id: &str, doc: Document) -> Self {
        Self {
            kind: ChangeKind::Initial,
            table: table.to_string(),
            id: id.to_string(),
            old_val: None,
            new_val: Some(doc),
            at: Utc::now(),
        }
    }
}
