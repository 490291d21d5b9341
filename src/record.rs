//! The record model emitted by the source and consumed by the destination.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::position::Position;
use crate::value::Value;

/// Metadata key carrying the table a record belongs to; the destination
/// writer uses it to override its default table per record.
pub const METADATA_TABLE: &str = "saphana.table";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Snapshot,
    Create,
    Update,
    Delete,
}

/// One row-level event. The payload is the serialized column map; deletes
/// carry none. Keys are always present.
#[derive(Debug, Clone)]
pub struct Record {
    pub position: Position,
    pub operation: Operation,
    pub metadata: BTreeMap<String, String>,
    pub key: BTreeMap<String, Value>,
    pub payload: Option<Vec<u8>>,
    pub created_at: DateTime<Utc>,
}

impl Record {
    fn new(
        position: Position,
        operation: Operation,
        metadata: BTreeMap<String, String>,
        key: BTreeMap<String, Value>,
        payload: Option<Vec<u8>>,
    ) -> Self {
        Self {
            position,
            operation,
            metadata,
            key,
            payload,
            created_at: Utc::now(),
        }
    }

    pub fn snapshot(
        position: Position,
        metadata: BTreeMap<String, String>,
        key: BTreeMap<String, Value>,
        payload: Vec<u8>,
    ) -> Self {
        Self::new(position, Operation::Snapshot, metadata, key, Some(payload))
    }

    pub fn create(
        position: Position,
        metadata: BTreeMap<String, String>,
        key: BTreeMap<String, Value>,
        payload: Vec<u8>,
    ) -> Self {
        Self::new(position, Operation::Create, metadata, key, Some(payload))
    }

    pub fn update(
        position: Position,
        metadata: BTreeMap<String, String>,
        key: BTreeMap<String, Value>,
        payload: Vec<u8>,
    ) -> Self {
        Self::new(position, Operation::Update, metadata, key, Some(payload))
    }

    pub fn delete(
        position: Position,
        metadata: BTreeMap<String, String>,
        key: BTreeMap<String, Value>,
    ) -> Self {
        Self::new(position, Operation::Delete, metadata, key, None)
    }

    /// Decodes the payload into its structured form. `None` when there is no
    /// payload or it is empty.
    pub fn structured_payload(
        &self,
    ) -> crate::error::Result<Option<BTreeMap<String, Value>>> {
        match &self.payload {
            None => Ok(None),
            Some(raw) if raw.is_empty() => Ok(None),
            Some(raw) => {
                let map: BTreeMap<String, Value> = serde_json::from_slice(raw)?;
                Ok(Some(map))
            }
        }
    }
}
