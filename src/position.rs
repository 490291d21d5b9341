//! Resumable position tokens.
//!
//! A position is a self-describing tagged union: `"s"` for snapshot
//! positions, `"c"` for CDC positions. The journal suffix chosen at the
//! first start travels inside every position so a restarted pipeline finds
//! its journal table again.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::value::Value;

const TYPE_SNAPSHOT: &str = "s";
const TYPE_CDC: &str = "c";

#[derive(Debug, Clone, PartialEq)]
pub enum Position {
    Snapshot {
        /// Last processed value of the ordering column.
        last_processed: Value,
        /// Frozen upper bound of the snapshot cut.
        max_value: Value,
        journal_suffix: String,
    },
    Cdc {
        /// Last processed tracking id from the journal table.
        last_tracking_id: i64,
        journal_suffix: String,
    },
}

/// On-the-wire shape; only the fields matching the tag are present.
#[derive(Serialize, Deserialize)]
struct WirePosition {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_processed: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_tracking_id: Option<i64>,
    journal_suffix: String,
}

impl Position {
    pub fn journal_suffix(&self) -> &str {
        match self {
            Self::Snapshot { journal_suffix, .. } | Self::Cdc { journal_suffix, .. } => {
                journal_suffix
            }
        }
    }

    /// Serializes the position into its opaque token form.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let wire = match self {
            Self::Snapshot {
                last_processed,
                max_value,
                journal_suffix,
            } => WirePosition {
                kind: TYPE_SNAPSHOT.into(),
                last_processed: Some(last_processed.clone()),
                max_value: Some(max_value.clone()),
                last_tracking_id: None,
                journal_suffix: journal_suffix.clone(),
            },
            Self::Cdc {
                last_tracking_id,
                journal_suffix,
            } => WirePosition {
                kind: TYPE_CDC.into(),
                last_processed: None,
                max_value: None,
                last_tracking_id: Some(*last_tracking_id),
                journal_suffix: journal_suffix.clone(),
            },
        };

        Ok(serde_json::to_vec(&wire)?)
    }

    /// Parses an opaque token. `None` means "start fresh".
    pub fn decode(raw: Option<&[u8]>) -> Result<Option<Position>> {
        let Some(raw) = raw else {
            return Ok(None);
        };

        let wire: WirePosition = serde_json::from_slice(raw)?;
        match wire.kind.as_str() {
            TYPE_SNAPSHOT => Ok(Some(Position::Snapshot {
                last_processed: wire.last_processed.unwrap_or(Value::Null),
                max_value: wire.max_value.unwrap_or(Value::Null),
                journal_suffix: wire.journal_suffix,
            })),
            TYPE_CDC => Ok(Some(Position::Cdc {
                last_tracking_id: wire.last_tracking_id.unwrap_or_default(),
                journal_suffix: wire.journal_suffix,
            })),
            other => Err(Error::UnknownIteratorType(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_round_trip() {
        let pos = Position::Snapshot {
            last_processed: Value::Int64(2),
            max_value: Value::Int64(3),
            journal_suffix: "150405".into(),
        };

        let decoded = Position::decode(Some(&pos.encode().unwrap())).unwrap();
        assert_eq!(decoded, Some(pos));
    }

    #[test]
    fn cdc_round_trip() {
        let pos = Position::Cdc {
            last_tracking_id: 42,
            journal_suffix: "093011".into(),
        };

        let decoded = Position::decode(Some(&pos.encode().unwrap())).unwrap();
        assert_eq!(decoded, Some(pos));
    }

    #[test]
    fn none_means_start_fresh() {
        assert_eq!(Position::decode(None).unwrap(), None);
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let raw = br#"{"type":"x","journal_suffix":"150405"}"#;
        assert!(matches!(
            Position::decode(Some(raw)),
            Err(Error::UnknownIteratorType(tag)) if tag == "x"
        ));
    }

    #[test]
    fn malformed_token_is_rejected() {
        assert!(Position::decode(Some(b"{")).is_err());
    }
}
