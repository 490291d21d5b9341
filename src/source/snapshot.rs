//! Snapshot iterator.
//!
//! A snapshot is the state of the table at the instant the iterator recorded
//! the maximum value of the ordering column. The iterator pages through all
//! rows at or below that frozen bound in ascending order; values in the
//! ordering column must be unique and sortable or rows will be skipped.
//! Restarting with the last emitted position resumes the same cut even if
//! new rows arrived in the meantime.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use crate::client::{Querier, Row};
use crate::error::{Error, Result};
use crate::position::Position;
use crate::record::{Record, METADATA_TABLE};
use crate::sql::build_select_page;
use crate::value::{normalize_row, Value};

pub(crate) struct SnapshotIterator {
    querier: Arc<dyn Querier>,
    table: String,
    ordering_column: String,
    keys: Vec<String>,
    batch_size: usize,
    column_types: BTreeMap<String, String>,
    journal_suffix: String,

    /// Frozen upper bound of the cut.
    max_value: Value,
    last_processed: Option<Value>,
    batch: VecDeque<Row>,
    /// Set once a loaded page comes back empty.
    drained: bool,
}

pub(crate) struct SnapshotParams {
    pub querier: Arc<dyn Querier>,
    pub table: String,
    pub ordering_column: String,
    pub keys: Vec<String>,
    pub batch_size: usize,
    pub column_types: BTreeMap<String, String>,
    pub journal_suffix: String,
    pub position: Option<Position>,
}

impl SnapshotIterator {
    /// Opens the iterator. A fresh start computes the cut with
    /// `SELECT MAX(ordering_column)`; a resumed one adopts the cut from the
    /// position.
    pub async fn open(params: SnapshotParams) -> Result<Self> {
        let (max_value, last_processed) = match params.position {
            Some(Position::Snapshot {
                last_processed,
                max_value,
                ..
            }) => (max_value, Some(last_processed)),
            _ => {
                let sql = format!(
                    "SELECT MAX({}) AS MAX_VALUE FROM {}",
                    params.ordering_column, params.table
                );
                let rows = params.querier.query(&sql, &[]).await?;
                let max = rows
                    .first()
                    .and_then(|row| row.values().next().cloned())
                    .unwrap_or(Value::Null);
                (max, None)
            }
        };

        Ok(Self {
            querier: params.querier,
            table: params.table,
            ordering_column: params.ordering_column,
            keys: params.keys,
            batch_size: params.batch_size,
            column_types: params.column_types,
            journal_suffix: params.journal_suffix,
            max_value,
            last_processed,
            batch: VecDeque::new(),
            drained: false,
        })
    }

    pub async fn has_next(&mut self) -> Result<bool> {
        if !self.batch.is_empty() {
            return Ok(true);
        }
        if self.drained {
            return Ok(false);
        }

        self.load_batch().await?;
        if self.batch.is_empty() {
            self.drained = true;
            return Ok(false);
        }

        Ok(true)
    }

    pub async fn next(&mut self) -> Result<Record> {
        if self.batch.is_empty() {
            self.load_batch().await?;
        }
        let row = self.batch.pop_front().ok_or(Error::NoNextRecord)?;

        let row = normalize_row(&self.column_types, row)?;

        let ordering_value = row
            .get(&self.ordering_column)
            .cloned()
            .ok_or_else(|| Error::MissingOrderingColumn(self.ordering_column.clone()))?;

        let mut key = BTreeMap::new();
        for key_column in &self.keys {
            let value = row
                .get(key_column)
                .cloned()
                .ok_or_else(|| Error::MissingKey(key_column.clone()))?;
            key.insert(key_column.clone(), value);
        }

        let position = Position::Snapshot {
            last_processed: ordering_value.clone(),
            max_value: self.max_value.clone(),
            journal_suffix: self.journal_suffix.clone(),
        };
        self.last_processed = Some(ordering_value);

        let payload = serde_json::to_vec(&row)?;
        let metadata = BTreeMap::from([(METADATA_TABLE.to_string(), self.table.clone())]);

        Ok(Record::snapshot(position, metadata, key, payload))
    }

    /// Loads the next page of the cut.
    async fn load_batch(&mut self) -> Result<()> {
        let (predicate, params) = match &self.last_processed {
            Some(last) => (
                format!(
                    "{0} > ? AND {0} <= ?",
                    self.ordering_column
                ),
                vec![last.clone(), self.max_value.clone()],
            ),
            None => (
                format!("{} <= ?", self.ordering_column),
                vec![self.max_value.clone()],
            ),
        };

        let sql = build_select_page(
            &self.table,
            Some(&predicate),
            &self.ordering_column,
            self.batch_size,
        );
        let rows = self.querier.query(&sql, &params).await?;
        self.batch = rows.into();

        Ok(())
    }

    /// Drops the buffered page; the iterator is single-use beyond this.
    pub fn close(&mut self) {
        self.batch.clear();
        self.drained = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{row, ScriptedQuerier};

    fn params(
        querier: Arc<ScriptedQuerier>,
        position: Option<Position>,
    ) -> SnapshotParams {
        SnapshotParams {
            querier,
            table: "CLIENTS".into(),
            ordering_column: "ID".into(),
            keys: vec!["ID".into()],
            batch_size: 2,
            column_types: BTreeMap::from([
                ("ID".to_string(), "INTEGER".to_string()),
                ("CL_VARCHAR".to_string(), "VARCHAR".to_string()),
            ]),
            journal_suffix: "150405".into(),
            position,
        }
    }

    fn client_row(id: i64, name: &str) -> Row {
        row(&[
            ("ID", Value::Int64(id)),
            ("CL_VARCHAR", Value::Bytes(name.as_bytes().to_vec())),
        ])
    }

    #[tokio::test]
    async fn fresh_open_freezes_the_cut() {
        let querier = Arc::new(ScriptedQuerier::new());
        querier.push_rows(vec![row(&[("MAX_VALUE", Value::Int64(3))])]);

        let mut it = SnapshotIterator::open(params(querier.clone(), None))
            .await
            .unwrap();

        querier.push_rows(vec![client_row(1, "tr1"), client_row(2, "tr2")]);
        assert!(it.has_next().await.unwrap());

        let record = it.next().await.unwrap();
        assert_eq!(record.key["ID"], Value::Int64(1));
        assert_eq!(
            record.position,
            Position::Snapshot {
                last_processed: Value::Int64(1),
                max_value: Value::Int64(3),
                journal_suffix: "150405".into(),
            }
        );

        let queries = querier.queries();
        assert_eq!(queries[0].sql, "SELECT MAX(ID) AS MAX_VALUE FROM CLIENTS");
        assert_eq!(
            queries[1].sql,
            "SELECT * FROM CLIENTS WHERE ID <= ? ORDER BY ID LIMIT 2"
        );
        assert_eq!(queries[1].params, vec![Value::Int64(3)]);
    }

    #[tokio::test]
    async fn pages_until_the_cut_is_exhausted() {
        let querier = Arc::new(ScriptedQuerier::new());
        querier.push_rows(vec![row(&[("MAX_VALUE", Value::Int64(3))])]);

        let mut it = SnapshotIterator::open(params(querier.clone(), None))
            .await
            .unwrap();

        querier.push_rows(vec![client_row(1, "tr1"), client_row(2, "tr2")]);
        let mut ids = Vec::new();
        while it.has_next().await.unwrap() {
            if ids.len() == 1 {
                // second page follows once the first drains
                querier.push_rows(vec![client_row(3, "tr3")]);
            }
            if ids.len() == 2 {
                querier.push_empty();
            }
            ids.push(it.next().await.unwrap().key["ID"].clone());
        }
        // the final has_next drains an empty page
        assert_eq!(
            ids,
            vec![Value::Int64(1), Value::Int64(2), Value::Int64(3)]
        );

        let paging = querier.queries();
        assert_eq!(
            paging[2].sql,
            "SELECT * FROM CLIENTS WHERE ID > ? AND ID <= ? ORDER BY ID LIMIT 2"
        );
        assert_eq!(paging[2].params, vec![Value::Int64(2), Value::Int64(3)]);
    }

    #[tokio::test]
    async fn resumed_snapshot_keeps_the_original_cut() {
        let querier = Arc::new(ScriptedQuerier::new());
        let position = Position::Snapshot {
            last_processed: Value::Int64(2),
            max_value: Value::Int64(3),
            journal_suffix: "150405".into(),
        };

        let mut it = SnapshotIterator::open(params(querier.clone(), Some(position)))
            .await
            .unwrap();

        querier.push_rows(vec![client_row(3, "tr3")]);
        assert!(it.has_next().await.unwrap());
        let record = it.next().await.unwrap();
        assert_eq!(record.key["ID"], Value::Int64(3));

        // no MAX query on resume; the first page is already bounded below
        let queries = querier.queries();
        assert_eq!(
            queries[0].sql,
            "SELECT * FROM CLIENTS WHERE ID > ? AND ID <= ? ORDER BY ID LIMIT 2"
        );
        assert_eq!(queries[0].params, vec![Value::Int64(2), Value::Int64(3)]);
    }

    #[tokio::test]
    async fn empty_table_has_no_records() {
        let querier = Arc::new(ScriptedQuerier::new());
        querier.push_rows(vec![row(&[("MAX_VALUE", Value::Null)])]);

        let mut it = SnapshotIterator::open(params(querier.clone(), None))
            .await
            .unwrap();

        querier.push_empty();
        assert!(!it.has_next().await.unwrap());
    }

    #[tokio::test]
    async fn missing_key_column_fails_the_record() {
        let querier = Arc::new(ScriptedQuerier::new());
        querier.push_rows(vec![row(&[("MAX_VALUE", Value::Int64(1))])]);

        let mut p = params(querier.clone(), None);
        p.keys = vec!["CL_TINYINT".into()];
        let mut it = SnapshotIterator::open(p).await.unwrap();

        querier.push_rows(vec![client_row(1, "tr1")]);
        assert!(it.has_next().await.unwrap());
        assert!(matches!(
            it.next().await,
            Err(Error::MissingKey(column)) if column == "CL_TINYINT"
        ));
    }

    #[tokio::test]
    async fn payload_carries_every_column() {
        let querier = Arc::new(ScriptedQuerier::new());
        querier.push_rows(vec![row(&[("MAX_VALUE", Value::Int64(1))])]);

        let mut it = SnapshotIterator::open(params(querier.clone(), None))
            .await
            .unwrap();

        querier.push_rows(vec![client_row(1, "tr1")]);
        assert!(it.has_next().await.unwrap());
        let record = it.next().await.unwrap();

        let payload = String::from_utf8(record.payload.unwrap()).unwrap();
        assert_eq!(payload, r#"{"CL_VARCHAR":"tr1","ID":1}"#);
        assert_eq!(record.metadata[METADATA_TABLE], "CLIENTS");
    }
}
