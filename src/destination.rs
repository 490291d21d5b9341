//! Destination write path: key-based insert, update and delete.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::client::Querier;
use crate::error::{Error, Result};
use crate::record::{Operation, Record, METADATA_TABLE};
use crate::schema::TableInfo;
use crate::sql::{build_delete, build_insert, build_update};
use crate::value::{convert_payload, Value};

/// Writes one record at a time into the configured table, or into the table
/// a record names in its `saphana.table` metadata.
pub struct Writer {
    querier: Arc<dyn Querier>,
    table: String,
    /// Column types per table; the default table is loaded at construction,
    /// override tables on first use.
    column_types: BTreeMap<String, BTreeMap<String, String>>,
}

impl Writer {
    pub async fn new(querier: Arc<dyn Querier>, table: &str) -> Result<Writer> {
        let table = table.to_uppercase();
        let info = TableInfo::load(querier.as_ref(), &table).await?;

        let mut column_types = BTreeMap::new();
        column_types.insert(table.clone(), info.column_types);

        Ok(Writer {
            querier,
            table,
            column_types,
        })
    }

    /// Routes a record to the matching write method: snapshots and creates
    /// are inserts.
    pub async fn write(&mut self, record: &Record) -> Result<()> {
        match record.operation {
            Operation::Create | Operation::Snapshot => self.insert(record).await,
            Operation::Update => self.update(record).await,
            Operation::Delete => self.delete(record).await,
        }
    }

    pub async fn insert(&mut self, record: &Record) -> Result<()> {
        let table = self.table_for(record);
        let payload = record.structured_payload()?.ok_or(Error::NoPayload)?;
        if payload.is_empty() {
            return Err(Error::NoPayload);
        }

        let column_types = self.column_types_for(&table).await?;
        let payload = convert_payload(&column_types, payload)?;

        let columns: Vec<String> = payload.keys().cloned().collect();
        let params: Vec<Value> = payload.into_values().collect();

        let sql = build_insert(&table, &columns);
        self.querier.execute(&sql, &params).await?;

        Ok(())
    }

    pub async fn update(&mut self, record: &Record) -> Result<()> {
        let table = self.table_for(record);
        let payload = record.structured_payload()?.ok_or(Error::NoPayload)?;
        if payload.is_empty() {
            return Err(Error::NoPayload);
        }
        if record.key.is_empty() {
            return Err(Error::NoKey);
        }

        let column_types = self.column_types_for(&table).await?;
        let payload = convert_payload(&column_types, payload)?;

        let set_columns: Vec<String> = payload.keys().cloned().collect();
        let key_columns: Vec<String> = record.key.keys().cloned().collect();
        let mut params: Vec<Value> = payload.into_values().collect();
        params.extend(record.key.values().cloned());

        let sql = build_update(&table, &set_columns, &key_columns);
        self.querier.execute(&sql, &params).await?;

        Ok(())
    }

    pub async fn delete(&mut self, record: &Record) -> Result<()> {
        let table = self.table_for(record);
        if record.key.is_empty() {
            return Err(Error::NoKey);
        }

        let key_columns: Vec<String> = record.key.keys().cloned().collect();
        let params: Vec<Value> = record.key.values().cloned().collect();

        let sql = build_delete(&table, &key_columns);
        self.querier.execute(&sql, &params).await?;

        Ok(())
    }

    /// The record's metadata table when present, the default otherwise.
    fn table_for(&self, record: &Record) -> String {
        record
            .metadata
            .get(METADATA_TABLE)
            .map(|t| t.to_uppercase())
            .unwrap_or_else(|| self.table.clone())
    }

    async fn column_types_for(&mut self, table: &str) -> Result<BTreeMap<String, String>> {
        if let Some(types) = self.column_types.get(table) {
            return Ok(types.clone());
        }

        let info = TableInfo::load(self.querier.as_ref(), table).await?;
        self.column_types
            .insert(table.to_string(), info.column_types.clone());

        Ok(info.column_types)
    }
}
