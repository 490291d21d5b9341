//! Table catalog introspection.

use std::collections::BTreeMap;

use crate::client::{Querier, Row};
use crate::error::{Error, Result};
use crate::value::Value;

const QUERY_TABLE_EXISTS: &str = "SELECT COUNT(*) AS CNT FROM TABLES WHERE TABLE_NAME = ?";
const QUERY_COLUMN_TYPES: &str = "SELECT COLUMN_NAME, DATA_TYPE_NAME, LENGTH, SCALE \
     FROM TABLE_COLUMNS WHERE TABLE_NAME = ? ORDER BY POSITION";
const QUERY_PRIMARY_KEYS: &str = "SELECT COLUMN_NAME FROM CONSTRAINTS \
     WHERE TABLE_NAME = ? AND IS_PRIMARY_KEY = 'TRUE'";

// column types where length is a required parameter.
const TYPES_WITH_LENGTH: &[&str] = &["VARCHAR", "NVARCHAR", "VARBINARY", "ALPHANUM", "SHORTTEXT"];

/// Column types, lengths, scales and primary keys of one table.
#[derive(Debug, Clone, Default)]
pub struct TableInfo {
    /// Column name to database type name.
    pub column_types: BTreeMap<String, String>,
    pub column_lengths: BTreeMap<String, i64>,
    pub column_scales: BTreeMap<String, Option<i64>>,
    /// Columns in catalog order.
    pub column_order: Vec<String>,
    pub primary_keys: Vec<String>,
}

impl TableInfo {
    /// Introspects `table` (uppercase) from the system catalog.
    pub async fn load(querier: &dyn Querier, table: &str) -> Result<TableInfo> {
        let table_param = vec![Value::String(table.to_uppercase())];

        let rows = querier.query(QUERY_TABLE_EXISTS, &table_param).await?;
        if read_count(&rows) == 0 {
            return Err(Error::TableNotFound(table.to_string()));
        }

        let mut info = TableInfo::default();

        for row in querier.query(QUERY_COLUMN_TYPES, &table_param).await? {
            let name = required_string(&row, "COLUMN_NAME")?;
            let data_type = required_string(&row, "DATA_TYPE_NAME")?;
            let length = row.get("LENGTH").and_then(Value::as_i64).unwrap_or_default();
            let scale = row.get("SCALE").and_then(Value::as_i64);

            info.column_lengths.insert(name.clone(), length);
            info.column_scales.insert(name.clone(), scale);
            info.column_types.insert(name.clone(), data_type);
            info.column_order.push(name);
        }

        for row in querier.query(QUERY_PRIMARY_KEYS, &table_param).await? {
            info.primary_keys.push(required_string(&row, "COLUMN_NAME")?);
        }

        Ok(info)
    }

    /// Renders the comma-separated column declarations used when cloning the
    /// table, for example `NAME VARCHAR(40), AGE INT, SALARY DECIMAL(10,2)`.
    pub fn column_declarations(&self) -> String {
        let mut declarations = Vec::with_capacity(self.column_order.len());

        for name in &self.column_order {
            let column_type = &self.column_types[name];
            let mut declaration = format!("{name} {column_type}");

            if TYPES_WITH_LENGTH.contains(&column_type.as_str()) {
                declaration = format!("{declaration}({})", self.column_lengths[name]);
            }
            if column_type == "DECIMAL" {
                if let Some(scale) = self.column_scales[name] {
                    declaration =
                        format!("{name} {column_type}({},{scale})", self.column_lengths[name]);
                }
            }

            declarations.push(declaration);
        }

        declarations.join(",")
    }

    pub fn column_names(&self) -> &[String] {
        &self.column_order
    }
}

fn required_string(row: &Row, column: &str) -> Result<String> {
    match row.get(column) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Bytes(b)) => String::from_utf8(b.clone())
            .map_err(|_| Error::CannotConvertToBytes(column.to_string())),
        _ => Err(Error::Database(format!("missing {column} in catalog row"))),
    }
}

/// First value of the first row, as a count.
pub(crate) fn read_count(rows: &[Row]) -> i64 {
    rows.first()
        .and_then(|row| row.values().next())
        .and_then(Value::as_i64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info_with(columns: &[(&str, &str, i64, Option<i64>)], primary_keys: &[&str]) -> TableInfo {
        let mut info = TableInfo::default();
        for (name, column_type, length, scale) in columns {
            info.column_types
                .insert(name.to_string(), column_type.to_string());
            info.column_lengths.insert(name.to_string(), *length);
            info.column_scales.insert(name.to_string(), *scale);
            info.column_order.push(name.to_string());
        }
        info.primary_keys = primary_keys.iter().map(|k| k.to_string()).collect();
        info
    }

    #[test]
    fn declarations_add_length_where_required() {
        let info = info_with(
            &[
                ("ID", "INTEGER", 10, None),
                ("CL_VARCHAR", "VARCHAR", 40, None),
                ("CL_VARBINARY", "VARBINARY", 20, None),
            ],
            &["ID"],
        );
        assert_eq!(
            info.column_declarations(),
            "ID INTEGER,CL_VARCHAR VARCHAR(40),CL_VARBINARY VARBINARY(20)"
        );
    }

    #[test]
    fn declarations_add_scale_for_decimal() {
        let info = info_with(
            &[
                ("CL_DECIMAL", "DECIMAL", 34, None),
                ("CL_CUSTOM_DECIMAL", "DECIMAL", 4, Some(1)),
            ],
            &[],
        );
        assert_eq!(
            info.column_declarations(),
            "CL_DECIMAL DECIMAL,CL_CUSTOM_DECIMAL DECIMAL(4,1)"
        );
    }

    #[test]
    fn count_reads_first_value() {
        let row: Row = [("CNT".to_string(), Value::Int64(1))].into();
        assert_eq!(read_count(&[row]), 1);
        assert_eq!(read_count(&[]), 0);
    }
}
