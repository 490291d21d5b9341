//! Database access seam.
//!
//! Everything above this module talks to the database through the [`Querier`]
//! trait, so iterators and the writer are driver-free and testable against
//! [`crate::testing::ScriptedQuerier`]. [`HanaClient`] is the real
//! implementation on top of `hdbconnect_async`.

use std::collections::BTreeMap;

use async_trait::async_trait;
use hdbconnect_async::{Connection, HdbValue, IntoConnectParams};
use tokio::sync::Mutex;

use crate::config::{AuthConfig, AuthMechanism};
use crate::error::{Error, Result};
use crate::value::{decimal_from_str, decimal_to_sql_string, Value};

/// One result row keyed by uppercase column name.
pub type Row = BTreeMap<String, Value>;

/// A parameterized SQL statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

impl Statement {
    pub fn new(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

/// Minimal database interface the CDC core needs: parameterized queries,
/// single mutations, and transactional statement batches.
#[async_trait]
pub trait Querier: Send + Sync {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Runs the statements in one transaction; any failure rolls back.
    async fn execute_transaction(&self, statements: &[Statement]) -> Result<()>;
}

/// Connection handle to an SAP HANA database.
pub struct HanaClient {
    conn: Mutex<Connection>,
}

/// Opens a connection using the configured auth mechanism.
///
/// DSN and Basic are wired natively. JWT and X509 pass config validation but
/// are rejected here: the Rust driver exposes no token or client-certificate
/// connector.
pub async fn connect(auth: &AuthConfig) -> Result<HanaClient> {
    auth.validate()?;

    let url = match auth.mechanism {
        AuthMechanism::Dsn => auth.dsn.clone(),
        AuthMechanism::Basic => {
            format!("hdbsql://{}:{}@{}", auth.username, auth.password, auth.host)
        }
        AuthMechanism::Jwt | AuthMechanism::X509 => {
            return Err(Error::Config(
                "JWT and X509 are not supported by the hdbconnect driver; use the DSN mechanism"
                    .into(),
            ))
        }
    };

    let params = url
        .into_connect_params()
        .map_err(|e| Error::Database(e.to_string()))?;
    let conn = Connection::new(params)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

    Ok(HanaClient {
        conn: Mutex::new(conn),
    })
}

#[async_trait]
impl Querier for HanaClient {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let conn = self.conn.lock().await;
        let result_set = if params.is_empty() {
            conn.query(sql).await.map_err(db_err)?
        } else {
            let mut stmt = conn.prepare(sql).await.map_err(db_err)?;
            stmt.execute(&bind_parameters(params))
                .await
                .map_err(db_err)?
                .into_result_set()
                .map_err(db_err)?
        };

        resultset_to_rows(result_set).await
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let conn = self.conn.lock().await;
        if params.is_empty() {
            let affected = conn.dml(sql).await.map_err(db_err)?;
            Ok(affected as u64)
        } else {
            let mut stmt = conn.prepare(sql).await.map_err(db_err)?;
            stmt.execute(&bind_parameters(params)).await.map_err(db_err)?;
            Ok(0)
        }
    }

    async fn execute_transaction(&self, statements: &[Statement]) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.set_auto_commit(false).await;

        for statement in statements {
            let outcome = if statement.params.is_empty() {
                conn.exec(&statement.sql).await.map_err(db_err)
            } else {
                match conn.prepare(&statement.sql).await.map_err(db_err) {
                    Ok(mut stmt) => stmt
                        .execute(&bind_parameters(&statement.params))
                        .await
                        .map(|_| ())
                        .map_err(db_err),
                    Err(e) => Err(e),
                }
            };

            if let Err(e) = outcome {
                let _ = conn.rollback().await;
                let _ = conn.set_auto_commit(true).await;
                return Err(e);
            }
        }

        conn.commit().await.map_err(db_err)?;
        conn.set_auto_commit(true).await;

        Ok(())
    }
}

fn db_err(e: impl std::fmt::Display) -> Error {
    Error::Database(e.to_string())
}

/// Renders parameters into serde-bindable primitives. Decimals bind as plain
/// decimal strings and timestamps as `YYYY-MM-DD HH:MM:SS.fff` UTC strings;
/// the server converts both.
fn bind_parameters(params: &[Value]) -> Vec<serde_json::Value> {
    params.iter().map(bind_parameter).collect()
}

fn bind_parameter(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int32(i) => serde_json::Value::from(*i),
        Value::Int64(i) => serde_json::Value::from(*i),
        Value::Float64(f) => serde_json::Value::from(*f),
        Value::Decimal(r) => serde_json::Value::String(decimal_to_sql_string(r)),
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Bytes(b) => serde_json::Value::from(b.clone()),
        Value::Timestamp(t) => serde_json::Value::String(
            t.naive_utc().format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
        ),
        Value::Array(_) | Value::Map(_) => serde_json::Value::String(
            serde_json::to_string(value).unwrap_or_default(),
        ),
    }
}

async fn resultset_to_rows(mut result_set: hdbconnect_async::ResultSet) -> Result<Vec<Row>> {
    let names: Vec<String> = result_set
        .metadata()
        .iter()
        .map(|field| field.displayname().to_uppercase())
        .collect();

    let mut rows = Vec::new();
    while let Some(db_row) = result_set.next_row().await.map_err(db_err)? {
        let mut row = Row::new();
        for (name, hdb_value) in names.iter().zip(db_row.into_iter()) {
            row.insert(name.clone(), from_hdb_value(hdb_value).await?);
        }
        rows.push(row);
    }

    Ok(rows)
}

async fn from_hdb_value(value: HdbValue<'static>) -> Result<Value> {
    Ok(match value {
        HdbValue::NULL => Value::Null,
        HdbValue::BOOLEAN(b) => Value::Bool(b),
        HdbValue::TINYINT(i) => Value::Int32(i32::from(i)),
        HdbValue::SMALLINT(i) => Value::Int32(i32::from(i)),
        HdbValue::INT(i) => Value::Int32(i),
        HdbValue::BIGINT(i) => Value::Int64(i),
        HdbValue::REAL(f) => Value::Float64(f64::from(f)),
        HdbValue::DOUBLE(f) => Value::Float64(f),
        HdbValue::DECIMAL(d) => Value::Decimal(decimal_from_str(&d.to_string())?),
        HdbValue::STRING(s) => Value::String(s),
        HdbValue::BINARY(b) => Value::Bytes(b),
        value @ (HdbValue::LONGDATE(_) | HdbValue::SECONDDATE(_)) => {
            let t: chrono::NaiveDateTime = value.try_into().map_err(db_err)?;
            Value::Timestamp(t.and_utc().fixed_offset())
        }
        value @ HdbValue::DAYDATE(_) => {
            let d: chrono::NaiveDate = value.try_into().map_err(db_err)?;
            let t = d.and_hms_opt(0, 0, 0).expect("midnight is valid");
            Value::Timestamp(t.and_utc().fixed_offset())
        }
        value @ HdbValue::SECONDTIME(_) => {
            let t: chrono::NaiveTime = value.try_into().map_err(db_err)?;
            Value::String(t.format("%H:%M:%S").to_string())
        }
        HdbValue::ASYNC_CLOB(lob) => Value::String(lob.into_string().await.map_err(db_err)?),
        HdbValue::ASYNC_NCLOB(lob) => Value::String(lob.into_string().await.map_err(db_err)?),
        HdbValue::ASYNC_BLOB(lob) => Value::Bytes(lob.into_bytes().await.map_err(db_err)?),
        other => return Err(Error::Database(format!("unsupported value: {other:?}"))),
    })
}
