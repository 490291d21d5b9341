//! Journal (tracking table) and trigger setup.
//!
//! CDC for this database is synthesized: three row-level triggers mirror
//! every committed mutation of the source table into a shadow journal with
//! an operation tag and a monotonically increasing tracking id. The journal
//! and the triggers outlive the connector; operators drop them when the
//! pipeline is retired.

use tracing::info;

use crate::client::{Querier, Statement};
use crate::error::Result;
use crate::schema::{read_count, TableInfo};
use crate::value::Value;

/// Operation tag column in the journal.
pub const COLUMN_OPERATION_TYPE: &str = "CONDUIT_OPERATION_TYPE";
/// Monotonic tracking id column in the journal.
pub const COLUMN_TRACKING_ID: &str = "CONDUIT_TRACKING_ID";

pub const OPERATION_INSERT: &str = "INSERT";
pub const OPERATION_UPDATE: &str = "UPDATE";
pub const OPERATION_DELETE: &str = "DELETE";

const QUERY_TABLE_EXISTS: &str = "SELECT COUNT(*) AS CNT FROM TABLES WHERE TABLE_NAME = ?";
const QUERY_TRIGGER_EXISTS: &str = "SELECT COUNT(*) AS CNT FROM TRIGGERS WHERE TRIGGER_NAME = ?";

/// `CONDUIT_{TABLE}_{suffix}`.
pub fn journal_table_name(table: &str, suffix: &str) -> String {
    format!("CONDUIT_{table}_{suffix}")
}

/// `CD_{TABLE}_{OP}_{suffix}`.
fn trigger_name(table: &str, operation: &str, suffix: &str) -> String {
    format!("CD_{table}_{operation}_{suffix}")
}

/// Creates the journal table and the three capture triggers when they do not
/// exist yet. All DDL runs in one transaction; re-running after a restart is
/// a no-op.
pub async fn setup_journal(
    querier: &dyn Querier,
    table: &str,
    journal_table: &str,
    suffix: &str,
    table_info: &TableInfo,
) -> Result<()> {
    let mut statements = Vec::new();

    let rows = querier
        .query(
            QUERY_TABLE_EXISTS,
            &[Value::String(journal_table.to_string())],
        )
        .await?;
    if read_count(&rows) == 0 {
        statements.push(Statement::new(create_journal_sql(journal_table, table_info), vec![]));
    }

    for operation in [OPERATION_INSERT, OPERATION_UPDATE, OPERATION_DELETE] {
        let name = trigger_name(table, operation, suffix);
        let rows = querier
            .query(QUERY_TRIGGER_EXISTS, &[Value::String(name.clone())])
            .await?;
        if read_count(&rows) == 0 {
            statements.push(Statement::new(
                create_trigger_sql(&name, table, journal_table, operation, table_info),
                vec![],
            ));
        }
    }

    if statements.is_empty() {
        info!(journal_table, "journal and triggers already in place");
        return Ok(());
    }

    querier.execute_transaction(&statements).await?;
    info!(journal_table, "journal and capture triggers created");

    Ok(())
}

fn create_journal_sql(journal_table: &str, table_info: &TableInfo) -> String {
    format!(
        "CREATE TABLE {journal_table} ({}, {COLUMN_OPERATION_TYPE} NVARCHAR(20), \
         {COLUMN_TRACKING_ID} BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY)",
        table_info.column_declarations()
    )
}

/// One row-level trigger. INSERT and UPDATE capture the new row image,
/// DELETE captures the old one.
fn create_trigger_sql(
    name: &str,
    table: &str,
    journal_table: &str,
    operation: &str,
    table_info: &TableInfo,
) -> String {
    let (reference, alias) = if operation == OPERATION_DELETE {
        ("OLD ROW", "ol")
    } else {
        ("NEW ROW", "nw")
    };

    let columns = table_info.column_names();
    let mut column_list: Vec<String> = columns.to_vec();
    column_list.push(COLUMN_OPERATION_TYPE.to_string());

    let mut values: Vec<String> = columns.iter().map(|c| format!(":{alias}.{c}")).collect();
    values.push(format!("'{operation}'"));

    format!(
        "CREATE TRIGGER {name} AFTER {operation} ON {table} REFERENCING {reference} {alias} \
         FOR EACH ROW BEGIN INSERT INTO {journal_table} ({}) VALUES ({}); END",
        column_list.join(","),
        values.join(",")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedQuerier;

    fn table_info() -> TableInfo {
        let mut info = TableInfo::default();
        for (name, column_type) in [("ID", "INTEGER"), ("CL_VARCHAR", "VARCHAR")] {
            info.column_types
                .insert(name.to_string(), column_type.to_string());
            info.column_lengths
                .insert(name.to_string(), if name == "ID" { 10 } else { 40 });
            info.column_scales.insert(name.to_string(), None);
            info.column_order.push(name.to_string());
        }
        info
    }

    #[tokio::test]
    async fn creates_journal_and_triggers_when_absent() {
        let querier = ScriptedQuerier::new();
        querier.push_count(0); // journal table
        querier.push_count(0); // insert trigger
        querier.push_count(0); // update trigger
        querier.push_count(0); // delete trigger

        setup_journal(
            &querier,
            "CLIENTS",
            "CONDUIT_CLIENTS_150405",
            "150405",
            &table_info(),
        )
        .await
        .unwrap();

        let transactions = querier.transactions();
        assert_eq!(transactions.len(), 1);
        let statements = &transactions[0];
        assert_eq!(statements.len(), 4);

        assert_eq!(
            statements[0].sql,
            "CREATE TABLE CONDUIT_CLIENTS_150405 (ID INTEGER,CL_VARCHAR VARCHAR(40), \
             CONDUIT_OPERATION_TYPE NVARCHAR(20), CONDUIT_TRACKING_ID BIGINT \
             GENERATED ALWAYS AS IDENTITY PRIMARY KEY)"
        );
        assert_eq!(
            statements[1].sql,
            "CREATE TRIGGER CD_CLIENTS_INSERT_150405 AFTER INSERT ON CLIENTS \
             REFERENCING NEW ROW nw FOR EACH ROW BEGIN INSERT INTO CONDUIT_CLIENTS_150405 \
             (ID,CL_VARCHAR,CONDUIT_OPERATION_TYPE) VALUES (:nw.ID,:nw.CL_VARCHAR,'INSERT'); END"
        );
        assert!(statements[2].sql.contains("CD_CLIENTS_UPDATE_150405"));
        assert!(statements[2].sql.contains(":nw.ID"));
        assert_eq!(
            statements[3].sql,
            "CREATE TRIGGER CD_CLIENTS_DELETE_150405 AFTER DELETE ON CLIENTS \
             REFERENCING OLD ROW ol FOR EACH ROW BEGIN INSERT INTO CONDUIT_CLIENTS_150405 \
             (ID,CL_VARCHAR,CONDUIT_OPERATION_TYPE) VALUES (:ol.ID,:ol.CL_VARCHAR,'DELETE'); END"
        );
    }

    #[tokio::test]
    async fn setup_is_idempotent() {
        let querier = ScriptedQuerier::new();
        querier.push_count(1); // journal table exists
        querier.push_count(1); // insert trigger exists
        querier.push_count(1); // update trigger exists
        querier.push_count(1); // delete trigger exists

        setup_journal(
            &querier,
            "CLIENTS",
            "CONDUIT_CLIENTS_150405",
            "150405",
            &table_info(),
        )
        .await
        .unwrap();

        assert!(querier.transactions().is_empty());
    }

    #[tokio::test]
    async fn recreates_only_missing_triggers() {
        let querier = ScriptedQuerier::new();
        querier.push_count(1); // journal table exists
        querier.push_count(1); // insert trigger exists
        querier.push_count(0); // update trigger missing
        querier.push_count(1); // delete trigger exists

        setup_journal(
            &querier,
            "CLIENTS",
            "CONDUIT_CLIENTS_150405",
            "150405",
            &table_info(),
        )
        .await
        .unwrap();

        let transactions = querier.transactions();
        assert_eq!(transactions.len(), 1);
        assert_eq!(transactions[0].len(), 1);
        assert!(transactions[0][0].sql.contains("CD_CLIENTS_UPDATE_150405"));
    }

    #[test]
    fn naming_patterns() {
        assert_eq!(
            journal_table_name("CLIENTS", "150405"),
            "CONDUIT_CLIENTS_150405"
        );
        assert_eq!(
            trigger_name("CLIENTS", OPERATION_DELETE, "150405"),
            "CD_CLIENTS_DELETE_150405"
        );
    }
}
