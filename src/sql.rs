//! Shared SQL building helpers.
//!
//! Statements use positional `?` placeholders throughout; identifiers are
//! interpolated directly since the database keeps them uppercase and the
//! configuration boundary normalizes them.

/// `?, ?, ?` for `n` parameters.
pub fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

pub fn build_insert(table: &str, columns: &[String]) -> String {
    format!(
        "INSERT INTO {table} ({}) VALUES ({})",
        columns.join(", "),
        placeholders(columns.len())
    )
}

pub fn build_update(table: &str, set_columns: &[String], key_columns: &[String]) -> String {
    let assignments = set_columns
        .iter()
        .map(|c| format!("{c} = ?"))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "UPDATE {table} SET {assignments} WHERE {}",
        key_predicate(key_columns)
    )
}

pub fn build_delete(table: &str, key_columns: &[String]) -> String {
    format!("DELETE FROM {table} WHERE {}", key_predicate(key_columns))
}

/// `DELETE .. WHERE column IN (?, ?, ..)` for reclaiming journal rows.
pub fn build_delete_in(table: &str, column: &str, n: usize) -> String {
    format!(
        "DELETE FROM {table} WHERE {column} IN ({})",
        placeholders(n)
    )
}

/// Paged `SELECT *` ordered by one column.
pub fn build_select_page(
    table: &str,
    predicate: Option<&str>,
    order_by: &str,
    limit: usize,
) -> String {
    match predicate {
        Some(p) => format!("SELECT * FROM {table} WHERE {p} ORDER BY {order_by} LIMIT {limit}"),
        None => format!("SELECT * FROM {table} ORDER BY {order_by} LIMIT {limit}"),
    }
}

fn key_predicate(key_columns: &[String]) -> String {
    key_columns
        .iter()
        .map(|c| format!("{c} = ?"))
        .collect::<Vec<_>>()
        .join(" AND ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_statement() {
        let columns = vec!["ID".to_string(), "NAME".to_string()];
        assert_eq!(
            build_insert("CLIENTS", &columns),
            "INSERT INTO CLIENTS (ID, NAME) VALUES (?, ?)"
        );
    }

    #[test]
    fn update_statement_with_composite_key() {
        let set = vec!["NAME".to_string()];
        let keys = vec!["ID".to_string(), "TENANT".to_string()];
        assert_eq!(
            build_update("CLIENTS", &set, &keys),
            "UPDATE CLIENTS SET NAME = ? WHERE ID = ? AND TENANT = ?"
        );
    }

    #[test]
    fn delete_statement() {
        let keys = vec!["ID".to_string()];
        assert_eq!(
            build_delete("CLIENTS", &keys),
            "DELETE FROM CLIENTS WHERE ID = ?"
        );
    }

    #[test]
    fn delete_in_statement() {
        assert_eq!(
            build_delete_in("JOURNAL", "CONDUIT_TRACKING_ID", 3),
            "DELETE FROM JOURNAL WHERE CONDUIT_TRACKING_ID IN (?, ?, ?)"
        );
    }

    #[test]
    fn select_page_with_and_without_predicate() {
        assert_eq!(
            build_select_page("CLIENTS", Some("ID <= ?"), "ID", 100),
            "SELECT * FROM CLIENTS WHERE ID <= ? ORDER BY ID LIMIT 100"
        );
        assert_eq!(
            build_select_page("CLIENTS", None, "ID", 100),
            "SELECT * FROM CLIENTS ORDER BY ID LIMIT 100"
        );
    }
}
