//! Connector configuration.
//!
//! Identifier casing is normalized here, at the configuration boundary: the
//! database stores tables and columns uppercase, so `table`,
//! `orderingColumn` and `primaryKeys` are uppercased once and used verbatim
//! everywhere else.

use serde::Deserialize;

use crate::error::{Error, Result};

const DEFAULT_BATCH_SIZE: usize = 1000;
const MAX_BATCH_SIZE: usize = 10000;

/// Authentication mechanism for the database connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum AuthMechanism {
    #[default]
    #[serde(rename = "DSN")]
    Dsn,
    Basic,
    #[serde(rename = "JWT")]
    Jwt,
    X509,
}

/// Authentication parameters; which fields are required depends on the
/// mechanism.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfig {
    #[serde(default)]
    pub mechanism: AuthMechanism,
    /// Connection string, required for DSN auth.
    #[serde(default)]
    pub dsn: String,
    /// Database host, required for Basic, JWT and X509 auth.
    #[serde(default)]
    pub host: String,
    /// Username for Basic auth.
    #[serde(default)]
    pub username: String,
    /// Password for Basic auth.
    #[serde(default)]
    pub password: String,
    /// Token for JWT auth.
    #[serde(default)]
    pub token: String,
    /// Client certificate file path for X509 auth.
    #[serde(default)]
    pub client_cert_file_path: String,
    /// Client key file path for X509 auth.
    #[serde(default)]
    pub client_key_file_path: String,
}

impl AuthConfig {
    pub fn validate(&self) -> Result<()> {
        match self.mechanism {
            AuthMechanism::Dsn => {
                if self.dsn.is_empty() {
                    return Err(Error::Config(
                        "dsn is required parameter for dsn auth".into(),
                    ));
                }
            }
            AuthMechanism::Basic => {
                if self.host.is_empty() {
                    return Err(Error::Config(
                        "host is required parameter for basic, jwt, x509 auth".into(),
                    ));
                }
                if self.username.is_empty() {
                    return Err(Error::Config(
                        "username is required parameter for basic auth".into(),
                    ));
                }
                if self.password.is_empty() {
                    return Err(Error::Config(
                        "password is required parameter for basic auth".into(),
                    ));
                }
            }
            AuthMechanism::Jwt => {
                if self.host.is_empty() {
                    return Err(Error::Config(
                        "host is required parameter for basic, jwt, x509 auth".into(),
                    ));
                }
                if self.token.is_empty() {
                    return Err(Error::Config("token is required for jwt auth".into()));
                }
            }
            AuthMechanism::X509 => {
                if self.host.is_empty() {
                    return Err(Error::Config(
                        "host is required parameter for basic, jwt, x509 auth".into(),
                    ));
                }
                if self.client_key_file_path.is_empty() {
                    return Err(Error::Config(
                        "client key file path is required for x509 auth".into(),
                    ));
                }
                if self.client_cert_file_path.is_empty() {
                    return Err(Error::Config(
                        "client cert file path is required for x509 auth".into(),
                    ));
                }
            }
        }

        Ok(())
    }
}

/// Source-side configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceConfig {
    /// Name of the table the iterator reads from.
    pub table: String,
    /// Column used for snapshot ordering; values must be unique and totally
    /// ordered.
    pub ordering_column: String,
    /// Columns used as record keys; defaults to the table's primary keys and
    /// then to the ordering column.
    #[serde(default)]
    pub primary_keys: Vec<String>,
    /// Whether to take a snapshot of the table before starting CDC.
    #[serde(default = "default_snapshot")]
    pub snapshot: bool,
    /// Page size for both iterators.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub auth: AuthConfig,
}

fn default_snapshot() -> bool {
    true
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

impl SourceConfig {
    pub fn validate(&self) -> Result<()> {
        if self.table.is_empty() {
            return Err(Error::Config("table is a required parameter".into()));
        }
        if self.ordering_column.is_empty() {
            return Err(Error::Config(
                "orderingColumn is a required parameter".into(),
            ));
        }
        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            return Err(Error::Config(format!(
                "batchSize must be greater than 0 and less than {}",
                MAX_BATCH_SIZE + 1
            )));
        }
        self.auth.validate()
    }

    /// Uppercases every identifier in place.
    pub fn normalize(&mut self) {
        self.table = self.table.to_uppercase();
        self.ordering_column = self.ordering_column.to_uppercase();
        for key in &mut self.primary_keys {
            *key = key.to_uppercase();
        }
    }
}

/// Destination-side configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DestinationConfig {
    /// Name of the table the writer writes to, unless a record overrides it.
    pub table: String,
    #[serde(default)]
    pub auth: AuthConfig,
}

impl DestinationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.table.is_empty() {
            return Err(Error::Config("table is a required parameter".into()));
        }
        self.auth.validate()
    }

    pub fn normalize(&mut self) {
        self.table = self.table.to_uppercase();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source_json(auth: &str) -> String {
        format!(
            r#"{{"table":"clients","orderingColumn":"id","auth":{auth}}}"#
        )
    }

    #[test]
    fn defaults_apply() {
        let cfg: SourceConfig =
            serde_json::from_str(&source_json(r#"{"dsn":"hdbsql://u:p@host:39017"}"#)).unwrap();
        assert!(cfg.snapshot);
        assert_eq!(cfg.batch_size, 1000);
        assert_eq!(cfg.auth.mechanism, AuthMechanism::Dsn);
        cfg.validate().unwrap();
    }

    #[test]
    fn normalize_uppercases_identifiers() {
        let mut cfg: SourceConfig = serde_json::from_str(
            r#"{"table":"clients","orderingColumn":"id","primaryKeys":["cl_tinyint"]}"#,
        )
        .unwrap();
        cfg.normalize();
        assert_eq!(cfg.table, "CLIENTS");
        assert_eq!(cfg.ordering_column, "ID");
        assert_eq!(cfg.primary_keys, vec!["CL_TINYINT".to_string()]);
    }

    #[test]
    fn dsn_requires_dsn() {
        let cfg: SourceConfig = serde_json::from_str(&source_json(r#"{}"#)).unwrap();
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn basic_requires_host_username_password() {
        for auth in [
            r#"{"mechanism":"Basic"}"#,
            r#"{"mechanism":"Basic","host":"h"}"#,
            r#"{"mechanism":"Basic","host":"h","username":"u"}"#,
        ] {
            let cfg: SourceConfig = serde_json::from_str(&source_json(auth)).unwrap();
            assert!(matches!(cfg.validate(), Err(Error::Config(_))), "{auth}");
        }

        let cfg: SourceConfig = serde_json::from_str(&source_json(
            r#"{"mechanism":"Basic","host":"h","username":"u","password":"p"}"#,
        ))
        .unwrap();
        cfg.validate().unwrap();
    }

    #[test]
    fn jwt_requires_host_and_token() {
        let cfg: SourceConfig =
            serde_json::from_str(&source_json(r#"{"mechanism":"JWT","host":"h"}"#)).unwrap();
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));

        let cfg: SourceConfig = serde_json::from_str(&source_json(
            r#"{"mechanism":"JWT","host":"h","token":"t"}"#,
        ))
        .unwrap();
        cfg.validate().unwrap();
    }

    #[test]
    fn x509_requires_cert_and_key() {
        let cfg: SourceConfig = serde_json::from_str(&source_json(
            r#"{"mechanism":"X509","host":"h","clientCertFilePath":"c.pem"}"#,
        ))
        .unwrap();
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));

        let cfg: SourceConfig = serde_json::from_str(&source_json(
            r#"{"mechanism":"X509","host":"h","clientCertFilePath":"c.pem","clientKeyFilePath":"k.pem"}"#,
        ))
        .unwrap();
        cfg.validate().unwrap();
    }

    #[test]
    fn unknown_mechanism_fails_to_parse() {
        let parsed: std::result::Result<SourceConfig, _> =
            serde_json::from_str(&source_json(r#"{"mechanism":"Kerberos"}"#));
        assert!(parsed.is_err());
    }

    #[test]
    fn batch_size_bounds() {
        let mut cfg: SourceConfig =
            serde_json::from_str(&source_json(r#"{"dsn":"x"}"#)).unwrap();
        cfg.batch_size = 0;
        assert!(cfg.validate().is_err());
        cfg.batch_size = 10001;
        assert!(cfg.validate().is_err());
        cfg.batch_size = 10000;
        cfg.validate().unwrap();
    }
}
