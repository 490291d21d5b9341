//! Change data capture core for SAP HANA.
//!
//! The source side delivers an initial consistent snapshot of one table
//! followed by an ongoing stream of row-level insert, update and delete
//! events. The database has no native logical replication, so changes are
//! captured through a shadow journal populated by server-side triggers:
//!
//! - [`CombinedIterator`] pages through a frozen snapshot cut of the table,
//!   then transparently switches to paging the journal in tracking-id order.
//! - Positions are opaque, self-describing tokens ([`Position`]); resuming
//!   from a persisted position continues the same snapshot cut or journal
//!   offset exactly.
//! - Acknowledged journal rows are reclaimed by a background task; delivery
//!   is at-least-once, so downstream consumers must be idempotent on keys.
//!
//! The destination side ([`Writer`]) applies records by key with
//! parameterized INSERT/UPDATE/DELETE statements.
//!
//! All database access goes through the [`Querier`] trait; `connect` yields
//! the real driver-backed implementation, and `testing::ScriptedQuerier`
//! stands in for tests.
//!
//! The journal table (`CONDUIT_{TABLE}_{HHMMSS}`) and its triggers are
//! deliberately not removed on teardown; operators drop them when the
//! pipeline is retired, and schema changes on the source table must be
//! mirrored to the journal by hand.

pub mod client;
pub mod config;
pub mod destination;
pub mod error;
pub mod position;
pub mod record;
pub mod schema;
pub mod source;
pub mod sql;
pub mod testing;
pub mod value;

pub use client::{connect, HanaClient, Querier, Row, Statement};
pub use config::{AuthConfig, AuthMechanism, DestinationConfig, SourceConfig};
pub use destination::Writer;
pub use error::{Error, Result};
pub use position::Position;
pub use record::{Operation, Record, METADATA_TABLE};
pub use schema::TableInfo;
pub use source::CombinedIterator;
pub use value::Value;
