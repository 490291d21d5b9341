//! Source iterators: a consistent snapshot of the table followed by a
//! trigger-journal CDC stream, behind one surface.

mod cdc;
mod journal;
mod snapshot;

use std::sync::Arc;

use chrono::Local;
use tracing::info;

use crate::client::Querier;
use crate::config::SourceConfig;
use crate::error::{Error, Result};
use crate::position::Position;
use crate::record::Record;
use crate::schema::TableInfo;

use cdc::{CdcIterator, CdcParams};
use journal::journal_table_name;
use snapshot::{SnapshotIterator, SnapshotParams};

pub use journal::{COLUMN_OPERATION_TYPE, COLUMN_TRACKING_ID};

/// The source's single public surface. Owns exactly one of the snapshot or
/// the CDC iterator; when the snapshot drains it is closed and replaced by a
/// freshly constructed CDC iterator.
///
/// Driven by one caller that alternates [`has_next`](Self::has_next) and
/// [`next`](Self::next); `has_next() == false` means "back off and poll
/// again", not end of stream.
pub struct CombinedIterator {
    querier: Arc<dyn Querier>,
    table: String,
    journal_table: String,
    journal_suffix: String,
    keys: Vec<String>,
    batch_size: usize,
    table_info: TableInfo,

    snapshot: Option<SnapshotIterator>,
    cdc: Option<CdcIterator>,
}

impl CombinedIterator {
    /// Validates and normalizes the configuration, derives the journal
    /// suffix, introspects the table, installs the journal and triggers, and
    /// constructs the right child for the given position.
    pub async fn open(
        querier: Arc<dyn Querier>,
        mut config: SourceConfig,
        raw_position: Option<&[u8]>,
    ) -> Result<CombinedIterator> {
        config.validate()?;
        config.normalize();

        let position = Position::decode(raw_position)?;
        let journal_suffix = match &position {
            Some(position) => position.journal_suffix().to_string(),
            None => Local::now().format("%H%M%S").to_string(),
        };
        let journal_table = journal_table_name(&config.table, &journal_suffix);

        let table_info = TableInfo::load(querier.as_ref(), &config.table).await?;
        let keys = select_keys(
            config.primary_keys.clone(),
            table_info.primary_keys.clone(),
            &config.ordering_column,
        );

        journal::setup_journal(
            querier.as_ref(),
            &config.table,
            &journal_table,
            &journal_suffix,
            &table_info,
        )
        .await?;

        let mut iterator = CombinedIterator {
            querier,
            table: config.table,
            journal_table,
            journal_suffix,
            keys,
            batch_size: config.batch_size,
            table_info,
            snapshot: None,
            cdc: None,
        };

        let start_with_snapshot = config.snapshot
            && (position.is_none() || matches!(position, Some(Position::Snapshot { .. })));

        if start_with_snapshot {
            iterator.snapshot = Some(
                SnapshotIterator::open(SnapshotParams {
                    querier: iterator.querier.clone(),
                    table: iterator.table.clone(),
                    ordering_column: config.ordering_column.clone(),
                    keys: iterator.keys.clone(),
                    batch_size: iterator.batch_size,
                    column_types: iterator.table_info.column_types.clone(),
                    journal_suffix: iterator.journal_suffix.clone(),
                    position,
                })
                .await?,
            );
            info!(table = %iterator.table, "starting with a snapshot");
        } else {
            iterator.cdc = Some(CdcIterator::open(CdcParams {
                querier: iterator.querier.clone(),
                table: iterator.table.clone(),
                journal_table: iterator.journal_table.clone(),
                keys: iterator.keys.clone(),
                batch_size: iterator.batch_size,
                column_types: iterator.table_info.column_types.clone(),
                journal_suffix: iterator.journal_suffix.clone(),
                position,
            }));
            info!(table = %iterator.table, "starting with change capture");
        }

        Ok(iterator)
    }

    /// Whether a record is ready. A drained snapshot switches to the CDC
    /// iterator and reports `false` once; the caller's next poll reads from
    /// the journal.
    pub async fn has_next(&mut self) -> Result<bool> {
        if let Some(snapshot) = self.snapshot.as_mut() {
            if snapshot.has_next().await? {
                return Ok(true);
            }
            self.switch_to_cdc();
            return Ok(false);
        }

        if let Some(cdc) = self.cdc.as_mut() {
            return cdc.has_next().await;
        }

        Ok(false)
    }

    pub async fn next(&mut self) -> Result<Record> {
        if let Some(snapshot) = self.snapshot.as_mut() {
            return snapshot.next().await;
        }
        if let Some(cdc) = self.cdc.as_mut() {
            return cdc.next().await;
        }

        Err(Error::NoInitializedIterator)
    }

    /// Routes an acknowledged position to the CDC child; snapshot positions
    /// need no acknowledgement.
    pub async fn ack(&mut self, raw_position: &[u8]) -> Result<()> {
        let Some(position) = Position::decode(Some(raw_position))? else {
            return Ok(());
        };

        if matches!(position, Position::Cdc { .. }) {
            if let Some(cdc) = self.cdc.as_mut() {
                return cdc.ack(&position);
            }
        }

        Ok(())
    }

    /// Stops whichever child is active.
    pub async fn stop(&mut self) -> Result<()> {
        if let Some(mut snapshot) = self.snapshot.take() {
            snapshot.close();
        }
        if let Some(mut cdc) = self.cdc.take() {
            cdc.stop().await?;
        }

        Ok(())
    }

    fn switch_to_cdc(&mut self) {
        if let Some(mut snapshot) = self.snapshot.take() {
            snapshot.close();
        }

        info!(table = %self.table, "snapshot finished, switching to change capture");
        self.cdc = Some(CdcIterator::open(CdcParams {
            querier: self.querier.clone(),
            table: self.table.clone(),
            journal_table: self.journal_table.clone(),
            keys: self.keys.clone(),
            batch_size: self.batch_size,
            column_types: self.table_info.column_types.clone(),
            journal_suffix: self.journal_suffix.clone(),
            position: None,
        }));
    }
}

/// Key column priority: configured keys, then the table's primary keys, then
/// the ordering column.
fn select_keys(
    configured: Vec<String>,
    table_primary_keys: Vec<String>,
    ordering_column: &str,
) -> Vec<String> {
    if !configured.is_empty() {
        return configured;
    }
    if !table_primary_keys.is_empty() {
        return table_primary_keys;
    }

    vec![ordering_column.to_string()]
}
