//! CDC iterator and its reclaim service.
//!
//! The iterator pages the journal in tracking-id order, which matches commit
//! order, and turns each row into a create/update/delete record. Delivery is
//! at-least-once: journal rows are only removed after the host acknowledges
//! their position, by a background reclaim task that drains acknowledged ids
//! on a timer and once more on stop.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::journal::{
    COLUMN_OPERATION_TYPE, COLUMN_TRACKING_ID, OPERATION_DELETE, OPERATION_INSERT,
    OPERATION_UPDATE,
};
use crate::client::{Querier, Row, Statement};
use crate::error::{Error, Result};
use crate::position::Position;
use crate::record::{Record, METADATA_TABLE};
use crate::sql::{build_delete_in, build_select_page};
use crate::value::{normalize_row, Value};

const RECLAIM_INTERVAL: Duration = Duration::from_secs(5);
const STOP_TIMEOUT: Duration = Duration::from_secs(20);

pub(crate) struct CdcIterator {
    querier: Arc<dyn Querier>,
    table: String,
    journal_table: String,
    keys: Vec<String>,
    batch_size: usize,
    column_types: BTreeMap<String, String>,
    journal_suffix: String,

    last_tracking_id: Option<i64>,
    batch: VecDeque<Row>,

    /// Ids acknowledged by the host, waiting for the next reclaim drain.
    pending_acks: Arc<Mutex<Vec<i64>>>,
    stop_tx: Option<oneshot::Sender<()>>,
    done_rx: Option<oneshot::Receiver<()>>,
    error_rx: mpsc::Receiver<Error>,
    reclaim_task: Option<JoinHandle<()>>,
}

pub(crate) struct CdcParams {
    pub querier: Arc<dyn Querier>,
    pub table: String,
    pub journal_table: String,
    pub keys: Vec<String>,
    pub batch_size: usize,
    pub column_types: BTreeMap<String, String>,
    pub journal_suffix: String,
    pub position: Option<Position>,
}

impl CdcIterator {
    /// Builds the iterator and starts its reclaim task.
    pub fn open(params: CdcParams) -> Self {
        let last_tracking_id = match params.position {
            Some(Position::Cdc {
                last_tracking_id, ..
            }) => Some(last_tracking_id),
            _ => None,
        };

        let pending_acks = Arc::new(Mutex::new(Vec::new()));
        let (stop_tx, stop_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();
        let (error_tx, error_rx) = mpsc::channel(1);

        let reclaim_task = tokio::spawn(reclaim_loop(
            params.querier.clone(),
            params.journal_table.clone(),
            pending_acks.clone(),
            stop_rx,
            done_tx,
            error_tx,
        ));

        Self {
            querier: params.querier,
            table: params.table,
            journal_table: params.journal_table,
            keys: params.keys,
            batch_size: params.batch_size,
            column_types: params.column_types,
            journal_suffix: params.journal_suffix,
            last_tracking_id,
            batch: VecDeque::new(),
            pending_acks,
            stop_tx: Some(stop_tx),
            done_rx: Some(done_rx),
            error_rx,
            reclaim_task: Some(reclaim_task),
        }
    }

    pub async fn has_next(&mut self) -> Result<bool> {
        if !self.batch.is_empty() {
            return Ok(true);
        }

        self.load_batch().await?;

        // an empty journal is not an error; the caller backs off and retries
        Ok(!self.batch.is_empty())
    }

    pub async fn next(&mut self) -> Result<Record> {
        let row = self.batch.pop_front().ok_or(Error::NoNextRecord)?;
        let mut row = normalize_row(&self.column_types, row)?;

        let tracking_id = row
            .remove(COLUMN_TRACKING_ID)
            .as_ref()
            .and_then(Value::as_i64)
            .ok_or(Error::WrongTrackingIdType)?;
        let operation_type = match row.remove(COLUMN_OPERATION_TYPE) {
            Some(Value::String(s)) => s,
            Some(Value::Bytes(b)) => String::from_utf8(b)
                .map_err(|_| Error::UnknownOperatorType("<binary>".into()))?,
            other => return Err(Error::UnknownOperatorType(format!("{other:?}"))),
        };

        let position = Position::Cdc {
            last_tracking_id: tracking_id,
            journal_suffix: self.journal_suffix.clone(),
        };
        self.last_tracking_id = Some(tracking_id);

        let mut key = BTreeMap::new();
        for key_column in &self.keys {
            let value = row
                .get(key_column)
                .cloned()
                .ok_or_else(|| Error::MissingKey(key_column.clone()))?;
            key.insert(key_column.clone(), value);
        }

        let metadata = BTreeMap::from([(METADATA_TABLE.to_string(), self.table.clone())]);

        match operation_type.as_str() {
            OPERATION_INSERT => {
                let payload = serde_json::to_vec(&row)?;
                Ok(Record::create(position, metadata, key, payload))
            }
            OPERATION_UPDATE => {
                // after image only; the journal has no before image
                let payload = serde_json::to_vec(&row)?;
                Ok(Record::update(position, metadata, key, payload))
            }
            OPERATION_DELETE => Ok(Record::delete(position, metadata, key)),
            other => Err(Error::UnknownOperatorType(other.to_string())),
        }
    }

    /// Buffers an acknowledged CDC position for the reclaim task. Surfaces a
    /// stashed reclaim error, if any.
    pub fn ack(&mut self, position: &Position) -> Result<()> {
        if let Ok(err) = self.error_rx.try_recv() {
            return Err(err);
        }

        if let Position::Cdc {
            last_tracking_id, ..
        } = position
        {
            self.pending_acks.lock().unwrap().push(*last_tracking_id);
        }

        Ok(())
    }

    /// Stops the reclaim task, waits up to the stop timeout for its final
    /// drain, and releases the cursor. Data safety is unaffected by a
    /// timeout; unreclaimed journal rows are re-emitted on the next run.
    pub async fn stop(&mut self) -> Result<()> {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        self.batch.clear();

        if let Some(done_rx) = self.done_rx.take() {
            match tokio::time::timeout(STOP_TIMEOUT, done_rx).await {
                Ok(_) => debug!("reclaim drain finished, journal is clear"),
                Err(_) => warn!("closing before the reclaim drain finished"),
            }
        }
        if let Some(task) = self.reclaim_task.take() {
            task.abort();
        }

        Ok(())
    }

    async fn load_batch(&mut self) -> Result<()> {
        let (predicate, params) = match self.last_tracking_id {
            Some(last) => (
                Some(format!("{COLUMN_TRACKING_ID} > ?")),
                vec![Value::Int64(last)],
            ),
            None => (None, vec![]),
        };

        let sql = build_select_page(
            &self.journal_table,
            predicate.as_deref(),
            COLUMN_TRACKING_ID,
            self.batch_size,
        );
        let rows = self.querier.query(&sql, &params).await?;
        self.batch = rows.into();

        Ok(())
    }
}

/// Background worker: on every tick, and once more on stop, deletes the
/// acknowledged journal rows in one transaction.
async fn reclaim_loop(
    querier: Arc<dyn Querier>,
    journal_table: String,
    pending_acks: Arc<Mutex<Vec<i64>>>,
    mut stop_rx: oneshot::Receiver<()>,
    done_tx: oneshot::Sender<()>,
    error_tx: mpsc::Sender<Error>,
) {
    loop {
        let stopping = tokio::select! {
            _ = &mut stop_rx => true,
            _ = tokio::time::sleep(RECLAIM_INTERVAL) => false,
        };

        if let Err(e) = drain(querier.as_ref(), &journal_table, &pending_acks).await {
            warn!(error = %e, "clearing the journal table failed");
            let _ = error_tx.try_send(e);
            if !stopping {
                return;
            }
        }

        if stopping {
            let _ = done_tx.send(());
            return;
        }
    }
}

async fn drain(
    querier: &dyn Querier,
    journal_table: &str,
    pending_acks: &Mutex<Vec<i64>>,
) -> Result<()> {
    let ids = std::mem::take(&mut *pending_acks.lock().unwrap());
    if ids.is_empty() {
        return Ok(());
    }

    let statement = Statement::new(
        build_delete_in(journal_table, COLUMN_TRACKING_ID, ids.len()),
        ids.iter().map(|id| Value::Int64(*id)).collect(),
    );
    querier.execute_transaction(&[statement]).await?;
    debug!(count = ids.len(), "reclaimed acknowledged journal rows");

    Ok(())
}
