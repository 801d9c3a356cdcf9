//! Round-trip boundary between a session and its backend.
//!
//! # Responsibility
//! - Check cancellation and the per-round-trip deadline around every
//!   backend call.
//! - Count round trips and rows read for [`SessionStats`].
//! - Emit one `round_trip` log event per backend call.
//!
//! # Invariants
//! - A cancelled round trip never reaches the backend.
//! - A round trip exceeding its deadline returns `TimedOut` and its rows
//!   are discarded; inside a transaction the caller drops the transaction.

use crate::error::{StoreError, StoreResult};
use crate::store::{Backend, BackendTransaction, ReadRequest, Row, WriteBatch};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cancellation flag shared between a session and any other thread.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Re-arms the token so later round trips proceed.
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Round-trip counters of one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    pub round_trips: u64,
    pub rows_read: u64,
    pub rows_written: u64,
}

#[derive(Debug)]
pub(crate) struct Gateway {
    cancellation: CancellationToken,
    timeout: Option<Duration>,
    stats: SessionStats,
}

impl Gateway {
    pub(crate) fn new(cancellation: CancellationToken, timeout: Option<Duration>) -> Self {
        Self {
            cancellation,
            timeout,
            stats: SessionStats::default(),
        }
    }

    pub(crate) fn stats(&self) -> SessionStats {
        self.stats
    }

    pub(crate) fn reset_stats(&mut self) {
        self.stats = SessionStats::default();
    }

    pub(crate) fn read(
        &mut self,
        backend: &dyn Backend,
        request: &ReadRequest,
    ) -> StoreResult<Vec<Row>> {
        self.ensure_not_cancelled()?;
        let started_at = Instant::now();
        let result = backend.execute_read(request);
        self.finish_read(request, started_at, result)
    }

    pub(crate) fn read_in(
        &mut self,
        tx: &mut dyn BackendTransaction,
        request: &ReadRequest,
    ) -> StoreResult<Vec<Row>> {
        self.ensure_not_cancelled()?;
        let started_at = Instant::now();
        let result = tx.execute_read(request);
        self.finish_read(request, started_at, result)
    }

    pub(crate) fn write_in(
        &mut self,
        tx: &mut dyn BackendTransaction,
        batch: &WriteBatch,
    ) -> StoreResult<usize> {
        self.ensure_not_cancelled()?;
        let started_at = Instant::now();
        self.stats.round_trips += 1;
        let affected = match tx.execute_write(batch) {
            Ok(affected) => affected,
            Err(err) => {
                warn!(
                    "event=round_trip module=session status=error request=write ops={} duration_ms={} error={}",
                    batch.len(),
                    started_at.elapsed().as_millis(),
                    err
                );
                return Err(err);
            }
        };
        self.check_deadline(started_at)?;
        self.stats.rows_written += affected as u64;
        debug!(
            "event=round_trip module=session status=ok request=write ops={} affected={} duration_ms={}",
            batch.len(),
            affected,
            started_at.elapsed().as_millis()
        );
        Ok(affected)
    }

    /// Opens a write transaction after the cancellation check.
    pub(crate) fn begin<'a>(
        &mut self,
        backend: &'a dyn Backend,
    ) -> StoreResult<Box<dyn BackendTransaction + 'a>> {
        self.ensure_not_cancelled()?;
        backend.begin_transaction()
    }

    pub(crate) fn commit(&mut self, tx: Box<dyn BackendTransaction + '_>) -> StoreResult<()> {
        self.ensure_not_cancelled()?;
        tx.commit()
    }

    fn finish_read(
        &mut self,
        request: &ReadRequest,
        started_at: Instant,
        result: StoreResult<Vec<Row>>,
    ) -> StoreResult<Vec<Row>> {
        self.stats.round_trips += 1;
        let rows = match result {
            Ok(rows) => rows,
            Err(err) => {
                warn!(
                    "event=round_trip module=session status=error request={} duration_ms={} error={}",
                    request.label(),
                    started_at.elapsed().as_millis(),
                    err
                );
                return Err(err);
            }
        };
        self.check_deadline(started_at)?;
        self.stats.rows_read += rows.len() as u64;
        debug!(
            "event=round_trip module=session status=ok request={} rows={} duration_ms={}",
            request.label(),
            rows.len(),
            started_at.elapsed().as_millis()
        );
        Ok(rows)
    }

    fn ensure_not_cancelled(&self) -> StoreResult<()> {
        if self.cancellation.is_cancelled() {
            debug!("event=round_trip module=session status=cancelled");
            return Err(StoreError::Cancelled);
        }
        Ok(())
    }

    fn check_deadline(&self, started_at: Instant) -> StoreResult<()> {
        let Some(limit) = self.timeout else {
            return Ok(());
        };
        let elapsed = started_at.elapsed();
        if elapsed > limit {
            warn!(
                "event=round_trip module=session status=timeout duration_ms={} limit_ms={}",
                elapsed.as_millis(),
                limit.as_millis()
            );
            return Err(StoreError::TimedOut {
                elapsed_ms: elapsed.as_millis(),
                limit_ms: limit.as_millis(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{CancellationToken, Gateway};
    use crate::error::StoreError;
    use crate::model::value::EntityKind;
    use crate::store::{QueryPlan, ReadRequest, Selection, SqliteBackend};
    use std::time::Duration;

    fn count_request() -> ReadRequest {
        ReadRequest::Query(QueryPlan {
            root: EntityKind::Tag,
            filters: Vec::new(),
            order: Vec::new(),
            skip: None,
            take: None,
            selection: Selection::Count,
        })
    }

    #[test]
    fn cancelled_token_blocks_round_trips() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        let token = CancellationToken::new();
        let mut gateway = Gateway::new(token.clone(), None);

        gateway.read(&backend, &count_request()).unwrap();
        token.cancel();
        assert!(matches!(
            gateway.read(&backend, &count_request()),
            Err(StoreError::Cancelled)
        ));
        assert_eq!(gateway.stats().round_trips, 1);

        token.reset();
        gateway.read(&backend, &count_request()).unwrap();
        assert_eq!(gateway.stats().round_trips, 2);
    }

    #[test]
    fn zero_deadline_times_out() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        let mut gateway = Gateway::new(CancellationToken::new(), Some(Duration::ZERO));
        assert!(matches!(
            gateway.read(&backend, &count_request()),
            Err(StoreError::TimedOut { .. })
        ));
    }
}
