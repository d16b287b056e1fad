//! Residual back-linking outside the per-page unit of work.
//!
//! `sweep_orphans` repairs configurations whose source row was never linked
//! (a deferred run that died before its final pass). `reconcile` is that final
//! pass for `LinkMode::Deferred`.

use std::collections::BTreeMap;

use rusqlite::{Connection, Transaction, TransactionBehavior};

use crate::error::{MigrationError, Phase};
use crate::store;

/// Legacy id → configuration id, accumulated by a deferred run.
pub type LinkMap = BTreeMap<i64, i64>;

pub fn reconcile(conn: &Connection, pairs: &LinkMap) -> Result<usize, MigrationError> {
    if pairs.is_empty() {
        return Ok(0);
    }
    let linked = in_own_transaction(conn, Phase::Reconcile, |tx| store::link_pairs(tx, pairs))?;
    if linked != pairs.len() {
        tracing::warn!(
            expected = pairs.len(),
            linked,
            "some accumulated pairs were already linked"
        );
    }
    tracing::info!(linked, "reconciled deferred back-links");
    Ok(linked)
}

pub fn sweep_orphans(conn: &Connection) -> Result<usize, MigrationError> {
    let linked = in_own_transaction(conn, Phase::Sweep, |tx| store::link_orphans(tx))?;
    if linked > 0 {
        tracing::warn!(linked, "linked orphaned configurations");
    }
    Ok(linked)
}

fn in_own_transaction<T, F>(conn: &Connection, phase: Phase, work: F) -> Result<T, MigrationError>
where
    F: FnOnce(&Transaction<'_>) -> rusqlite::Result<T>,
{
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)
        .map_err(MigrationError::store(Phase::Begin, None))?;
    match work(&tx) {
        Ok(v) => {
            tx.commit().map_err(MigrationError::store(Phase::Commit, None))?;
            Ok(v)
        }
        Err(e) => {
            if let Err(rollback_err) = tx.rollback() {
                tracing::error!(%phase, "rollback failed: {rollback_err}");
            }
            Err(MigrationError::store(phase, None)(e))
        }
    }
}
