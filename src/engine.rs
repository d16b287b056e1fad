//! Batched, resumable copy of `test_environments` into `configurations`.
//!
//! One page is one `BEGIN IMMEDIATE` transaction: fetch, transform, batched
//! insert, back-link, commit. Any failure rolls the page back and aborts the
//! run. Re-running picks up wherever the back-link column says work remains.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, DropBehavior, Transaction, TransactionBehavior};
use serde::Serialize;

use crate::cursor::{BatchCursor, DEFAULT_PAGE_SIZE};
use crate::error::{Aborted, MigrationError, Phase};
use crate::model::Configuration;
use crate::owners::OwnerDirectory;
use crate::reconcile::{self, LinkMap};
use crate::store::{self, LinkAudit};
use crate::transform::transform;

/// When source rows get their back-link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LinkMode {
    /// Inside each page's transaction, together with the inserts.
    #[default]
    PerPage,
    /// After each full pass over the ids. A crash in between leaves orphaned
    /// configurations until the next run's sweep links them.
    Deferred,
}

impl LinkMode {
    pub fn as_str(self) -> &'static str {
        match self {
            LinkMode::PerPage => "per-page",
            LinkMode::Deferred => "deferred",
        }
    }
}

impl fmt::Display for LinkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LinkMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "per-page" | "per_page" | "atomic" => Ok(LinkMode::PerPage),
            "deferred" => Ok(LinkMode::Deferred),
            other => Err(format!("expected per-page or deferred, got {other:?}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    pub page_size: usize,
    /// Sleep after each committed page. Throttling only.
    pub pause: Duration,
    pub link_mode: LinkMode,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            pause: Duration::ZERO,
            link_mode: LinkMode::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Sweeping,
    FetchingPage,
    TransformingPage,
    Persisting,
    Linking,
    Committing,
    Reporting,
    Reconciling,
    Drained,
    Aborted,
}

/// Emitted after every committed page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageReport {
    pub page: u64,
    pub ids: Vec<i64>,
    pub processed: u64,
    pub total: u64,
    pub fallback_rows: usize,
}

impl PageReport {
    pub fn rows(&self) -> usize {
        self.ids.len()
    }

    pub fn percent(&self) -> f64 {
        percent(self.processed, self.total)
    }
}

/// Share of `total` done. An empty run counts as complete.
pub fn percent(processed: u64, total: u64) -> f64 {
    if total == 0 {
        return 100.0;
    }
    processed as f64 / total as f64 * 100.0
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub processed: u64,
    pub pages: u64,
    pub passes: u32,
    pub total_at_start: u64,
    pub link_mode: LinkMode,
    pub fallback_rows: u64,
    pub fallback_organizations: Vec<i64>,
    pub swept_before: usize,
    pub swept_after: usize,
    pub reconciled: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit: Option<LinkAudit>,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

struct PageOutcome {
    ids: Vec<i64>,
    fallback_orgs: Vec<i64>,
}

#[derive(Default)]
struct Tally {
    processed: u64,
    pages: u64,
    fallback_rows: u64,
    fallback_orgs: BTreeSet<i64>,
    pending: LinkMap,
}

pub struct MigrationEngine<'a> {
    conn: &'a Connection,
    owners: &'a OwnerDirectory,
    options: EngineOptions,
    state: EngineState,
    observer: Option<Box<dyn FnMut(&PageReport) + 'a>>,
}

impl<'a> MigrationEngine<'a> {
    pub fn new(conn: &'a Connection, owners: &'a OwnerDirectory, options: EngineOptions) -> Self {
        Self {
            conn,
            owners,
            options,
            state: EngineState::Idle,
            observer: None,
        }
    }

    /// Registers a callback invoked with each committed page's report.
    pub fn on_page<F>(mut self, observer: F) -> Self
    where
        F: FnMut(&PageReport) + 'a,
    {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn run(&mut self) -> Result<RunSummary, Aborted> {
        let started = Instant::now();
        let mut tally = Tally::default();

        match self.drive(&mut tally, started) {
            Ok(summary) => {
                self.state = EngineState::Drained;
                tracing::info!(
                    processed = summary.processed,
                    pages = summary.pages,
                    elapsed_ms = summary.elapsed_ms,
                    "migration drained"
                );
                Ok(summary)
            }
            Err(source) => {
                self.salvage_pending(&mut tally);
                self.state = EngineState::Aborted;
                tracing::error!(
                    processed = tally.processed,
                    pages = tally.pages,
                    code = source.code(),
                    "migration aborted: {source}"
                );
                Err(Aborted {
                    processed: tally.processed,
                    pages_committed: tally.pages,
                    source,
                })
            }
        }
    }

    fn drive(&mut self, tally: &mut Tally, started: Instant) -> Result<RunSummary, MigrationError> {
        let started_at = Utc::now();
        let deferred = self.options.link_mode == LinkMode::Deferred;

        // Only a deferred run can leave its own configurations unlinked.
        let swept_before = if deferred {
            self.state = EngineState::Sweeping;
            reconcile::sweep_orphans(self.conn)?
        } else {
            0
        };

        let total = store::count_unmigrated(self.conn)
            .map_err(MigrationError::store(Phase::Count, None))?;
        tracing::info!(
            total,
            page_size = self.options.page_size,
            link_mode = %self.options.link_mode,
            "starting migration"
        );

        // Each pass walks the ids once. Rows inserted behind the cursor are
        // found by the next pass, which starts over; an empty pass ends the run.
        let mut reconciled = 0usize;
        let mut passes = 0u32;
        loop {
            passes += 1;
            let fetched = self.run_pass(tally, total)?;

            if deferred {
                self.state = EngineState::Reconciling;
                reconciled += reconcile::reconcile(self.conn, &tally.pending)?;
                tally.pending.clear();
            }
            if fetched == 0 {
                break;
            }
            tracing::debug!(pass = passes, fetched, "rescanning for rows behind the cursor");
        }

        let swept_after = if deferred {
            self.state = EngineState::Sweeping;
            reconcile::sweep_orphans(self.conn)?
        } else {
            0
        };

        let audit = match store::audit_links(self.conn) {
            Ok(audit) => {
                if !audit.is_consistent() {
                    tracing::warn!(?audit, "link audit found inconsistencies");
                }
                Some(audit)
            }
            Err(e) => {
                tracing::warn!("link audit failed: {e}");
                None
            }
        };

        Ok(RunSummary {
            processed: tally.processed,
            pages: tally.pages,
            passes,
            total_at_start: total,
            link_mode: self.options.link_mode,
            fallback_rows: tally.fallback_rows,
            fallback_organizations: tally.fallback_orgs.iter().copied().collect(),
            swept_before,
            swept_after,
            reconciled,
            audit,
            started_at,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// One keyset walk over the unmigrated rows. Returns the rows migrated.
    fn run_pass(&mut self, tally: &mut Tally, total: u64) -> Result<u64, MigrationError> {
        let mut cursor = BatchCursor::new(self.options.page_size);
        let mut fetched = 0u64;
        loop {
            let page = tally.pages + 1;
            let span = tracing::info_span!("page", page);
            let _guard = span.enter();

            let Some(outcome) = self.migrate_page(&cursor, page)? else {
                tracing::info!("no more records to process");
                break;
            };
            let Some(&last_id) = outcome.ids.last() else {
                break;
            };
            cursor.advance(last_id);
            fetched += outcome.ids.len() as u64;
            self.record_page(tally, page, total, outcome);

            if !self.options.pause.is_zero() {
                std::thread::sleep(self.options.pause);
            }
        }
        Ok(fetched)
    }

    /// One atomic unit of work. `None` when the cursor is exhausted.
    fn migrate_page(
        &mut self,
        cursor: &BatchCursor,
        page: u64,
    ) -> Result<Option<PageOutcome>, MigrationError> {
        self.state = EngineState::FetchingPage;
        let mut tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)
            .map_err(MigrationError::store(Phase::Begin, Some(page)))?;
        // A failed commit consumes the transaction; dropping it must undo the page.
        tx.set_drop_behavior(DropBehavior::Rollback);

        match self.page_work(&tx, cursor, page) {
            Ok(Some(outcome)) => {
                self.state = EngineState::Committing;
                tx.commit()
                    .map_err(MigrationError::store(Phase::Commit, Some(page)))?;
                Ok(Some(outcome))
            }
            Ok(None) => {
                // Nothing was written; a failed release only needs a note.
                if let Err(rollback_err) = tx.rollback() {
                    tracing::warn!(page, "releasing empty page failed: {rollback_err}");
                }
                Ok(None)
            }
            Err(e) => {
                match tx.rollback() {
                    Ok(()) => tracing::warn!(page, "rolled back page"),
                    Err(rollback_err) => {
                        tracing::error!(page, "rollback failed: {rollback_err}")
                    }
                }
                Err(e)
            }
        }
    }

    fn page_work(
        &mut self,
        tx: &Transaction<'_>,
        cursor: &BatchCursor,
        page: u64,
    ) -> Result<Option<PageOutcome>, MigrationError> {
        let rows = cursor
            .next_page(tx)
            .map_err(MigrationError::store(Phase::Fetch, Some(page)))?;
        if rows.is_empty() {
            return Ok(None);
        }
        tracing::debug!(rows = rows.len(), "fetched page");

        self.state = EngineState::TransformingPage;
        let owners = self.owners;
        let mut fallback_orgs = Vec::new();
        let configs: Vec<Configuration> = rows
            .iter()
            .map(|env| {
                let owner = owners.resolve(env.organization_id);
                if owner.is_fallback() {
                    fallback_orgs.push(env.organization_id);
                }
                transform(env, owner.owner_id())
            })
            .collect();

        self.state = EngineState::Persisting;
        store::insert_configurations(tx, &configs)
            .map_err(MigrationError::store(Phase::Persist, Some(page)))?;
        let ids: Vec<i64> = configs.iter().map(|c| c.id).collect();

        if self.options.link_mode == LinkMode::PerPage {
            self.state = EngineState::Linking;
            let linked = store::link_sources(tx, &ids)
                .map_err(MigrationError::store(Phase::Link, Some(page)))?;
            if linked != ids.len() {
                return Err(MigrationError::LinkMismatch {
                    page,
                    expected: ids.len(),
                    linked,
                });
            }
        }

        Ok(Some(PageOutcome { ids, fallback_orgs }))
    }

    fn record_page(&mut self, tally: &mut Tally, page: u64, total: u64, outcome: PageOutcome) {
        self.state = EngineState::Reporting;
        tally.processed += outcome.ids.len() as u64;
        tally.pages += 1;
        tally.fallback_rows += outcome.fallback_orgs.len() as u64;
        for org in &outcome.fallback_orgs {
            if tally.fallback_orgs.insert(*org) {
                tracing::warn!(
                    org = *org,
                    owner = self.owners.fallback_owner(),
                    "no owner mapped for organization, using fallback"
                );
            }
        }
        if self.options.link_mode == LinkMode::Deferred {
            tally.pending.extend(outcome.ids.iter().map(|id| (*id, *id)));
        }

        let report = PageReport {
            page,
            ids: outcome.ids,
            processed: tally.processed,
            total,
            fallback_rows: outcome.fallback_orgs.len(),
        };
        tracing::info!(
            rows = report.rows(),
            processed = report.processed,
            total,
            percent = %format!("{:.2}", report.percent()),
            "page committed"
        );
        if let Some(observer) = self.observer.as_mut() {
            observer(&report);
        }
    }

    /// Deferred runs link what they committed before giving up.
    fn salvage_pending(&mut self, tally: &mut Tally) {
        if tally.pending.is_empty() {
            return;
        }
        self.state = EngineState::Reconciling;
        match reconcile::reconcile(self.conn, &tally.pending) {
            Ok(linked) => {
                tracing::warn!(linked, "linked committed pages before aborting");
                tally.pending.clear();
            }
            Err(e) => tracing::error!(
                pending = tally.pending.len(),
                "could not link committed pages, next run will sweep them: {e}"
            ),
        }
    }
}
