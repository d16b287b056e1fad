use std::collections::BTreeMap;
use std::time::Duration;

use rusqlite::types::{ToSql, ToSqlOutput};
use rusqlite::{params_from_iter, Connection, OpenFlags, OptionalExtension, Row};
use serde::Serialize;

use crate::config::DbConfig;
use crate::model::{Configuration, LegacyEnvironment, Platform};

/// Conservative bound-parameter ceiling for one statement.
pub const MAX_BOUND_PARAMS: usize = 999;

const CONFIGURATION_COLUMNS: usize = 14;

const LEGACY_COLUMNS: &str = "id, organization_id, name, created_at, updated_at, deleted_at, \
     platform, platform_type, udid, brand, os_name, os, os_version, browser, browser_version, \
     resolution, device, url, metadata, is_kane_supported, is_default, is_custom, is_complete, \
     private_cloud, configuration_id";

/// Opens an existing database. The file is never created here.
pub fn open_db(config: &DbConfig, busy_timeout: Duration) -> anyhow::Result<Connection> {
    let conn = Connection::open_with_flags(
        &config.name,
        OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    conn.busy_timeout(busy_timeout)?;
    Ok(conn)
}

/// Prepares the destination table and the back-link column on the source.
pub fn ensure_schema(conn: &Connection) -> anyhow::Result<()> {
    if !table_exists(conn, "test_environments")? {
        anyhow::bail!("source table test_environments not found");
    }

    conn.execute(
        "CREATE TABLE IF NOT EXISTS configurations(
            id INTEGER PRIMARY KEY,
            organization_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            platform TEXT NOT NULL DEFAULT 'custom',
            is_kane_supported INTEGER NOT NULL DEFAULT 0,
            is_manual_supported INTEGER NOT NULL DEFAULT 0,
            created_by INTEGER NOT NULL,
            updated_by INTEGER NOT NULL,
            is_default INTEGER NOT NULL DEFAULT 0,
            is_custom INTEGER NOT NULL DEFAULT 0,
            is_complete INTEGER NOT NULL DEFAULT 0,
            created_at TEXT,
            updated_at TEXT,
            deleted_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_configurations_org ON configurations(organization_id)",
        [],
    )?;

    // Older source tables predate the back-link.
    ensure_test_environments_configuration_id(conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_test_environments_configuration ON test_environments(configuration_id)",
        [],
    )?;

    Ok(())
}

fn ensure_test_environments_configuration_id(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "test_environments", "configuration_id")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE test_environments ADD COLUMN configuration_id INTEGER REFERENCES configurations(id)",
        [],
    )?;
    tracing::info!("added test_environments.configuration_id");
    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> anyhow::Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?",
            [table],
            |r| r.get::<_, i64>(0),
        )
        .optional()?;
    Ok(found.is_some())
}

pub fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn count_unmigrated(conn: &Connection) -> rusqlite::Result<u64> {
    conn.query_row(
        "SELECT COUNT(*) FROM test_environments WHERE configuration_id IS NULL",
        [],
        |r| r.get::<_, i64>(0),
    )
    .map(|n| n.max(0) as u64)
}

/// Unmigrated rows with `id > after_id`, ascending, at most `limit`.
pub fn fetch_unmigrated(
    conn: &Connection,
    after_id: i64,
    limit: usize,
) -> rusqlite::Result<Vec<LegacyEnvironment>> {
    let sql = format!(
        "SELECT {LEGACY_COLUMNS} FROM test_environments
         WHERE configuration_id IS NULL AND id > ?
         ORDER BY id
         LIMIT ?"
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt
        .query_map((after_id, limit as i64), legacy_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn legacy_from_row(row: &Row<'_>) -> rusqlite::Result<LegacyEnvironment> {
    let flag = |idx: usize| -> rusqlite::Result<bool> {
        Ok(row.get::<_, Option<bool>>(idx)?.unwrap_or(false))
    };
    Ok(LegacyEnvironment {
        id: row.get(0)?,
        organization_id: row.get(1)?,
        name: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
        deleted_at: row.get(5)?,
        platform: row.get(6)?,
        platform_type: row.get(7)?,
        udid: row.get(8)?,
        brand: row.get(9)?,
        os_name: row.get(10)?,
        os: row.get(11)?,
        os_version: row.get(12)?,
        browser: row.get(13)?,
        browser_version: row.get(14)?,
        resolution: row.get(15)?,
        device: row.get(16)?,
        url: row.get(17)?,
        metadata: row.get(18)?,
        is_kane_supported: flag(19)?,
        is_default: flag(20)?,
        is_custom: flag(21)?,
        is_complete: flag(22)?,
        private_cloud: flag(23)?,
        configuration_id: row.get(24)?,
    })
}

impl ToSql for Platform {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

/// Multi-row insert, split so no statement exceeds `MAX_BOUND_PARAMS`.
pub fn insert_configurations(conn: &Connection, configs: &[Configuration]) -> rusqlite::Result<usize> {
    let rows_per_stmt = (MAX_BOUND_PARAMS / CONFIGURATION_COLUMNS).max(1);
    let mut inserted = 0usize;

    for chunk in configs.chunks(rows_per_stmt) {
        let placeholders = vec!["(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"; chunk.len()].join(", ");
        let sql = format!(
            "INSERT INTO configurations(
                id, organization_id, name, platform, is_kane_supported, is_manual_supported,
                created_by, updated_by, is_default, is_custom, is_complete,
                created_at, updated_at, deleted_at)
             VALUES {placeholders}"
        );
        let mut params: Vec<&dyn ToSql> = Vec::with_capacity(chunk.len() * CONFIGURATION_COLUMNS);
        for c in chunk {
            let row: [&dyn ToSql; CONFIGURATION_COLUMNS] = [
                &c.id,
                &c.organization_id,
                &c.name,
                &c.platform,
                &c.is_kane_supported,
                &c.is_manual_supported,
                &c.created_by,
                &c.updated_by,
                &c.is_default,
                &c.is_custom,
                &c.is_complete,
                &c.created_at,
                &c.updated_at,
                &c.deleted_at,
            ];
            params.extend_from_slice(&row);
        }
        inserted += conn.execute(&sql, params_from_iter(params))?;
    }

    Ok(inserted)
}

/// Sets `configuration_id = id` on the given, still unlinked, source rows.
pub fn link_sources(conn: &Connection, ids: &[i64]) -> rusqlite::Result<usize> {
    let mut linked = 0usize;
    for chunk in ids.chunks(MAX_BOUND_PARAMS) {
        let placeholders = vec!["?"; chunk.len()].join(", ");
        let sql = format!(
            "UPDATE test_environments SET configuration_id = id
             WHERE configuration_id IS NULL AND id IN ({placeholders})"
        );
        linked += conn.execute(&sql, params_from_iter(chunk.iter()))?;
    }
    Ok(linked)
}

/// Links explicit legacy → configuration pairs. Already linked rows are left alone.
pub fn link_pairs(conn: &Connection, pairs: &BTreeMap<i64, i64>) -> rusqlite::Result<usize> {
    let mut stmt = conn.prepare(
        "UPDATE test_environments SET configuration_id = ?
         WHERE id = ? AND configuration_id IS NULL",
    )?;
    let mut linked = 0usize;
    for (legacy_id, configuration_id) in pairs {
        linked += stmt.execute((configuration_id, legacy_id))?;
    }
    Ok(linked)
}

/// Links every unlinked source row whose configuration already exists.
///
/// A configuration only counts as the row's own when organization and name
/// agree too. An unrelated row sharing the id is left alone so the next insert
/// of that id fails loudly.
pub fn link_orphans(conn: &Connection) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE test_environments SET configuration_id = id
         WHERE configuration_id IS NULL
           AND EXISTS (
               SELECT 1 FROM configurations c
               WHERE c.id = test_environments.id
                 AND c.organization_id = test_environments.organization_id
                 AND c.name = test_environments.name
           )",
        [],
    )
}

/// Consistency counters between the two tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct LinkAudit {
    pub configurations: u64,
    pub linked_sources: u64,
    /// Configurations with no source row of the same id.
    pub unmatched_configurations: u64,
    /// Configurations whose source row is still unlinked.
    pub unlinked_configurations: u64,
    /// Source back-links pointing at a missing or different configuration.
    pub broken_links: u64,
}

impl LinkAudit {
    pub fn is_consistent(&self) -> bool {
        self.unmatched_configurations == 0
            && self.unlinked_configurations == 0
            && self.broken_links == 0
    }
}

pub fn audit_links(conn: &Connection) -> rusqlite::Result<LinkAudit> {
    let count = |sql: &str| -> rusqlite::Result<u64> {
        conn.query_row(sql, [], |r| r.get::<_, i64>(0))
            .map(|n| n.max(0) as u64)
    };
    Ok(LinkAudit {
        configurations: count("SELECT COUNT(*) FROM configurations")?,
        linked_sources: count(
            "SELECT COUNT(*) FROM test_environments WHERE configuration_id IS NOT NULL",
        )?,
        unmatched_configurations: count(
            "SELECT COUNT(*) FROM configurations c
             WHERE NOT EXISTS (SELECT 1 FROM test_environments t WHERE t.id = c.id)",
        )?,
        unlinked_configurations: count(
            "SELECT COUNT(*) FROM configurations c
             JOIN test_environments t ON t.id = c.id
             WHERE t.configuration_id IS NULL",
        )?,
        broken_links: count(
            "SELECT COUNT(*) FROM test_environments t
             WHERE t.configuration_id IS NOT NULL
               AND (t.configuration_id <> t.id
                    OR NOT EXISTS (SELECT 1 FROM configurations c WHERE c.id = t.configuration_id))",
        )?,
    })
}
