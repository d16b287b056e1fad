#![allow(dead_code)]

use std::path::Path;

use envconf_migrate::model::LegacyEnvironment;
use envconf_migrate::store;
use rusqlite::types::Value;
use rusqlite::Connection;

pub const LEGACY_DDL: &str = "CREATE TABLE test_environments(
    id INTEGER PRIMARY KEY,
    created_at TEXT,
    updated_at TEXT,
    deleted_at TEXT,
    configuration_id INTEGER,
    udid TEXT,
    platform_type TEXT,
    organization_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    brand TEXT,
    os_name TEXT,
    os TEXT,
    browser_version TEXT,
    resolution TEXT,
    browser TEXT,
    os_version TEXT,
    device TEXT,
    platform TEXT,
    url TEXT,
    is_custom INTEGER NOT NULL DEFAULT 0,
    is_complete INTEGER NOT NULL DEFAULT 0,
    is_kane_supported INTEGER NOT NULL DEFAULT 0,
    private_cloud INTEGER NOT NULL DEFAULT 0,
    is_default INTEGER NOT NULL DEFAULT 0,
    metadata TEXT
)";

fn prepare(conn: &Connection) {
    conn.execute("PRAGMA foreign_keys = ON", [])
        .expect("enable foreign keys");
    conn.execute(LEGACY_DDL, []).expect("create legacy table");
    store::ensure_schema(conn).expect("ensure schema");
}

pub fn memory_db() -> Connection {
    let conn = Connection::open_in_memory().expect("open in-memory db");
    prepare(&conn);
    conn
}

pub fn file_db(path: &Path) -> Connection {
    let conn = Connection::open(path).expect("open db file");
    prepare(&conn);
    conn
}

pub fn insert_env(conn: &Connection, env: &LegacyEnvironment) {
    conn.execute(
        "INSERT INTO test_environments(
            id, organization_id, name, created_at, updated_at, deleted_at, platform, browser, os,
            is_kane_supported, is_default, is_custom, is_complete, private_cloud, configuration_id)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            env.id,
            env.organization_id,
            env.name,
            env.created_at,
            env.updated_at,
            env.deleted_at,
            env.platform,
            env.browser,
            env.os,
            env.is_kane_supported,
            env.is_default,
            env.is_custom,
            env.is_complete,
            env.private_cloud,
            env.configuration_id,
        ],
    )
    .expect("insert legacy row");
}

/// Plain rows `first..=last`, org alternating between 5 and 7.
pub fn seed_range(conn: &Connection, first: i64, last: i64) {
    for id in first..=last {
        let org = if id % 2 == 0 { 5 } else { 7 };
        let mut env = LegacyEnvironment::new(id, org, format!("env-{id}"));
        env.platform = Some("Desktop".into());
        insert_env(conn, &env);
    }
}

pub fn count(conn: &Connection, sql: &str) -> i64 {
    conn.query_row(sql, [], |r| r.get(0)).expect("count query")
}

pub fn unmigrated(conn: &Connection) -> i64 {
    count(
        conn,
        "SELECT COUNT(*) FROM test_environments WHERE configuration_id IS NULL",
    )
}

pub fn configurations(conn: &Connection) -> i64 {
    count(conn, "SELECT COUNT(*) FROM configurations")
}

/// Every row of `table` rendered as text, ordered by id.
pub fn dump(conn: &Connection, table: &str) -> Vec<String> {
    let sql = format!("SELECT * FROM {table} ORDER BY id");
    let mut stmt = conn.prepare(&sql).expect("prepare dump");
    let cols = stmt.column_count();
    let rows = stmt
        .query_map([], |row| {
            let mut parts = Vec::with_capacity(cols);
            for i in 0..cols {
                let v: Value = row.get(i)?;
                parts.push(format!("{v:?}"));
            }
            Ok(parts.join("|"))
        })
        .expect("query dump")
        .collect::<Result<Vec<_>, _>>()
        .expect("collect dump");
    rows
}

/// Makes any insert of configuration `id` fail.
pub fn fail_insert_of(conn: &Connection, id: i64) {
    conn.execute_batch(&format!(
        "CREATE TRIGGER fail_insert BEFORE INSERT ON configurations
         WHEN NEW.id = {id}
         BEGIN SELECT RAISE(ABORT, 'injected insert failure'); END;"
    ))
    .expect("create insert trigger");
}

/// Makes linking source row `id` fail.
pub fn fail_link_of(conn: &Connection, id: i64) {
    conn.execute_batch(&format!(
        "CREATE TRIGGER fail_link BEFORE UPDATE OF configuration_id ON test_environments
         WHEN NEW.id = {id}
         BEGIN SELECT RAISE(ABORT, 'injected link failure'); END;"
    ))
    .expect("create link trigger");
}

pub fn drop_trigger(conn: &Connection, name: &str) {
    conn.execute_batch(&format!("DROP TRIGGER {name};"))
        .expect("drop trigger");
}
