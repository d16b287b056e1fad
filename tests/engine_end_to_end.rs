mod common;

use envconf_migrate::engine::EngineState;
use envconf_migrate::model::LegacyEnvironment;
use envconf_migrate::{EngineOptions, MigrationEngine, OwnerDirectory, PageReport};
use rusqlite::types::Value;

fn ts(h: u32) -> Value {
    Value::Text(format!("2024-02-29 {h:02}:15:00"))
}

fn options(page_size: usize) -> EngineOptions {
    EngineOptions {
        page_size,
        ..EngineOptions::default()
    }
}

#[test]
fn three_rows_in_pages_of_two() {
    let conn = common::memory_db();
    for (id, org) in [(10, 5), (11, 7), (12, 5)] {
        let mut env = LegacyEnvironment::new(id, org, format!("env-{id}"));
        env.created_at = ts(1);
        env.updated_at = ts(2);
        common::insert_env(&conn, &env);
    }
    let owners = OwnerDirectory::parse("admin_id,org_id\n42,7\nnot-a-number,5\n", 1);

    let mut reports: Vec<PageReport> = Vec::new();
    let summary = {
        let mut engine = MigrationEngine::new(&conn, &owners, options(2))
            .on_page(|r| reports.push(r.clone()));
        let summary = engine.run().expect("migration succeeds");
        assert_eq!(engine.state(), EngineState::Drained);
        summary
    };

    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].ids, vec![10, 11]);
    assert_eq!(reports[0].processed, 2);
    assert_eq!(reports[0].total, 3);
    assert_eq!(reports[1].ids, vec![12]);
    assert_eq!(reports[1].processed, 3);
    assert!((reports[1].percent() - 100.0).abs() < 1e-9);

    assert_eq!(summary.processed, 3);
    assert_eq!(summary.pages, 2);
    assert_eq!(summary.total_at_start, 3);
    assert_eq!(summary.fallback_rows, 2);
    assert_eq!(summary.fallback_organizations, vec![5]);
    let audit = summary.audit.expect("audit ran");
    assert!(audit.is_consistent(), "{audit:?}");
    assert_eq!(audit.configurations, 3);
    assert_eq!(audit.linked_sources, 3);

    let mut stmt = conn
        .prepare("SELECT id, created_by, updated_by FROM configurations ORDER BY id")
        .expect("prepare");
    let owners_by_id: Vec<(i64, i64, i64)> = stmt
        .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))
        .expect("query")
        .collect::<Result<_, _>>()
        .expect("collect");
    assert_eq!(owners_by_id, vec![(10, 1, 1), (11, 42, 42), (12, 1, 1)]);

    let links: Vec<(i64, Option<i64>)> = conn
        .prepare("SELECT id, configuration_id FROM test_environments ORDER BY id")
        .expect("prepare")
        .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))
        .expect("query")
        .collect::<Result<_, _>>()
        .expect("collect");
    assert_eq!(links, vec![(10, Some(10)), (11, Some(11)), (12, Some(12))]);

    let (created, updated): (Value, Value) = conn
        .query_row(
            "SELECT created_at, updated_at FROM configurations WHERE id = 11",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .expect("timestamps");
    assert_eq!(created, ts(1));
    assert_eq!(updated, ts(2));
}

#[test]
fn derived_columns_are_persisted() {
    let conn = common::memory_db();

    let mut rdm = LegacyEnvironment::new(1, 7, "device");
    rdm.platform = Some("real-device-mobile".into());
    rdm.is_kane_supported = true;
    common::insert_env(&conn, &rdm);

    let mut private = rdm.clone();
    private.id = 2;
    private.private_cloud = true;
    common::insert_env(&conn, &private);

    let mut odd = LegacyEnvironment::new(3, 7, "legacy");
    odd.platform = Some("Windows 10".into());
    odd.is_kane_supported = true;
    odd.is_default = true;
    odd.deleted_at = ts(3);
    common::insert_env(&conn, &odd);

    let mut bare = LegacyEnvironment::new(4, 7, "bare");
    bare.is_custom = true;
    common::insert_env(&conn, &bare);

    let owners = OwnerDirectory::from_pairs([(7, 42)], 1);
    MigrationEngine::new(&conn, &owners, options(10))
        .run()
        .expect("migration succeeds");

    let rows: Vec<(i64, String, bool, bool, bool, bool)> = conn
        .prepare(
            "SELECT id, platform, is_kane_supported, is_manual_supported, is_default, is_custom
             FROM configurations ORDER BY id",
        )
        .expect("prepare")
        .query_map([], |r| {
            Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?, r.get(5)?))
        })
        .expect("query")
        .collect::<Result<_, _>>()
        .expect("collect");

    assert_eq!(
        rows,
        vec![
            (1, "real-device-mobile".to_string(), true, true, false, false),
            (2, "real-device-mobile".to_string(), true, false, false, false),
            (3, "custom".to_string(), true, false, true, false),
            (4, "custom".to_string(), false, true, false, true),
        ]
    );

    let deleted: Value = conn
        .query_row("SELECT deleted_at FROM configurations WHERE id = 3", [], |r| r.get(0))
        .expect("deleted_at");
    assert_eq!(deleted, ts(3));
}

#[test]
fn timestamps_are_copied_verbatim() {
    let conn = common::memory_db();
    let stamps = [
        (1, Value::Text("2023-04-01T09:30:00Z".into())),
        (2, Value::Integer(1_680_341_400)),
        (3, Value::Text("2023-04-01T09:30:00".into())),
        (4, Value::Text("2023-04-01 09:30:00+02:00".into())),
        (5, Value::Text("not a date".into())),
    ];
    for (id, stamp) in &stamps {
        let mut env = LegacyEnvironment::new(*id, 7, format!("env-{id}"));
        env.created_at = stamp.clone();
        env.updated_at = stamp.clone();
        common::insert_env(&conn, &env);
    }
    let owners = OwnerDirectory::from_pairs([(7, 42)], 1);

    let summary = MigrationEngine::new(&conn, &owners, options(2))
        .run()
        .expect("odd timestamps never block a page");
    assert_eq!(summary.processed, 5);
    assert_eq!(common::unmigrated(&conn), 0);

    let pairs: Vec<(Value, Value, Value)> = conn
        .prepare(
            "SELECT t.created_at, c.created_at, c.updated_at
             FROM test_environments t JOIN configurations c ON c.id = t.id
             ORDER BY t.id",
        )
        .expect("prepare")
        .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))
        .expect("query")
        .collect::<Result<_, _>>()
        .expect("collect");
    assert_eq!(pairs.len(), 5);
    for (source, created, updated) in &pairs {
        assert_eq!(created, source);
        assert_eq!(updated, source);
    }
    assert_eq!(pairs[0].1, Value::Text("2023-04-01T09:30:00Z".into()));
    assert_eq!(pairs[2].1, Value::Text("2023-04-01T09:30:00".into()));
}

#[test]
fn empty_source_drains_immediately() {
    let conn = common::memory_db();
    let owners = OwnerDirectory::from_pairs(Vec::new(), 1);
    let summary = MigrationEngine::new(&conn, &owners, options(5))
        .run()
        .expect("empty run succeeds");
    assert_eq!(summary.processed, 0);
    assert_eq!(summary.pages, 0);
    assert_eq!(summary.passes, 1);
    assert_eq!(summary.total_at_start, 0);
    assert_eq!(common::configurations(&conn), 0);
}

#[test]
fn already_linked_rows_are_never_touched() {
    let conn = common::memory_db();
    common::seed_range(&conn, 1, 4);
    // Row 2 was linked by an earlier tool; its configuration already exists.
    conn.execute(
        "INSERT INTO configurations(id, organization_id, name, platform, created_by, updated_by)
         VALUES(2, 5, 'kept', 'Mobile', 99, 99)",
        [],
    )
    .expect("seed configuration");
    conn.execute("UPDATE test_environments SET configuration_id = 2 WHERE id = 2", [])
        .expect("seed link");

    let owners = OwnerDirectory::from_pairs(Vec::new(), 1);
    let summary = MigrationEngine::new(&conn, &owners, options(10))
        .run()
        .expect("migration succeeds");

    assert_eq!(summary.processed, 3);
    assert_eq!(summary.total_at_start, 3);
    let kept: (String, i64) = conn
        .query_row(
            "SELECT name, created_by FROM configurations WHERE id = 2",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .expect("kept row");
    assert_eq!(kept, ("kept".to_string(), 99));
    assert_eq!(common::configurations(&conn), 4);
}

#[test]
fn large_pages_cross_the_insert_chunk_boundary() {
    let conn = common::memory_db();
    common::seed_range(&conn, 1, 500);
    let owners = OwnerDirectory::from_pairs([(7, 42)], 1);

    let summary = MigrationEngine::new(&conn, &owners, options(300))
        .run()
        .expect("migration succeeds");

    assert_eq!(summary.processed, 500);
    assert_eq!(summary.pages, 2);
    assert_eq!(common::configurations(&conn), 500);
    assert_eq!(common::unmigrated(&conn), 0);
    assert!(summary.audit.expect("audit").is_consistent());
}
