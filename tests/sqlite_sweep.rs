#![cfg(feature = "sqlite")]

use std::path::Path;
use std::sync::Arc;

use keyed_windows::filter::CmpOp;
use keyed_windows::{
    BatchDriver, CountCache, ExtractError, FileCountStore, Filter, RowSource, SourceLayout,
    SplitConfig, SqliteSource, SweepConfig, train_test_split,
};
use rusqlite::{Connection, params};
use tempfile::tempdir;

fn build_db(path: &Path, groups: &[(&str, usize)]) {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(
        "CREATE TABLE champs (game_key TEXT, frame INTEGER, pos_x REAL, pos_z REAL, name TEXT);
         CREATE INDEX idx_champs_game_key ON champs (game_key);",
    )
    .unwrap();
    for (key, len) in groups {
        for frame in (0..*len).rev() {
            conn.execute(
                "INSERT INTO champs VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    key,
                    frame as i64,
                    frame as f64 * 0.5,
                    -(frame as f64),
                    if frame == 0 { "" } else { "Ahri" }
                ],
            )
            .unwrap();
        }
    }
}

fn layout() -> SourceLayout {
    SourceLayout {
        key_column: "game_key".into(),
        time_column: "frame".into(),
    }
}

fn sweep() -> SweepConfig {
    SweepConfig {
        history_values: vec![2, 3],
        horizon_values: vec![1, 2],
        key_batch_size: 2,
        total_keys: None,
        features: vec!["pos_x".into(), "pos_z".into()],
        label_features: Some(vec!["pos_z".into()]),
    }
}

#[test]
fn sqlite_sweep_matches_the_window_formula() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("games.db");
    build_db(&db, &[("g1_100_a", 9), ("g1_100_b", 4), ("g1_200_c", 6), ("g2_100_a", 12)]);
    let source = SqliteSource::new(&db).with_layout(layout());
    let cache = CountCache::new(Arc::new(
        FileCountStore::open(FileCountStore::default_path_in_dir(dir.path())).unwrap(),
    ));

    let result = BatchDriver::new(&source, &cache)
        .run("champs", &Filter::all(), &sweep())
        .unwrap();

    // max H + max T = 5; every configuration keeps len - 4 windows per group.
    let expected = (9 - 4) + (4 - 4) + (6 - 4) + (12 - 4);
    assert_eq!(result.len(), 4);
    for ((history, _), tensors) in &result {
        assert_eq!(tensors.inputs.shape(), &[expected, *history, 2]);
        assert_eq!(tensors.labels.shape(), &[expected, 1]);
        assert_eq!(tensors.labels[[expected - 1, 0]], -11.0);
    }
}

#[test]
fn filtered_sweep_uses_the_filter_in_every_query() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("games.db");
    build_db(&db, &[("a", 3), ("b", 3), ("c", 2)]);
    let source = SqliteSource::new(&db).with_layout(layout());
    let cache = CountCache::in_memory();
    let filter = Filter::all().and("name", CmpOp::Ne, "");

    assert_eq!(source.row_count("champs", &filter).unwrap(), 5);
    let config = SweepConfig {
        history_values: vec![1],
        horizon_values: vec![1],
        key_batch_size: 1,
        total_keys: None,
        features: vec!["pos_x".into()],
        label_features: None,
    };
    let result = BatchDriver::new(&source, &cache)
        .run("champs", &filter, &config)
        .unwrap();
    // Frame 0 is filtered out: a and b keep 2 rows, c keeps 1.
    let tensors = &result[&(1, 1)];
    assert_eq!(tensors.len(), 2);
    assert_eq!(tensors.labels.column(0).to_vec(), vec![1.0, 1.0]);

    let split = train_test_split(
        tensors,
        SplitConfig {
            test_fraction: 0.5,
            seed: 9,
        },
    )
    .unwrap();
    assert_eq!((split.train.len(), split.test.len()), (1, 1));
}

#[test]
fn unknown_columns_fail_before_any_query() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("games.db");
    build_db(&db, &[("a", 3)]);
    let source = SqliteSource::new(&db).with_layout(layout());
    let cache = CountCache::in_memory();

    let filter = Filter::all().and("mana", CmpOp::Gt, 0i64);
    let err = BatchDriver::new(&source, &cache)
        .run("champs", &filter, &sweep())
        .unwrap_err();
    assert!(matches!(err, ExtractError::Configuration(msg) if msg.contains("mana")));

    let err = BatchDriver::new(&source, &cache)
        .run("missing_table", &Filter::all(), &sweep())
        .unwrap_err();
    assert!(matches!(err, ExtractError::Configuration(msg) if msg.contains("does not exist")));
    assert_eq!(cache.cached_queries(), 0);
}

#[test]
fn null_keys_do_not_cost_the_last_real_key() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("games.db");
    build_db(&db, &[("a", 2), ("z", 3)]);
    let conn = Connection::open(&db).unwrap();
    for frame in 0..2 {
        conn.execute(
            "INSERT INTO champs VALUES (NULL, ?1, ?2, 0.0, 'Ahri')",
            params![frame as i64, 50.0 + frame as f64],
        )
        .unwrap();
    }
    drop(conn);
    let source = SqliteSource::new(&db).with_layout(layout());
    let cache = CountCache::in_memory();

    assert_eq!(cache.get_unique_key_count(&source, "champs", &Filter::all()).unwrap(), 2);
    let config = SweepConfig {
        history_values: vec![1],
        horizon_values: vec![1],
        key_batch_size: 1,
        total_keys: None,
        features: vec!["pos_x".into()],
        label_features: None,
    };
    let result = BatchDriver::new(&source, &cache)
        .run("champs", &Filter::all(), &config)
        .unwrap();
    let tensors = &result[&(1, 1)];
    assert_eq!(tensors.labels.column(0).to_vec(), vec![0.5, 0.5, 1.0]);
}
