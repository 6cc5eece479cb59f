//! Failed-transaction-block containment.

mod common;

use pgconduit::{Error, First, Value};

#[test]
fn failed_block_detection() {
    let Some(mut conn) = common::connect() else { return };

    let mut txn = conn.transaction().unwrap();

    // Server error inside the block.
    let err = txn.conn().simple_query("SELECT 1/0").unwrap_err();
    assert_eq!(err.sqlstate(), Some("22012"));
    assert!(txn.conn().in_failed_block());

    // The next non-rollback statement fails locally with a state error.
    let err = txn.conn().simple_query("SELECT 1").unwrap_err();
    assert!(matches!(err, Error::State(_)), "got {err:?}");

    // prepare() is refused the same way.
    let err = txn.conn().prepare("SELECT 1").unwrap_err();
    assert!(matches!(err, Error::State(_)), "got {err:?}");

    // Rollback succeeds and the connection is usable again.
    txn.rollback().unwrap();
    let stmt = conn.prepare("SELECT 1").unwrap();
    assert_eq!(
        stmt.first(&mut conn, &[]).unwrap(),
        Some(First::Value(Value::Int4(1)))
    );
}

#[test]
fn scoped_commit_refused_after_failure() {
    let Some(mut conn) = common::connect() else { return };

    let result: pgconduit::Result<()> = conn.tx(|conn| {
        // Swallow the server error so the closure exits normally with the
        // block failed on the server.
        let _ = conn.simple_query("SELECT 1/0");
        Ok(())
    });

    // The commit must be refused with a state error, never silently rolled
    // back by the server's implicit rule.
    match result {
        Err(Error::State(msg)) => assert!(msg.contains("refused"), "{msg}"),
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(!conn.in_failed_block());

    // Normal scoped use commits.
    conn.simple_query("CREATE TEMP TABLE scoped_tx (i int4)")
        .unwrap();
    conn.tx(|conn| {
        conn.simple_query("INSERT INTO scoped_tx VALUES (1)")?;
        Ok(())
    })
    .unwrap();
    let results = conn.simple_query("SELECT count(*) FROM scoped_tx").unwrap();
    assert_eq!(results[0].rows[0].get(0).unwrap().as_i64(), Some(1));
}

#[test]
fn savepoints_nest() {
    let Some(mut conn) = common::connect() else { return };

    conn.simple_query("CREATE TEMP TABLE sp_rows (i int4)")
        .unwrap();

    let mut txn = conn.transaction().unwrap();
    txn.conn()
        .simple_query("INSERT INTO sp_rows VALUES (1)")
        .unwrap();

    {
        let mut inner = txn.savepoint().unwrap();
        inner
            .conn()
            .simple_query("INSERT INTO sp_rows VALUES (2)")
            .unwrap();
        inner.rollback().unwrap();
    }

    {
        let mut inner = txn.savepoint().unwrap();
        inner
            .conn()
            .simple_query("INSERT INTO sp_rows VALUES (3)")
            .unwrap();
        inner.commit().unwrap();
    }

    txn.commit().unwrap();

    let results = conn
        .simple_query("SELECT i FROM sp_rows ORDER BY i")
        .unwrap();
    let values: Vec<i64> = results[0]
        .rows
        .iter()
        .map(|r| r.get(0).unwrap().as_i64().unwrap())
        .collect();
    assert_eq!(values, vec![1, 3]);
}

#[test]
fn savepoint_recovers_failed_block() {
    let Some(mut conn) = common::connect() else { return };

    let mut txn = conn.transaction().unwrap();
    txn.conn().simple_query("SELECT 1").unwrap();

    let mut inner = txn.savepoint().unwrap();
    let err = inner.conn().simple_query("SELECT 1/0").unwrap_err();
    assert_eq!(err.sqlstate(), Some("22012"));
    // ROLLBACK TO SAVEPOINT is accepted inside the failed block.
    inner.rollback().unwrap();

    // The outer block is live again.
    txn.conn().simple_query("SELECT 2").unwrap();
    txn.commit().unwrap();
}

#[test]
fn connection_close_is_idempotent() {
    let Some(mut conn) = common::connect() else { return };
    conn.close().unwrap();
    conn.close().unwrap();
    assert!(conn.is_closed());
    assert!(conn.simple_query("SELECT 1").is_err());
}
