//! Scrollable WITH HOLD cursor behavior.

mod common;

use pgconduit::{Direction, Value, Whence};

fn values(rows: &[pgconduit::Row]) -> Vec<i64> {
    rows.iter()
        .map(|r| r.get(0).unwrap().as_i64().unwrap())
        .collect()
}

#[test]
fn backward_read_from_end() {
    let Some(mut conn) = common::connect() else { return };

    let stmt = conn
        .prepare("SELECT i FROM generate_series(0, 99) g(i)")
        .unwrap();
    let mut cursor = stmt.declare(&mut conn, &[]).unwrap();

    cursor.seek(&mut conn, 0, Whence::FromEnd).unwrap();
    let rows = cursor.read(&mut conn, 5, Direction::Backward).unwrap();
    assert_eq!(values(&rows), vec![95, 96, 97, 98, 99]);

    // Flipping the direction flag yields the same values in reverse.
    cursor.set_direction(Direction::Backward);
    cursor.seek(&mut conn, 0, Whence::FromEnd).unwrap();
    let rows = cursor.read(&mut conn, 5, Direction::Backward).unwrap();
    assert_eq!(values(&rows), vec![99, 98, 97, 96, 95]);

    cursor.close(&mut conn).unwrap();
}

#[test]
fn reversed_query_symmetry() {
    let Some(mut conn) = common::connect() else { return };

    // Forward-ordered query, read backward from the end...
    let stmt = conn
        .prepare("SELECT i FROM generate_series(0, 99) g(i) ORDER BY i ASC")
        .unwrap();
    let mut forward = stmt.declare(&mut conn, &[]).unwrap();
    forward.seek(&mut conn, 0, Whence::FromEnd).unwrap();
    let a = values(&forward.read(&mut conn, 5, Direction::Backward).unwrap());
    forward.close(&mut conn).unwrap();

    // ...covers the same slice as the reversed query read forward from the
    // start.
    let stmt = conn
        .prepare("SELECT i FROM generate_series(0, 99) g(i) ORDER BY i DESC")
        .unwrap();
    let mut reversed = stmt.declare(&mut conn, &[]).unwrap();
    reversed.seek(&mut conn, 0, Whence::Absolute).unwrap();
    let b = values(&reversed.read(&mut conn, 5, Direction::Forward).unwrap());
    reversed.close(&mut conn).unwrap();

    let mut a_sorted = a.clone();
    a_sorted.sort_unstable();
    let mut b_sorted = b.clone();
    b_sorted.sort_unstable();
    assert_eq!(a_sorted, b_sorted);
}

#[test]
fn absolute_and_relative_seek() {
    let Some(mut conn) = common::connect() else { return };

    let stmt = conn
        .prepare("SELECT i FROM generate_series(0, 99) g(i)")
        .unwrap();
    let mut cursor = stmt.declare(&mut conn, &[]).unwrap();

    cursor.seek(&mut conn, 10, Whence::Absolute).unwrap();
    let rows = cursor.read(&mut conn, 3, Direction::Forward).unwrap();
    assert_eq!(values(&rows), vec![10, 11, 12]);

    cursor.seek(&mut conn, -3, Whence::Relative).unwrap();
    let rows = cursor.read(&mut conn, 2, Direction::Forward).unwrap();
    assert_eq!(values(&rows), vec![10, 11]);

    cursor.close(&mut conn).unwrap();
}

#[test]
fn with_hold_survives_transaction_end() {
    let Some(mut conn) = common::connect() else { return };

    let stmt = conn
        .prepare("SELECT i FROM generate_series(1, 10) g(i)")
        .unwrap();

    let mut cursor = {
        let mut txn = conn.transaction().unwrap();
        let cursor = stmt.declare(txn.conn(), &[]).unwrap();
        txn.commit().unwrap();
        cursor
    };

    // The cursor is WITH HOLD: still readable after the transaction.
    let rows = cursor.read(&mut conn, 4, Direction::Forward).unwrap();
    assert_eq!(values(&rows), vec![1, 2, 3, 4]);
    cursor.close(&mut conn).unwrap();
}

#[test]
fn cursor_iterates_with_parameters() {
    let Some(mut conn) = common::connect() else { return };

    let stmt = conn
        .prepare("SELECT i * $1::int4 FROM generate_series(1, 5) g(i)")
        .unwrap();
    let mut cursor = stmt.declare(&mut conn, &[Value::from(3)]).unwrap();

    let collected: Vec<i64> = cursor
        .iter(&mut conn)
        .map(|r| r.unwrap().get(0).unwrap().as_i64().unwrap())
        .collect();
    assert_eq!(collected, vec![3, 6, 9, 12, 15]);

    cursor.close(&mut conn).unwrap();
}
