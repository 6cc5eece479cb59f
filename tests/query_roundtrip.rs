//! Prepared-statement execution and typed round trips.

mod common;

use pgconduit::protocol::types::oid;
use pgconduit::{First, Value};
use pgconduit::value::Array;

#[test]
fn echo_integer() {
    let Some(mut conn) = common::connect() else { return };

    let stmt = conn.prepare("SELECT $1::int4").unwrap();
    match stmt.first(&mut conn, &[Value::from(-12345)]).unwrap() {
        Some(First::Value(Value::Int4(v))) => assert_eq!(v, -12345),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn echo_text_and_null() {
    let Some(mut conn) = common::connect() else { return };

    let stmt = conn.prepare("SELECT $1::text").unwrap();
    match stmt.first(&mut conn, &[Value::from("héllo")]).unwrap() {
        Some(First::Value(Value::Text(s))) => assert_eq!(s, "héllo"),
        other => panic!("unexpected result: {other:?}"),
    }
    match stmt.first(&mut conn, &[Value::Null]).unwrap() {
        Some(First::Value(Value::Null)) => {}
        other => panic!("expected NULL, got {other:?}"),
    }
}

#[test]
fn array_round_trip() {
    let Some(mut conn) = common::connect() else { return };

    let stmt = conn.prepare("SELECT $1::int4[]").unwrap();
    let array = Array::from_rows(
        oid::INT4,
        vec![
            vec![Value::Int4(1), Value::Int4(2)],
            vec![Value::Int4(3), Value::Int4(4)],
        ],
    );
    match stmt
        .first(&mut conn, &[Value::Array(array.clone())])
        .unwrap()
    {
        Some(First::Value(Value::Array(back))) => {
            assert_eq!(back.shape(), vec![2, 2]);
            assert_eq!(back.values, array.values);
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn numeric_round_trip() {
    let Some(mut conn) = common::connect() else { return };

    let stmt = conn.prepare("SELECT $1::numeric").unwrap();
    let n = pgconduit::conversion::numeric::parse_text("12345.6789").unwrap();
    match stmt
        .first(&mut conn, &[Value::Numeric(n.clone())])
        .unwrap()
    {
        Some(First::Value(Value::Numeric(back))) => {
            assert_eq!(
                pgconduit::conversion::numeric::render_text(&back),
                "12345.6789"
            );
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn first_collapses_by_shape() {
    let Some(mut conn) = common::connect() else { return };

    // 1x1 -> scalar
    let stmt = conn.prepare("SELECT 42").unwrap();
    assert_eq!(
        stmt.first(&mut conn, &[]).unwrap(),
        Some(First::Value(Value::Int4(42)))
    );

    // multi-column -> first row
    let stmt = conn.prepare("SELECT 1, 'x'").unwrap();
    match stmt.first(&mut conn, &[]).unwrap() {
        Some(First::Row(row)) => {
            assert_eq!(row.get(0), Some(&Value::Int4(1)));
            assert_eq!(row.get(1), Some(&Value::Text("x".into())));
        }
        other => panic!("unexpected result: {other:?}"),
    }

    // empty result -> None
    let stmt = conn.prepare("SELECT 1 WHERE false").unwrap();
    assert_eq!(stmt.first(&mut conn, &[]).unwrap(), None);

    // DML -> command tag
    conn.simple_query("CREATE TEMP TABLE first_dml (i int4)")
        .unwrap();
    let stmt = conn.prepare("INSERT INTO first_dml VALUES (1), (2)").unwrap();
    match stmt.first(&mut conn, &[]).unwrap() {
        Some(First::Command { tag, rows }) => {
            assert!(tag.starts_with("INSERT"));
            assert_eq!(rows, Some(2));
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn streaming_rows_and_chunks() {
    let Some(mut conn) = common::connect() else { return };

    let stmt = conn
        .prepare("SELECT i FROM generate_series(1, 1000) g(i)")
        .unwrap();

    let mut total = 0i64;
    let mut count = 0usize;
    for row in stmt.rows(&mut conn, &[]).unwrap() {
        let row = row.unwrap();
        total += row.get(0).unwrap().as_i64().unwrap();
        count += 1;
    }
    assert_eq!(count, 1000);
    assert_eq!(total, 500_500);

    // Chunked path: batches follow the requested execute size.
    let mut batches = 0;
    let mut rows = 0;
    for chunk in stmt.chunks(&mut conn, &[], 300).unwrap() {
        let chunk = chunk.unwrap();
        assert!(chunk.len() <= 300);
        rows += chunk.len();
        batches += 1;
    }
    assert_eq!(rows, 1000);
    assert_eq!(batches, 4); // 300+300+300+100

    // Column path
    let values: Vec<i64> = stmt
        .column(&mut conn, &[])
        .unwrap()
        .map(|v| v.unwrap().as_i64().unwrap())
        .collect();
    assert_eq!(values.len(), 1000);
    assert_eq!(values[0], 1);
    assert_eq!(values[999], 1000);
}

#[test]
fn dropping_stream_mid_way_recovers() {
    let Some(mut conn) = common::connect() else { return };

    let stmt = conn
        .prepare("SELECT i FROM generate_series(1, 10000) g(i)")
        .unwrap();
    {
        let mut stream = stmt.rows(&mut conn, &[]).unwrap();
        let first = stream.next().unwrap().unwrap();
        assert_eq!(first.get(0).unwrap().as_i64(), Some(1));
        // Dropped here with rows remaining; the portal must be closed.
    }

    // Connection still works.
    let results = conn.simple_query("SELECT 7").unwrap();
    assert_eq!(results[0].rows[0].get(0), Some(&Value::Int4(7)));
}

#[test]
fn load_rows_pipelines_inserts() {
    let Some(mut conn) = common::connect() else { return };

    conn.simple_query("CREATE TEMP TABLE bulk_load (i int8)")
        .unwrap();
    let stmt = conn.prepare("INSERT INTO bulk_load VALUES ($1)").unwrap();
    let inserted = stmt
        .load_rows(&mut conn, (1..=500i64).map(|i| vec![Value::from(i)]))
        .unwrap();
    assert_eq!(inserted, 500);

    let check = conn
        .prepare("SELECT count(*)::int8, sum(i)::int8 FROM bulk_load")
        .unwrap();
    match check.first(&mut conn, &[]).unwrap() {
        Some(First::Row(row)) => {
            assert_eq!(row.get(0).unwrap().as_i64(), Some(500));
            assert_eq!(row.get(1).unwrap().as_i64(), Some(125_250));
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn statement_close_is_idempotent() {
    let Some(mut conn) = common::connect() else { return };

    let mut stmt = conn.prepare("SELECT 1").unwrap();
    stmt.close(&mut conn).unwrap();
    stmt.close(&mut conn).unwrap();
    assert!(stmt.query(&mut conn, &[]).is_err());
}

#[test]
fn simple_query_multi_statement() {
    let Some(mut conn) = common::connect() else { return };

    let results = conn.simple_query("SELECT 1; SELECT 'a', 'b'").unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].rows[0].get(0), Some(&Value::Int4(1)));
    assert_eq!(results[1].rows[0].len(), 2);
    assert_eq!(results[1].tag, "SELECT 1");
}
