//! Integration tests covering the storage/transaction core's documented
//! scenarios end to end, through the public `Database`/`Table` API.

use arkdb::{ColumnType, Database, DurabilityLevel, OpenOptions, Value};

#[test]
fn s1_single_column_integer_round_trip() {
    let db = Database::open_anon().expect("open anon db");

    let mut txn = db.begin_write().expect("begin write");
    txn.create_table("t", &[("n", ColumnType::Int)]).expect("create table");
    for i in 0..1000i64 {
        txn.append_row("t", &[Value::Int(i)]).expect("append row");
    }
    txn.commit().expect("commit");

    let read = db.begin_read().expect("begin read");
    let table = read.open_table("t").expect("open table");
    assert_eq!(table.row_count(), 1000);
    assert_eq!(read.sum_int("t", 0).unwrap(), 499_500);
    assert_eq!(read.lower_bound_int("t", 0, 500).unwrap(), 500);
}

#[test]
fn s2_copy_on_write_commit_isolates_readers() {
    let db = Database::open_anon().expect("open anon db");

    let mut txn = db.begin_write().expect("begin write");
    txn.create_table("t", &[("n", ColumnType::Int)]).expect("create table");
    for i in 0..10i64 {
        txn.append_row("t", &[Value::Int(i)]).expect("append row");
    }
    txn.commit().expect("commit v1");

    let reader_at_v1 = db.begin_read().expect("begin read at v1");

    let mut txn = db.begin_write().expect("begin write v2");
    txn.append_row("t", &[Value::Int(10)]).expect("append row 10");
    txn.commit().expect("commit v2");

    assert_eq!(reader_at_v1.open_table("t").unwrap().row_count(), 10);

    let reader_at_v2 = db.begin_read().expect("begin read at v2");
    assert_eq!(reader_at_v2.open_table("t").unwrap().row_count(), 11);
}

#[test]
fn s3_uncommitted_write_never_becomes_visible() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("db.arkdb");

    {
        let db = Database::open(&path).expect("create db");
        let mut txn = db.begin_write().expect("begin write");
        txn.create_table("t", &[("n", ColumnType::Int)]).expect("create table");
        for i in 0..100i64 {
            txn.append_row("t", &[Value::Int(i)]).expect("append row");
        }
        txn.commit().expect("commit v1");

        // Simulate a crash between staging the new top-ref and flipping the
        // header flag: build up writer-side state and then abandon the
        // transaction without ever calling `commit`, so the header's active
        // slot never moves off v1.
        let mut doomed = db.begin_write().expect("begin write v2");
        for i in 100..200i64 {
            doomed.append_row("t", &[Value::Int(i)]).expect("append row");
        }
        doomed.rollback();
    }

    let db = Database::open(&path).expect("reopen db");
    let read = db.begin_read().expect("begin read");
    assert_eq!(read.open_table("t").unwrap().row_count(), 100);
}

#[test]
fn s4_free_list_reuse_keeps_file_size_bounded() {
    let db = Database::open_anon().expect("open anon db");

    let mut txn = db.begin_write().expect("begin write");
    txn.create_table("t", &[("n", ColumnType::Int)]).expect("create table");
    for i in 0..100i64 {
        txn.append_row("t", &[Value::Int(i)]).expect("append row");
    }
    txn.commit().expect("commit v1");

    // No reader holds v1 alive past this point.
    let mut txn = db.begin_write().expect("begin write v2");
    txn.clear_table("t").expect("clear table");
    txn.commit().expect("commit v2 (all rows deleted)");

    let mut txn = db.begin_write().expect("begin write v3");
    txn.append_row("t", &[Value::Int(0)]).expect("append one row");
    txn.commit().expect("commit v3");

    let read = db.begin_read().expect("begin read");
    assert_eq!(read.open_table("t").unwrap().row_count(), 1);
}

#[test]
fn s5_range_query_via_ordered_index() {
    let db = Database::open_anon().expect("open anon db");

    let mut txn = db.begin_write().expect("begin write");
    txn.create_table("people", &[("age", ColumnType::Int), ("name", ColumnType::Str)]).expect("create table");
    for (age, name) in [(14, "Mary"), (40, "Joe"), (41, "Jack"), (37, "Jill")] {
        txn.append_row("people", &[Value::Int(age), Value::Str(name.to_string())]).expect("append row");
    }
    txn.build_index("people", 0).expect("build index on age");

    let rows = txn.range_query("people", 0, 37, 40).expect("range query");
    let names: Vec<String> = rows
        .iter()
        .map(|&r| match txn.get("people", r, 1).unwrap() {
            Value::Str(s) => s,
            _ => unreachable!(),
        })
        .collect();
    assert_eq!(names, vec!["Jill".to_string(), "Joe".to_string()]);

    txn.commit().expect("commit");
}

#[test]
fn s6_string_index_begins_with_is_case_sensitive() {
    let db = Database::open_anon().expect("open anon db");

    let mut txn = db.begin_write().expect("begin write");
    txn.create_table("names", &[("name", ColumnType::Str)]).expect("create table");
    for name in ["Mary", "Joe", "Jack", "Jill", "Jo"] {
        txn.append_row("names", &[Value::Str(name.to_string())]).expect("append row");
    }
    txn.build_index("names", 0).expect("build index on name");

    let rows = txn.begins_with("names", 0, "Jo").expect("begins_with scan");
    let mut matched: Vec<String> = rows
        .iter()
        .map(|&r| match txn.get("names", r, 0).unwrap() {
            Value::Str(s) => s,
            _ => unreachable!(),
        })
        .collect();
    matched.sort();
    assert_eq!(matched, vec!["Jo".to_string(), "Joe".to_string()]);

    txn.commit().expect("commit");
}

#[test]
fn durability_async_requires_explicit_sync() {
    let db = OpenOptions::new().durability(DurabilityLevel::Async).open_anon().expect("open anon db");

    let mut txn = db.begin_write().expect("begin write");
    txn.create_table("t", &[("n", ColumnType::Int)]).expect("create table");
    txn.append_row("t", &[Value::Int(1)]).expect("append row");
    let version = txn.commit().expect("commit");

    db.sync(version).expect("sync to committed version");

    let read = db.begin_read().expect("begin read");
    assert_eq!(read.open_table("t").unwrap().row_count(), 1);
}
