//! Bulk transfer retries and transient-fault handling.

mod common;

use std::sync::Arc;

use common::{
    count_rows, create_test_database, faulty_context, record, records, seed_local_table, sorted,
    table_names, FaultPlan, LocalTableRecord,
};
use dualsql::{BulkOptions, DbError, MemorySink, Statement, StatementMetadata};

#[tokio::test]
async fn test_retried_batches_write_each_row_once() {
    let (_tmp, path) = create_test_database();
    let plan = FaultPlan::failing_appends(&[2, 4]);
    let ctx = faulty_context(&path, plan.clone());

    let source = records(6);
    let written = Statement::insert("LocalTable")
        .source(source.clone())
        .execute_bulk_copy(&ctx, BulkOptions::new(2, 3, 30))
        .await
        .unwrap();

    assert_eq!(written, 6);
    assert_eq!(plan.appends(), 5);
    assert_eq!(count_rows(&path, "LocalTable"), 6);

    let rows = Statement::<LocalTableRecord>::select("LocalTable")
        .sql("SELECT * FROM LocalTable")
        .execute(&ctx)
        .await
        .unwrap();
    assert_eq!(sorted(rows), source);
}

#[tokio::test]
async fn test_exhausted_batch_aborts_transfer() {
    let (_tmp, path) = create_test_database();
    let plan = FaultPlan::failing_appends(&[2, 3, 4]);
    let sink = Arc::new(MemorySink::new());
    let ctx = faulty_context(&path, plan.clone()).with_trace_sink(sink.clone());

    let err = Statement::insert("LocalTable")
        .source(records(5))
        .execute_bulk_copy(&ctx, BulkOptions::new(2, 3, 30))
        .await
        .unwrap_err();

    match err {
        DbError::BulkCopyFailed {
            ref table,
            batch,
            attempts,
            rows_written,
            ref sample,
            ref source,
        } => {
            assert_eq!(table, "LocalTable");
            assert_eq!(batch, 1);
            assert_eq!(attempts, 3);
            assert_eq!(rows_written, 2);
            assert!(sample.as_deref().unwrap().starts_with("3, 'row 3'"));
            assert!(matches!(**source, DbError::TransportFault(_)));
        }
        other => panic!("expected BulkCopyFailed, got {:?}", other),
    }

    // Batch 2 is never attempted and batch 0 stays committed.
    assert_eq!(plan.appends(), 4);
    assert_eq!(count_rows(&path, "LocalTable"), 2);

    let scope = sink.last().unwrap();
    assert!(scope.closed);
    assert_eq!(scope.metric("bulk_rows"), Some(2.0));
    assert_eq!(
        scope.events.iter().filter(|(name, _)| name == "bulk_retry").count(),
        2
    );
}

#[tokio::test]
async fn test_faulted_connection_is_replaced() {
    let (_tmp, path) = create_test_database();
    let plan = FaultPlan::failing_appends(&[2]);
    let ctx = faulty_context(&path, plan.clone());

    Statement::insert("LocalTable")
        .source(records(4))
        .execute_bulk_copy(&ctx, BulkOptions::new(2, 3, 30))
        .await
        .unwrap();

    assert_eq!(plan.connects(), 2);
    assert_eq!(plan.appends(), 3);
}

#[tokio::test]
async fn test_single_attempt_when_retries_is_one() {
    let (_tmp, path) = create_test_database();
    let plan = FaultPlan::failing_appends(&[1]);
    let ctx = faulty_context(&path, plan.clone());

    let err = Statement::insert("LocalTable")
        .source(records(2))
        .execute_bulk_copy(&ctx, BulkOptions::new(10, 1, 30))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        DbError::BulkCopyFailed { batch: 0, attempts: 1, rows_written: 0, .. }
    ));
    assert_eq!(plan.appends(), 1);
    assert_eq!(count_rows(&path, "LocalTable"), 0);
}

#[tokio::test]
async fn test_zero_batch_size_is_rejected() {
    let (_tmp, path) = create_test_database();
    let plan = FaultPlan::failing_appends(&[]);
    let ctx = faulty_context(&path, plan.clone());

    let err = Statement::insert("LocalTable")
        .source(records(2))
        .execute_bulk_copy(&ctx, BulkOptions::new(0, 3, 30))
        .await
        .unwrap_err();

    assert!(matches!(err, DbError::InvalidArgument(_)));
    assert_eq!(plan.connects(), 0);
}

#[tokio::test]
async fn test_empty_source_writes_nothing() {
    let (_tmp, path) = create_test_database();
    let plan = FaultPlan::failing_appends(&[]);
    let ctx = faulty_context(&path, plan.clone());

    let written = Statement::<LocalTableRecord>::insert("LocalTable")
        .execute_bulk_copy(&ctx, BulkOptions::default())
        .await
        .unwrap();

    assert_eq!(written, 0);
    assert_eq!(plan.connects(), 0);
}

#[tokio::test]
async fn test_fetch_retries_one_transient_fault() {
    let (_tmp, path) = create_test_database();
    seed_local_table(&path, &records(3));
    let plan = FaultPlan::failing_fetches(1);
    let ctx = faulty_context(&path, plan.clone());

    let rows = Statement::<LocalTableRecord>::select("LocalTable")
        .sql("SELECT * FROM LocalTable")
        .execute(&ctx)
        .await
        .unwrap();

    assert_eq!(rows.len(), 3);
    assert_eq!(plan.fetches(), 2);
}

#[tokio::test]
async fn test_fetch_gives_up_after_second_fault() {
    let (_tmp, path) = create_test_database();
    let plan = FaultPlan::failing_fetches(2);
    let ctx = faulty_context(&path, plan.clone());

    let err = Statement::<LocalTableRecord>::select("LocalTable")
        .sql("SELECT * FROM LocalTable")
        .execute(&ctx)
        .await
        .unwrap_err();

    assert!(err.is_transient());
    assert_eq!(plan.fetches(), 2);
}

#[tokio::test]
async fn test_temp_table_dropped_after_failed_staging() {
    let (_tmp, path) = create_test_database();
    seed_local_table(&path, &records(3));
    let plan = FaultPlan::failing_appends(&[1, 2, 3]);
    let ctx = faulty_context(&path, plan.clone());

    let err = Statement::update("LocalTable")
        .match_keys(["Id"])
        .source(records(3))
        .metadata(StatementMetadata {
            use_temp_table: true,
            ..Default::default()
        })
        .execute_non_query(&ctx)
        .await
        .unwrap_err();

    assert!(matches!(err, DbError::BulkCopyFailed { attempts: 3, .. }));
    assert_eq!(table_names(&path), vec!["LocalTable".to_string()]);
}

fn cloned_temp() -> StatementMetadata {
    StatementMetadata {
        use_temp_table: true,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_temp_table_dropped_after_failed_follow_up() {
    let (_tmp, path) = create_test_database();
    seed_local_table(&path, &records(3));
    // Execute calls run create, follow-up, drop.
    let plan = FaultPlan::failing_executes(&[2]);
    let ctx = faulty_context(&path, plan.clone());

    let changes: Vec<LocalTableRecord> = (1..=3).map(|i| record(i, Some(900 + i))).collect();
    let err = Statement::update("LocalTable")
        .match_keys(["Id"])
        .source(changes)
        .metadata(cloned_temp())
        .execute_non_query(&ctx)
        .await
        .unwrap_err();

    assert!(matches!(err, DbError::BackendError(_)));
    assert_eq!(plan.executes(), 3);
    assert_eq!(table_names(&path), vec!["LocalTable".to_string()]);

    let rows = Statement::<LocalTableRecord>::select("LocalTable")
        .sql("SELECT * FROM LocalTable")
        .execute(&ctx)
        .await
        .unwrap();
    assert_eq!(sorted(rows), records(3));
}

#[tokio::test]
async fn test_failed_drop_after_success_is_reported() {
    let (_tmp, path) = create_test_database();
    seed_local_table(&path, &records(3));
    let plan = FaultPlan::failing_executes(&[3]);
    let ctx = faulty_context(&path, plan.clone());

    let err = Statement::update("LocalTable")
        .match_keys(["Id"])
        .source(records(3))
        .metadata(cloned_temp())
        .execute_non_query(&ctx)
        .await
        .unwrap_err();

    match err {
        DbError::TempTableDrop { ref table, ref source } => {
            assert!(table.starts_with("LocalTable_tmp_"));
            assert!(matches!(**source, DbError::BackendError(_)));
            assert!(table_names(&path).contains(table));
        }
        other => panic!("expected TempTableDrop, got {:?}", other),
    }
}

#[tokio::test]
async fn test_follow_up_error_wins_over_drop_error() {
    let (_tmp, path) = create_test_database();
    seed_local_table(&path, &records(2));
    let plan = FaultPlan::failing_executes(&[2, 3]);
    let ctx = faulty_context(&path, plan.clone());

    let err = Statement::update("LocalTable")
        .match_keys(["Id"])
        .source(records(2))
        .metadata(cloned_temp())
        .execute_non_query(&ctx)
        .await
        .unwrap_err();

    assert!(matches!(err, DbError::BackendError(ref msg) if msg.contains("call 2")));
}
