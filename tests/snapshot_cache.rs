mod common;

use common::{people, row, service, service_with, test_config};
use sheetbot::SheetError;
use sheetbot::memory::MemoryTable;
use sheetbot::snapshot::Freshness;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn reads_within_ttl_hit_the_remote_once() {
    let table = people();
    let service = service(&table);

    let first = service.snapshots.get(false).await;
    tokio::time::advance(Duration::from_secs(10)).await;
    let second = service.snapshots.get(false).await;

    assert_eq!(table.read_count(), 1);
    assert_eq!(first.freshness, Freshness::Fresh);
    assert!(Arc::ptr_eq(&first.snapshot, &second.snapshot));
    assert_eq!(second.snapshot.headers, row(&["Name", "Email", "Age"]));
    assert_eq!(second.snapshot.rows.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn read_after_ttl_refreshes_once_with_newer_timestamp() {
    let table = people();
    let service = service(&table);

    let first = service.snapshots.get(false).await;
    tokio::time::advance(Duration::from_secs(16)).await;
    let second = service.snapshots.get(false).await;
    let third = service.snapshots.get(false).await;

    assert_eq!(table.read_count(), 2);
    assert!(second.snapshot.fetched_at > first.snapshot.fetched_at);
    assert!(Arc::ptr_eq(&second.snapshot, &third.snapshot));
}

#[tokio::test(start_paused = true)]
async fn connection_is_reused_across_snapshot_refreshes() {
    let table = people();
    let service = service(&table);

    for _ in 0..3 {
        service.snapshots.get(false).await;
        tokio::time::advance(Duration::from_secs(16)).await;
    }

    assert_eq!(table.read_count(), 3);
    assert_eq!(table.connect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn unreachable_source_yields_empty_and_retries_next_call() {
    let table = people();
    table.fail_connect(true);
    let service = service(&table);

    let read = service.snapshots.get(false).await;
    assert_eq!(read.freshness, Freshness::Unavailable);
    assert!(read.snapshot.headers.is_empty());
    assert!(read.snapshot.rows.is_empty());
    assert!(matches!(read.error, Some(SheetError::Connection(_))));
    assert_eq!(service.snapshots.age(), None);

    service.snapshots.get(false).await;
    assert_eq!(table.connect_count(), 2);

    table.fail_connect(false);
    let read = service.snapshots.get(false).await;
    assert_eq!(read.freshness, Freshness::Fresh);
    assert_eq!(read.snapshot.rows.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn failed_refresh_serves_last_good_snapshot_as_stale() {
    let table = people();
    let service = service(&table);

    let good = service.snapshots.get(false).await;
    tokio::time::advance(Duration::from_secs(16)).await;
    table.fail_read(true);

    let stale = service.snapshots.get(false).await;
    assert_eq!(stale.freshness, Freshness::Stale);
    assert!(matches!(stale.error, Some(SheetError::RemoteRead(_))));
    assert_eq!(stale.snapshot.fetched_at, good.snapshot.fetched_at);

    service.snapshots.get(false).await;
    assert_eq!(table.read_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn failed_refresh_without_stale_serving_is_empty() {
    let table = people();
    let config = sheetbot::Config {
        serve_stale_on_error: false,
        ..test_config()
    };
    let service = service_with(&table, config);

    service.snapshots.get(false).await;
    tokio::time::advance(Duration::from_secs(16)).await;
    table.fail_read(true);

    let read = service.snapshots.get(false).await;
    assert_eq!(read.freshness, Freshness::Unavailable);
    assert!(read.snapshot.is_empty());
}

#[tokio::test(start_paused = true)]
async fn slow_read_times_out_instead_of_hanging() {
    let table = people();
    let service = service(&table);

    service.snapshots.get(false).await;
    tokio::time::advance(Duration::from_secs(16)).await;
    table.set_delay(Duration::from_secs(60));

    let read = service.snapshots.get(false).await;
    assert_eq!(read.freshness, Freshness::Stale);
    assert_eq!(read.error, Some(SheetError::Timeout(Duration::from_secs(10))));
}

#[tokio::test(start_paused = true)]
async fn concurrent_stale_readers_share_one_read() {
    let table = people();
    let service = Arc::new(service(&table));

    service.snapshots.get(false).await;
    tokio::time::advance(Duration::from_secs(16)).await;
    table.set_delay(Duration::from_millis(250));
    table.set_rows(vec![row(&["Name"]), row(&["Zed"])]);

    let mut tasks = Vec::new();
    for _ in 0..10 {
        let service = Arc::clone(&service);
        tasks.push(tokio::spawn(async move { service.snapshots.get(false).await }));
    }
    let mut reads = Vec::new();
    for task in tasks {
        reads.push(task.await.unwrap());
    }

    assert_eq!(table.read_count(), 2);
    for read in &reads {
        assert_eq!(read.freshness, Freshness::Fresh);
        assert_eq!(read.snapshot.rows, vec![row(&["Zed"])]);
        assert!(Arc::ptr_eq(&read.snapshot, &reads[0].snapshot));
    }
}

#[tokio::test(start_paused = true)]
async fn concurrent_stale_readers_share_one_failed_read() {
    let table = people();
    let service = Arc::new(service(&table));

    let good = service.snapshots.get(false).await;
    tokio::time::advance(Duration::from_secs(16)).await;
    table.set_delay(Duration::from_millis(250));
    table.fail_read(true);

    let mut tasks = Vec::new();
    for _ in 0..10 {
        let service = Arc::clone(&service);
        tasks.push(tokio::spawn(async move { service.snapshots.get(false).await }));
    }
    for task in tasks {
        let read = task.await.unwrap();
        assert_eq!(read.freshness, Freshness::Stale);
        assert!(matches!(read.error, Some(SheetError::RemoteRead(_))));
        assert!(Arc::ptr_eq(&read.snapshot, &good.snapshot));
    }
    assert_eq!(table.read_count(), 2);

    service.snapshots.get(false).await;
    assert_eq!(table.read_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn concurrent_readers_of_unreachable_source_share_one_connect() {
    let table = people();
    table.fail_connect(true);
    table.set_delay(Duration::from_millis(250));
    let service = Arc::new(service(&table));

    let mut tasks = Vec::new();
    for _ in 0..10 {
        let service = Arc::clone(&service);
        tasks.push(tokio::spawn(async move { service.snapshots.get(false).await }));
    }
    for task in tasks {
        assert_eq!(task.await.unwrap().freshness, Freshness::Unavailable);
    }

    assert_eq!(table.connect_count(), 1);
    assert_eq!(table.read_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn burst_on_a_hanging_source_waits_one_timeout() {
    let table = people();
    let service = Arc::new(service(&table));

    service.snapshots.get(false).await;
    tokio::time::advance(Duration::from_secs(16)).await;
    table.set_delay(Duration::from_secs(60));
    let started = tokio::time::Instant::now();

    let mut tasks = Vec::new();
    for _ in 0..5 {
        let service = Arc::clone(&service);
        tasks.push(tokio::spawn(async move { service.snapshots.get(false).await }));
    }
    for task in tasks {
        assert_eq!(task.await.unwrap().freshness, Freshness::Stale);
    }

    assert_eq!(table.read_count(), 2);
    assert!(started.elapsed() < Duration::from_secs(11));
}

#[tokio::test(start_paused = true)]
async fn rejected_session_is_replaced_within_the_same_read() {
    let table = people();
    let service = service(&table);

    service.snapshots.get(false).await;
    tokio::time::advance(Duration::from_secs(16)).await;
    table.revoke_sessions();
    table.set_rows(vec![row(&["Name"]), row(&["Zed"])]);

    let read = service.snapshots.get(false).await;
    assert_eq!(read.freshness, Freshness::Fresh);
    assert_eq!(read.snapshot.rows, vec![row(&["Zed"])]);
    assert_eq!(table.connect_count(), 2);
    assert_eq!(table.read_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn session_rejected_twice_is_dropped_for_the_next_call() {
    let table = people();
    let service = service(&table);

    service.snapshots.get(false).await;
    tokio::time::advance(Duration::from_secs(16)).await;
    table.set_delay(Duration::from_secs(1));
    let revoke = {
        let table = table.clone();
        tokio::spawn(async move {
            // lands while the replacement session is reading
            tokio::time::sleep(Duration::from_millis(2500)).await;
            table.revoke_sessions();
        })
    };
    table.revoke_sessions();

    let read = service.snapshots.get(false).await;
    revoke.await.unwrap();
    assert_eq!(read.freshness, Freshness::Stale);
    assert!(matches!(read.error, Some(SheetError::Connection(_))));
    assert_eq!(table.connect_count(), 2);

    table.set_delay(Duration::ZERO);
    let read = service.snapshots.get(false).await;
    assert_eq!(read.freshness, Freshness::Fresh);
    assert_eq!(table.connect_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn forced_read_bypasses_ttl() {
    let table = people();
    let service = service(&table);

    service.snapshots.get(false).await;
    table.set_rows(vec![row(&["Name"]), row(&["New"])]);
    let forced = service.snapshots.get(true).await;

    assert_eq!(table.read_count(), 2);
    assert_eq!(forced.snapshot.rows, vec![row(&["New"])]);

    let cached = service.snapshots.get(false).await;
    assert!(Arc::ptr_eq(&cached.snapshot, &forced.snapshot));
}

#[tokio::test(start_paused = true)]
async fn concurrent_forced_readers_share_one_read() {
    let table = people();
    table.set_delay(Duration::from_millis(100));
    let service = Arc::new(service(&table));

    let mut tasks = Vec::new();
    for _ in 0..5 {
        let service = Arc::clone(&service);
        tasks.push(tokio::spawn(async move { service.snapshots.get(true).await }));
    }
    for task in tasks {
        assert_eq!(task.await.unwrap().freshness, Freshness::Fresh);
    }

    assert_eq!(table.read_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn invalidate_triggers_refresh_inside_ttl() {
    let table = people();
    let service = service(&table);

    service.snapshots.get(false).await;
    service.snapshots.invalidate();
    service.snapshots.get(false).await;

    assert_eq!(table.read_count(), 2);
}

#[tokio::test]
async fn empty_sheet_is_fresh_not_unavailable() {
    let table = MemoryTable::new("empty", Vec::new());
    let service = service(&table);

    let read = service.snapshots.get(false).await;
    assert_eq!(read.freshness, Freshness::Fresh);
    assert!(read.snapshot.is_empty());
    assert!(read.error.is_none());
}
