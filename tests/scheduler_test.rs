mod common;

use std::time::Duration;

use course_sync::error::StoreKind;
use course_sync::projection::ProjectionClient;
use course_sync::services::ReconcileScheduler;

use common::{course_payload, harness};

#[tokio::test]
async fn test_scheduler_initialization() {
    let h = harness().await;

    // 10 秒の間隔で scheduler を作成
    let scheduler = ReconcileScheduler::new(h.state.engine.clone(), 10);
    assert_eq!(scheduler.interval(), Duration::from_secs(10));

    // pending が無ければ何もしない
    let stats = scheduler.run_once().await.unwrap();
    assert_eq!(stats.reconciled + stats.deleted + stats.failed, 0);
}

#[tokio::test]
async fn test_run_once_repairs_pending_course() {
    let h = harness().await;
    h.projection.set_failing(true);
    assert!(
        h.state
            .engine
            .upsert(course_payload("c1", "Informatyka", "t1"), StoreKind::CourseStore)
            .await
            .is_err()
    );

    let scheduler = ReconcileScheduler::new(h.state.engine.clone(), 1);

    // まだ projection が落ちているので失敗として数える
    let stats = scheduler.run_once().await.unwrap();
    assert_eq!(stats.failed, 1);

    h.projection.set_failing(false);
    let stats = scheduler.run_once().await.unwrap();
    assert_eq!(stats.reconciled, 1);
    assert!(h.projection.fetch_course("c1").await.unwrap().is_some());

    // 2 回目は pending が残っていない
    let stats = scheduler.run_once().await.unwrap();
    assert_eq!(stats.reconciled, 0);
}

#[tokio::test]
async fn test_scheduler_short_interval() {
    let h = harness().await;
    h.projection.set_failing(true);
    let _ = h
        .state
        .engine
        .upsert(course_payload("c1", "Informatyka", "t1"), StoreKind::CourseStore)
        .await;
    h.projection.set_failing(false);

    // 1 秒の間隔で scheduler を作成
    let scheduler = ReconcileScheduler::new(h.state.engine.clone(), 1);

    let scheduler_task = tokio::spawn(async move {
        scheduler.start().await;
    });

    // 1.5 秒待機して少なくとも 1 回は実行されることを確認
    tokio::time::sleep(Duration::from_millis(1500)).await;

    // Scheduler タスクをキャンセル
    scheduler_task.abort();

    assert!(h.projection.fetch_course("c1").await.unwrap().is_some());
}
