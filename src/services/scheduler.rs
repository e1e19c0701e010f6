use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::error::AppError;
use crate::services::sync_engine::{ReconcileStats, SyncEngine};

/// Reconcile スケジューラー
/// pending のままのコースを定期的に再同期する
pub struct ReconcileScheduler {
    engine: Arc<SyncEngine>,
    interval: Duration,
}

impl ReconcileScheduler {
    pub fn new(engine: Arc<SyncEngine>, interval_secs: u64) -> Self {
        Self {
            engine,
            interval: Duration::from_secs(interval_secs),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// 再同期を無限ループで定期実行
    pub async fn start(self) {
        info!("Starting reconcile scheduler (interval: {:?})", self.interval);

        loop {
            // 最初は指定時間待機
            tokio::time::sleep(self.interval).await;

            match self.run_once().await {
                Ok(stats) => {
                    if stats.reconciled + stats.deleted + stats.failed > 0 {
                        info!(
                            "Reconcile sweep - reconciled: {}, deleted: {}, failed: {}, released slugs: {}",
                            stats.reconciled, stats.deleted, stats.failed, stats.released_slugs
                        );
                    }
                }
                Err(e) => {
                    tracing::warn!("Reconcile sweep failed: {:?}", e);
                    // エラーが発生してもループは継続
                }
            }
        }
    }

    pub async fn run_once(&self) -> Result<ReconcileStats, AppError> {
        self.engine.reconcile_pending().await
    }
}
