use std::sync::Arc;

use sqlx::SqlitePool;

use crate::config::AppConfig;
use crate::identity::IdentityResolver;
use crate::projection::ProjectionClient;
use crate::services::{ClassFanoutAssigner, ClassService, SlugAllocator, SyncEngine};

#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub projection: Arc<dyn ProjectionClient>,
    pub identity: Arc<dyn IdentityResolver>,
    pub slugs: Arc<SlugAllocator>,
    pub engine: Arc<SyncEngine>,
    pub fanout: Arc<ClassFanoutAssigner>,
    pub classes: Arc<ClassService>,
}

impl AppState {
    /// Wires every service around one pool and one projection client.
    pub fn new(
        config: &AppConfig,
        db: SqlitePool,
        projection: Arc<dyn ProjectionClient>,
        identity: Arc<dyn IdentityResolver>,
    ) -> Self {
        let slugs = Arc::new(SlugAllocator::new(
            db.clone(),
            projection.clone(),
            config.slug_probe_cap,
            config.retry,
            config.store_timeout,
        ));
        let engine = Arc::new(SyncEngine::new(
            db.clone(),
            projection.clone(),
            slugs.clone(),
            config.retry,
            config.store_timeout,
        ));
        let fanout = Arc::new(ClassFanoutAssigner::new(
            db.clone(),
            engine.clone(),
            config.fanout_require_students,
        ));
        let classes = Arc::new(ClassService::new(db.clone(), engine.clone()));

        Self {
            db,
            projection,
            identity,
            slugs,
            engine,
            fanout,
            classes,
        }
    }
}
