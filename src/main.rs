use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use course_sync::api::router;
use course_sync::config::{AppConfig, IdentitySource};
use course_sync::db;
use course_sync::identity::{HttpIdentityResolver, IdentityResolver, StaticIdentityResolver};
use course_sync::projection::{FirestoreClient, InMemoryProjection, ProjectionClient};
use course_sync::services::ReconcileScheduler;
use course_sync::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "course_sync=debug".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;
    let pool = db::connect(&config.database_url, config.store_timeout).await?;

    let projection: Arc<dyn ProjectionClient> = match &config.firestore {
        Some(firestore) => {
            info!("projecting courses to Firestore project {}", firestore.project_id);
            Arc::new(FirestoreClient::new(firestore.clone(), config.store_timeout)?)
        }
        None => {
            warn!("FIRESTORE_PROJECT_ID not set, using an in-process projection");
            Arc::new(InMemoryProjection::new())
        }
    };

    let identity: Arc<dyn IdentityResolver> = match &config.identity {
        IdentitySource::Verifier(url) => Arc::new(HttpIdentityResolver::new(url.clone(), config.store_timeout)?),
        IdentitySource::StaticTokens(tokens) => Arc::new(StaticIdentityResolver::parse(tokens)?),
        IdentitySource::None => {
            warn!("no identity source configured, every request will be rejected");
            Arc::new(StaticIdentityResolver::default())
        }
    };

    let state = AppState::new(&config, pool, projection, identity);

    if config.reconcile_interval_secs > 0 {
        let scheduler = ReconcileScheduler::new(state.engine.clone(), config.reconcile_interval_secs);
        tokio::spawn(scheduler.start());
    } else {
        info!("reconcile scheduler disabled");
    }

    let app = router(state);

    info!("listening on http://{}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
