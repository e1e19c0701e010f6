use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use dotenvy::dotenv;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use course_sync::config::AppConfig;
use course_sync::db::{self, repository};
use course_sync::error::StoreKind;
use course_sync::models::CourseUpsert;
use course_sync::projection::{CourseDocument, FirestoreClient, InMemoryProjection, ProjectionClient};
use course_sync::services::slug::is_valid;
use course_sync::services::{SlugAllocator, SyncEngine, UpsertOutcome};

fn is_dry_run() -> bool {
    !std::env::args().any(|a| a == "--apply")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Problem {
    Empty,
    Malformed,
    Duplicate,
    DiffersFromStore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Repair {
    /// CourseStore already holds a good slug; push it to the projection.
    FromStore,
    /// Allocate a fresh slug and write it to both stores.
    Regenerate,
}

#[derive(Debug, PartialEq)]
struct Finding {
    course_id: String,
    slug: String,
    problem: Problem,
    repair: Repair,
}

/// Picks the documents that need a new slug. For a slug held by several
/// documents, the one CourseStore agrees with (else the oldest) keeps it.
fn plan(docs: &[CourseDocument], store_slugs: &HashMap<String, String>) -> Vec<Finding> {
    let mut holders: HashMap<&str, Vec<&CourseDocument>> = HashMap::new();
    for doc in docs.iter().filter(|d| !d.slug.is_empty()) {
        holders.entry(doc.slug.as_str()).or_default().push(doc);
    }

    let keeper = |slug: &str| -> Option<String> {
        let docs = holders.get(slug)?;
        docs.iter()
            .find(|d| store_slugs.get(&d.id).map(String::as_str) == Some(slug))
            .or_else(|| docs.iter().min_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id))))
            .map(|d| d.id.clone())
    };

    let mut sorted: Vec<&CourseDocument> = docs.iter().collect();
    sorted.sort_by(|a, b| a.id.cmp(&b.id));

    let mut findings = Vec::new();
    for doc in sorted {
        let store_slug = store_slugs.get(&doc.id);
        let problem = if doc.slug.is_empty() {
            Problem::Empty
        } else if !is_valid(&doc.slug) {
            Problem::Malformed
        } else if holders.get(doc.slug.as_str()).is_some_and(|h| h.len() > 1)
            && keeper(&doc.slug).as_deref() != Some(doc.id.as_str())
        {
            Problem::Duplicate
        } else if store_slug.is_some_and(|s| s != &doc.slug) {
            Problem::DiffersFromStore
        } else {
            continue;
        };

        let repair = match store_slug {
            Some(slug) if is_valid(slug) => Repair::FromStore,
            _ => Repair::Regenerate,
        };

        findings.push(Finding {
            course_id: doc.id.clone(),
            slug: doc.slug.clone(),
            problem,
            repair,
        });
    }
    findings
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "course_sync=info,fix_slugs=info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;
    let pool = db::connect(&config.database_url, config.store_timeout).await?;

    let projection: Arc<dyn ProjectionClient> = match &config.firestore {
        Some(firestore) => Arc::new(FirestoreClient::new(firestore.clone(), config.store_timeout)?),
        None => {
            println!("FIRESTORE_PROJECT_ID not set, checking an empty in-process projection");
            Arc::new(InMemoryProjection::new())
        }
    };

    let slugs = Arc::new(SlugAllocator::new(
        pool.clone(),
        projection.clone(),
        config.slug_probe_cap,
        config.retry,
        config.store_timeout,
    ));
    let engine = SyncEngine::new(pool.clone(), projection.clone(), slugs, config.retry, config.store_timeout);

    let docs = projection.list_courses().await?;
    let store_slugs: HashMap<String, String> = repository::fetch_courses(&pool)
        .await?
        .into_iter()
        .map(|c| (c.id, c.slug))
        .collect();

    let findings = plan(&docs, &store_slugs);
    let dry_run = is_dry_run();
    let mut repaired = 0;

    for finding in &findings {
        if dry_run {
            println!(
                "[DRY RUN] Would repair course {} (slug {:?}, {:?}) via {:?}",
                finding.course_id, finding.slug, finding.problem, finding.repair
            );
            continue;
        }

        let result = match finding.repair {
            Repair::FromStore => engine.reconcile(&finding.course_id).await.map(|_| ()),
            Repair::Regenerate => {
                let Some(doc) = docs.iter().find(|d| d.id == finding.course_id) else {
                    continue;
                };
                let payload = CourseUpsert {
                    id: doc.id.clone(),
                    title: doc.title.clone(),
                    slug: None,
                    regenerate_slug: true,
                    owner_id: doc.owner_id.clone(),
                    subject: doc.subject.clone(),
                    year_of_study: doc.year_of_study,
                    is_active: doc.is_active,
                    links: doc.links.clone(),
                    attachment_urls: doc.attachment_urls.clone(),
                    assigned_users: doc.assigned_users.iter().cloned().collect(),
                    assigned_classes: doc.assigned_classes.iter().cloned().collect(),
                    updated_at: Utc::now(),
                };
                match engine.upsert(payload, StoreKind::Projection).await {
                    Ok(UpsertOutcome::Applied(view)) => {
                        println!("Course {} now has slug {}", finding.course_id, view.course.slug);
                        Ok(())
                    }
                    Ok(UpsertOutcome::Stale) => Ok(()),
                    Err(e) => Err(e),
                }
            }
        };

        match result {
            Ok(()) => {
                println!("Repaired course {} ({:?})", finding.course_id, finding.problem);
                repaired += 1;
            }
            Err(e) => println!("Failed to repair course {}: {}", finding.course_id, e),
        }
    }

    println!("Courses needing repair: {} / {}", findings.len(), docs.len());
    if !dry_run {
        println!("Courses repaired: {} / {}", repaired, findings.len());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn doc(id: &str, slug: &str, age_days: i64) -> CourseDocument {
        let created = Utc::now() - Duration::days(age_days);
        CourseDocument {
            id: id.to_string(),
            title: "Biologia".to_string(),
            slug: slug.to_string(),
            owner_id: "t1".to_string(),
            subject: String::new(),
            year_of_study: 1,
            is_active: true,
            links: Vec::new(),
            attachment_urls: Vec::new(),
            assigned_users: Vec::new(),
            assigned_classes: Vec::new(),
            created_at: created,
            updated_at: created,
        }
    }

    #[test]
    fn flags_empty_and_malformed_slugs() {
        let docs = vec![doc("a", "", 1), doc("b", "Bad Slug", 1), doc("c", "biologia", 1)];
        let findings = plan(&docs, &HashMap::new());

        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].problem, Problem::Empty);
        assert_eq!(findings[1].problem, Problem::Malformed);
        assert!(findings.iter().all(|f| f.repair == Repair::Regenerate));
    }

    #[test]
    fn oldest_duplicate_keeps_the_slug() {
        let docs = vec![doc("new", "biologia", 1), doc("old", "biologia", 10)];
        let findings = plan(&docs, &HashMap::new());

        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].course_id, "new");
        assert_eq!(findings[0].problem, Problem::Duplicate);
    }

    #[test]
    fn store_slug_decides_duplicates_and_mismatches() {
        let docs = vec![doc("new", "biologia", 1), doc("old", "biologia", 10)];
        let store = HashMap::from([
            ("new".to_string(), "biologia".to_string()),
            ("old".to_string(), "biologia-1".to_string()),
        ]);
        let findings = plan(&docs, &store);

        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].course_id, "old");
        assert_eq!(findings[0].problem, Problem::Duplicate);
        assert_eq!(findings[0].repair, Repair::FromStore);

        let docs = vec![doc("x", "stary", 1)];
        let store = HashMap::from([("x".to_string(), "nowy".to_string())]);
        let findings = plan(&docs, &store);
        assert_eq!(findings[0].problem, Problem::DiffersFromStore);
    }
}
