use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::db::repository;
use crate::error::{AppError, StoreKind};
use crate::projection::ProjectionClient;
use crate::services::retry::{RetryPolicy, with_timeout};

/// Longest base token kept from a title; counter suffixes go on top.
pub const MAX_BASE_LEN: usize = 96;
const FALLBACK_PREFIX: &str = "course-";
const RANDOM_ATTEMPTS: u32 = 8;

/// Lowercases, drops everything outside `[a-z0-9\s-]`, collapses runs of
/// whitespace and hyphens into one hyphen and trims hyphens at both ends.
pub fn normalize(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut separator = false;

    for ch in title.to_lowercase().chars() {
        if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            if separator && !slug.is_empty() {
                slug.push('-');
            }
            separator = false;
            slug.push(ch);
        } else if ch.is_whitespace() || ch == '-' {
            separator = true;
        }
    }

    if slug.len() > MAX_BASE_LEN {
        slug.truncate(MAX_BASE_LEN);
        while slug.ends_with('-') {
            slug.pop();
        }
    }
    slug
}

fn short_hex() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// `course-` followed by 8 random hex characters.
pub fn fallback_slug() -> String {
    format!("{}{}", FALLBACK_PREFIX, short_hex())
}

/// Hands out slugs that are unique across both stores.
///
/// Probing is only a shortcut. The claim row in `slug_reservations` is the
/// arbiter: a candidate is returned only after this allocator inserted (or
/// already held) its reservation.
pub struct SlugAllocator {
    db: SqlitePool,
    projection: Arc<dyn ProjectionClient>,
    probe_cap: u32,
    retry: RetryPolicy,
    store_timeout: Duration,
}

impl SlugAllocator {
    pub fn new(
        db: SqlitePool,
        projection: Arc<dyn ProjectionClient>,
        probe_cap: u32,
        retry: RetryPolicy,
        store_timeout: Duration,
    ) -> Self {
        Self {
            db,
            projection,
            probe_cap,
            retry,
            store_timeout,
        }
    }

    /// Allocates and claims a slug for `title`. With `exclude_id` set the claim
    /// is held for that course, and slugs it already owns count as free.
    pub async fn allocate(&self, title: &str, exclude_id: Option<&str>) -> Result<String, AppError> {
        let base = normalize(title);
        if base.is_empty() {
            debug!("title {:?} yields no slug characters, using a random slug", title);
            return self.claim_random(None, exclude_id).await;
        }

        if self.try_claim(&base, exclude_id).await? {
            return Ok(base);
        }

        for n in 1..=self.probe_cap {
            let candidate = format!("{}-{}", base, n);
            if self.try_claim(&candidate, exclude_id).await? {
                debug!("allocated slug {} after {} collisions", candidate, n);
                return Ok(candidate);
            }
        }

        warn!(
            "slug counter for {} exhausted after {} probes, using a random suffix",
            base, self.probe_cap
        );
        self.claim_random(Some(&base), exclude_id).await
    }

    /// Claims exactly `slug` for `course_id`. Returns `false` when someone else
    /// holds it in either store.
    pub async fn claim_exact(&self, slug: &str, course_id: &str) -> Result<bool, AppError> {
        if slug.is_empty() || !is_valid(slug) {
            return Ok(false);
        }
        self.try_claim(slug, Some(course_id)).await
    }

    pub async fn release(&self, slug: &str, course_id: Option<&str>) -> Result<(), AppError> {
        let db = &self.db;
        self.retry
            .run("release slug", move || {
                with_timeout(
                    StoreKind::CourseStore,
                    self.store_timeout,
                    repository::release_slug(db, slug, course_id),
                )
            })
            .await
    }

    /// Drops claims that never got bound to a course.
    pub async fn release_stale(&self, max_age: Duration) -> Result<u64, AppError> {
        let max_age = chrono::Duration::from_std(max_age)
            .map_err(|e| AppError::Config(format!("invalid reservation age: {}", e)))?;
        let released = repository::release_stale_reservations(&self.db, Utc::now() - max_age).await?;
        if released > 0 {
            debug!("released {} stale slug reservations", released);
        }
        Ok(released)
    }

    async fn claim_random(&self, base: Option<&str>, exclude_id: Option<&str>) -> Result<String, AppError> {
        for _ in 0..RANDOM_ATTEMPTS {
            let candidate = match base {
                Some(base) => format!("{}-{}", base, short_hex()),
                None => fallback_slug(),
            };
            if self.try_claim(&candidate, exclude_id).await? {
                return Ok(candidate);
            }
        }

        Err(AppError::Conflict(format!(
            "could not allocate a unique slug for {}",
            base.unwrap_or("untitled course")
        )))
    }

    async fn try_claim(&self, slug: &str, exclude_id: Option<&str>) -> Result<bool, AppError> {
        let db = &self.db;

        let taken = self
            .retry
            .run("probe slug", move || {
                with_timeout(
                    StoreKind::CourseStore,
                    self.store_timeout,
                    repository::slug_taken(db, slug, exclude_id),
                )
            })
            .await?;
        if taken {
            return Ok(false);
        }

        let owners = self
            .retry
            .run("probe projection slug", move || {
                with_timeout(
                    StoreKind::Projection,
                    self.store_timeout,
                    self.projection.slug_owners(slug),
                )
            })
            .await?;
        if owners.iter().any(|owner| Some(owner.as_str()) != exclude_id) {
            return Ok(false);
        }

        self.retry
            .run("reserve slug", move || {
                with_timeout(
                    StoreKind::CourseStore,
                    self.store_timeout,
                    repository::reserve_slug(db, slug, exclude_id),
                )
            })
            .await
    }
}

/// Whether `slug` is something `normalize` could have produced.
pub fn is_valid(slug: &str) -> bool {
    !slug.is_empty()
        && !slug.starts_with('-')
        && !slug.ends_with('-')
        && !slug.contains("--")
        && slug.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_plain_titles() {
        assert_eq!(normalize("Matematyka"), "matematyka");
        assert_eq!(normalize("  Fizyka   dla  klasy 2 "), "fizyka-dla-klasy-2");
        assert_eq!(normalize("C++ -- podstawy"), "c-podstawy");
        assert_eq!(normalize("--a--b--"), "a-b");
    }

    #[test]
    fn drops_non_ascii_letters() {
        assert_eq!(normalize("Język Polski"), "jzyk-polski");
        assert_eq!(normalize("Historia: ćwiczenia!"), "historia-wiczenia");
    }

    #[test]
    fn titles_without_slug_characters_normalize_to_empty() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("   \t\n"), "");
        assert_eq!(normalize("!!!???"), "");
        assert_eq!(normalize("🚀🔥"), "");
        assert_eq!(normalize("数学"), "");
    }

    #[test]
    fn long_titles_are_truncated_without_trailing_hyphen() {
        let title = format!("{} b", "a".repeat(MAX_BASE_LEN - 1));
        let slug = normalize(&title);
        assert_eq!(slug.len(), MAX_BASE_LEN - 1);
        assert!(!slug.ends_with('-'));

        let slug = normalize(&"x".repeat(500));
        assert_eq!(slug.len(), MAX_BASE_LEN);
    }

    #[test]
    fn fallback_is_prefixed_hex() {
        let slug = fallback_slug();
        assert!(slug.starts_with("course-"));
        assert_eq!(slug.len(), "course-".len() + 8);
        assert!(is_valid(&slug));
    }

    #[test]
    fn validity_matches_normalized_output() {
        for title in ["Matematyka", "A  -  B", "Język Polski", "123"] {
            assert!(is_valid(&normalize(title)), "{}", title);
        }
        assert!(!is_valid("Upper"));
        assert!(!is_valid("-lead"));
        assert!(!is_valid("a--b"));
        assert!(!is_valid(""));
    }
}
