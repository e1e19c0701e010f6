use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Student,
    Teacher,
    Admin,
    #[serde(other)]
    Unknown,
}

impl Role {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "student" => Role::Student,
            "teacher" => Role::Teacher,
            "admin" => Role::Admin,
            _ => Role::Unknown,
        }
    }
}

/// Resolved caller. Role resolution is single-sourced in the resolver; the
/// rest of the crate only consumes the result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub subject_id: String,
    pub role: Role,
}

impl Identity {
    pub fn new(subject_id: impl Into<String>, role: Role) -> Self {
        Self {
            subject_id: subject_id.into(),
            role,
        }
    }

    pub fn is_author(&self) -> bool {
        matches!(self.role, Role::Teacher | Role::Admin)
    }
}

/// Only teachers and admins may create courses or classes.
pub fn require_author(actor: &Identity) -> Result<(), AppError> {
    if actor.is_author() {
        Ok(())
    } else {
        Err(AppError::Unauthorized(format!(
            "{} may not create or change courses",
            actor.subject_id
        )))
    }
}

/// Admins mutate anything; teachers only what they own.
pub fn authorize_owner(actor: &Identity, owner_id: &str) -> Result<(), AppError> {
    match actor.role {
        Role::Admin => Ok(()),
        Role::Teacher if actor.subject_id == owner_id => Ok(()),
        Role::Teacher => Err(AppError::Unauthorized(format!(
            "{} does not own this resource",
            actor.subject_id
        ))),
        _ => require_author(actor),
    }
}

/// Read access: authors through ownership, students through membership.
pub fn authorize_read(actor: &Identity, owner_id: &str, is_member: bool) -> Result<(), AppError> {
    match actor.role {
        Role::Admin => Ok(()),
        Role::Teacher if actor.subject_id == owner_id => Ok(()),
        Role::Teacher | Role::Student if is_member => Ok(()),
        _ => Err(AppError::Unauthorized(format!(
            "{} is not assigned to this course",
            actor.subject_id
        ))),
    }
}

#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, token: &str) -> Result<Identity, AppError>;
}

/// Token table held in memory, for local runs and tests.
#[derive(Debug, Default, Clone)]
pub struct StaticIdentityResolver {
    tokens: HashMap<String, Identity>,
}

impl StaticIdentityResolver {
    pub fn new(tokens: HashMap<String, Identity>) -> Self {
        Self { tokens }
    }

    pub fn with_token(mut self, token: &str, identity: Identity) -> Self {
        self.tokens.insert(token.to_string(), identity);
        self
    }

    /// Parses `token=subject:role` pairs separated by commas.
    pub fn parse(table: &str) -> Result<Self, AppError> {
        let mut tokens = HashMap::new();
        for entry in table.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (token, rest) = entry
                .split_once('=')
                .ok_or_else(|| AppError::Config(format!("invalid identity entry: {}", entry)))?;
            let (subject, role) = rest
                .split_once(':')
                .ok_or_else(|| AppError::Config(format!("invalid identity entry: {}", entry)))?;
            tokens.insert(token.trim().to_string(), Identity::new(subject.trim(), Role::parse(role)));
        }
        Ok(Self { tokens })
    }
}

#[async_trait]
impl IdentityResolver for StaticIdentityResolver {
    async fn resolve(&self, token: &str) -> Result<Identity, AppError> {
        self.tokens.get(token).cloned().ok_or(AppError::Unauthenticated)
    }
}

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    subject_id: String,
    role: Role,
}

/// Delegates verification to an external token verifier.
pub struct HttpIdentityResolver {
    client: Client,
    verify_url: String,
}

impl HttpIdentityResolver {
    pub fn new(verify_url: String, timeout: Duration) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build http client: {}", e)))?;
        Ok(Self { client, verify_url })
    }
}

#[async_trait]
impl IdentityResolver for HttpIdentityResolver {
    async fn resolve(&self, token: &str) -> Result<Identity, AppError> {
        let response = self
            .client
            .post(&self.verify_url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| {
                warn!("identity verifier unreachable: {}", e);
                AppError::Unauthenticated
            })?;

        if !response.status().is_success() {
            warn!("identity verifier rejected token: {}", response.status());
            return Err(AppError::Unauthenticated);
        }

        let verified = response.json::<VerifyResponse>().await.map_err(|e| {
            warn!("identity verifier returned an unreadable body: {}", e);
            AppError::Unauthenticated
        })?;

        Ok(Identity::new(verified.subject_id, verified.role))
    }
}

impl FromRequestParts<AppState> for Identity {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or(AppError::Unauthenticated)?;

        state
            .identity
            .resolve(token)
            .await
            .map_err(|_| AppError::Unauthenticated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_checks_follow_role() {
        let admin = Identity::new("root", Role::Admin);
        let teacher = Identity::new("t1", Role::Teacher);
        let student = Identity::new("s1", Role::Student);

        assert!(authorize_owner(&admin, "t1").is_ok());
        assert!(authorize_owner(&teacher, "t1").is_ok());
        assert!(matches!(authorize_owner(&teacher, "t2"), Err(AppError::Unauthorized(_))));
        assert!(matches!(authorize_owner(&student, "s1"), Err(AppError::Unauthorized(_))));
    }

    #[test]
    fn students_read_only_when_assigned() {
        let student = Identity::new("s1", Role::Student);
        assert!(authorize_read(&student, "t1", true).is_ok());
        assert!(authorize_read(&student, "t1", false).is_err());
        assert!(authorize_read(&Identity::new("x", Role::Unknown), "t1", true).is_err());
    }

    #[test]
    fn parses_static_token_table() {
        let resolver = StaticIdentityResolver::parse("abc=t1:teacher, def=s1:Student,ghi=x:root").unwrap();
        assert_eq!(resolver.tokens["abc"], Identity::new("t1", Role::Teacher));
        assert_eq!(resolver.tokens["def"].role, Role::Student);
        assert_eq!(resolver.tokens["ghi"].role, Role::Unknown);
        assert!(StaticIdentityResolver::parse("broken").is_err());
    }

    #[tokio::test]
    async fn unknown_token_is_unauthenticated() {
        let resolver = StaticIdentityResolver::default().with_token("t", Identity::new("t1", Role::Teacher));
        assert!(resolver.resolve("t").await.is_ok());
        assert!(matches!(resolver.resolve("nope").await, Err(AppError::Unauthenticated)));
    }
}
