use std::collections::HashMap;
use std::env;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, Response, StatusCode, Url};
use tracing::{debug, warn};

use super::dto::{self, Value};
use super::{ClassDocument, CourseDocument, MemberField, ProjectionClient};
use crate::error::{AppError, StoreKind};
use crate::models::MergeOp;

const COURSES: &str = "courses";
const CLASSES: &str = "classes";
const PAGE_SIZE: &str = "300";

#[derive(Clone, Debug)]
pub struct FirestoreConfig {
    pub project_id: String,
    pub database: String,
    pub api_token: String,
    pub base_url: String,
}

impl FirestoreConfig {
    /// `None` when `FIRESTORE_PROJECT_ID` is unset.
    pub fn new_from_env() -> Result<Option<Self>, AppError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Option<Self>, AppError> {
        let Some(project_id) = lookup("FIRESTORE_PROJECT_ID").filter(|v| !v.trim().is_empty()) else {
            return Ok(None);
        };
        let api_token = lookup("FIRESTORE_TOKEN")
            .ok_or_else(|| AppError::Config("FIRESTORE_TOKEN is not set".to_string()))?;
        let database = lookup("FIRESTORE_DATABASE").unwrap_or_else(|| "(default)".to_string());
        let base_url = lookup("FIRESTORE_BASE_URL")
            .unwrap_or_else(|| "https://firestore.googleapis.com/v1".to_string());

        Ok(Some(Self {
            project_id,
            database,
            api_token,
            base_url: base_url.trim_end_matches('/').to_string(),
        }))
    }

    fn documents_root(&self) -> String {
        format!("projects/{}/databases/{}/documents", self.project_id, self.database)
    }
}

/// Firestore REST client. Collection fields are only ever written through
/// array transforms.
pub struct FirestoreClient {
    client: Client,
    config: FirestoreConfig,
}

impl FirestoreClient {
    pub fn new(config: FirestoreConfig, timeout: Duration) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build http client: {}", e)))?;
        Ok(Self { client, config })
    }

    fn document_name(&self, collection: &str, id: &str) -> String {
        format!("{}/{}/{}", self.config.documents_root(), collection, id)
    }

    fn url(&self, path: &str) -> Result<Url, AppError> {
        let raw = format!("{}/{}{}", self.config.base_url, self.config.documents_root(), path);
        Url::parse(&raw).map_err(|e| AppError::Config(format!("invalid Firestore url {}: {}", raw, e)))
    }

    async fn send(&self, request: reqwest::RequestBuilder, context: &str) -> Result<Response, AppError> {
        let response = request
            .bearer_auth(&self.config.api_token)
            .send()
            .await
            .map_err(|e| {
                warn!("Firestore {} transport error: {}", context, e);
                AppError::StoreUnavailable(StoreKind::Projection)
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        match status {
            StatusCode::NOT_FOUND => Err(AppError::NotFound(format!("Firestore {}", context))),
            StatusCode::CONFLICT | StatusCode::TOO_MANY_REQUESTS => {
                warn!("Firestore {} contended: {} {}", context, status, body);
                Err(AppError::StoreUnavailable(StoreKind::Projection))
            }
            s if s.is_server_error() => {
                warn!("Firestore {} server error: {} {}", context, status, body);
                Err(AppError::StoreUnavailable(StoreKind::Projection))
            }
            _ => Err(AppError::Projection(format!("Firestore {} failed: {} {}", context, status, body))),
        }
    }

    async fn get_document(&self, collection: &str, id: &str) -> Result<Option<dto::Document>, AppError> {
        let url = self.url(&format!("/{}/{}", collection, id))?;
        match self.send(self.client.get(url), "get").await {
            Ok(response) => {
                let doc = response
                    .json::<dto::Document>()
                    .await
                    .map_err(|e| AppError::Projection(format!("Failed to parse Firestore document: {}", e)))?;
                Ok(Some(doc))
            }
            Err(AppError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn list_documents(&self, collection: &str) -> Result<Vec<dto::Document>, AppError> {
        let mut documents = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut url = self.url(&format!("/{}", collection))?;
            {
                let mut query = url.query_pairs_mut();
                query.append_pair("pageSize", PAGE_SIZE);
                if let Some(token) = &page_token {
                    query.append_pair("pageToken", token);
                }
            }

            let page = self
                .send(self.client.get(url), "list")
                .await?
                .json::<dto::ListDocumentsResponse>()
                .await
                .map_err(|e| AppError::Projection(format!("Failed to parse Firestore list: {}", e)))?;

            documents.extend(page.documents);
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(documents)
    }

    async fn commit(&self, writes: Vec<dto::Write>, context: &str) -> Result<(), AppError> {
        let url = self.url(":commit")?;
        debug!("Firestore commit ({}): {} write(s)", context, writes.len());
        self.send(self.client.post(url).json(&dto::CommitRequest { writes }), context)
            .await?;
        Ok(())
    }

    fn array_transform(field_path: &str, values: &[String], op: MergeOp) -> dto::FieldTransform {
        let array = Value::strings(values);
        match op {
            MergeOp::Add => dto::FieldTransform {
                field_path: field_path.to_string(),
                append_missing_elements: Some(array),
                remove_all_from_array: None,
            },
            MergeOp::Remove => dto::FieldTransform {
                field_path: field_path.to_string(),
                append_missing_elements: None,
                remove_all_from_array: Some(array),
            },
        }
    }

    /// A write that only applies transforms to an existing document.
    fn transform_write(&self, collection: &str, id: &str, transforms: Vec<dto::FieldTransform>) -> dto::Write {
        dto::Write {
            update: Some(dto::DocumentWrite {
                name: self.document_name(collection, id),
                fields: HashMap::new(),
            }),
            update_mask: Some(dto::DocumentMask { field_paths: Vec::new() }),
            update_transforms: transforms,
            current_document: Some(dto::Precondition { exists: true }),
            ..Default::default()
        }
    }

    /// Scalars go through the update mask; collections become append
    /// transforms. No precondition, so a missing document is created.
    fn merge_write(
        &self,
        collection: &str,
        id: &str,
        fields: HashMap<String, Value>,
        collections: &[(&str, &[String])],
    ) -> dto::Write {
        let field_paths = fields.keys().cloned().collect();
        let update_transforms = collections
            .iter()
            .filter(|(_, values)| !values.is_empty())
            .map(|(path, values)| Self::array_transform(path, values, MergeOp::Add))
            .collect();

        dto::Write {
            update: Some(dto::DocumentWrite {
                name: self.document_name(collection, id),
                fields,
            }),
            update_mask: Some(dto::DocumentMask { field_paths }),
            update_transforms,
            ..Default::default()
        }
    }
}

fn timestamp(value: &DateTime<Utc>) -> Value {
    Value::TimestampValue(value.to_rfc3339_opts(SecondsFormat::Micros, true))
}

fn get_string(doc: &dto::Document, key: &str) -> String {
    match doc.fields.get(key) {
        Some(Value::StringValue(s)) => s.clone(),
        _ => String::new(),
    }
}

fn get_i32(doc: &dto::Document, key: &str) -> i32 {
    match doc.fields.get(key) {
        Some(Value::IntegerValue(s)) => s.parse().unwrap_or(0),
        Some(Value::DoubleValue(d)) => *d as i32,
        _ => 0,
    }
}

fn get_bool(doc: &dto::Document, key: &str, default: bool) -> bool {
    match doc.fields.get(key) {
        Some(Value::BooleanValue(b)) => *b,
        _ => default,
    }
}

fn get_strings(doc: &dto::Document, key: &str) -> Vec<String> {
    match doc.fields.get(key) {
        Some(Value::ArrayValue(array)) => array
            .values
            .iter()
            .filter_map(|v| match v {
                Value::StringValue(s) => Some(s.clone()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn get_timestamp(doc: &dto::Document, key: &str, fallback: Option<&String>) -> DateTime<Utc> {
    let raw = match doc.fields.get(key) {
        Some(Value::TimestampValue(s)) | Some(Value::StringValue(s)) => Some(s),
        _ => fallback,
    };
    raw.and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
}

fn course_from_document(doc: &dto::Document) -> CourseDocument {
    CourseDocument {
        id: doc.id().to_string(),
        title: get_string(doc, "title"),
        slug: get_string(doc, "slug"),
        owner_id: get_string(doc, "ownerId"),
        subject: get_string(doc, "subject"),
        year_of_study: get_i32(doc, "yearOfStudy"),
        is_active: get_bool(doc, "isActive", true),
        links: get_strings(doc, "links"),
        attachment_urls: get_strings(doc, "attachmentUrls"),
        assigned_users: get_strings(doc, "assignedUsers"),
        assigned_classes: get_strings(doc, "assignedClasses"),
        created_at: get_timestamp(doc, "createdAt", doc.create_time.as_ref()),
        updated_at: get_timestamp(doc, "updatedAt", doc.update_time.as_ref()),
    }
}

fn class_from_document(doc: &dto::Document) -> ClassDocument {
    ClassDocument {
        id: doc.id().to_string(),
        name: get_string(doc, "name"),
        grade_level: get_i32(doc, "gradeLevel"),
        owner_id: get_string(doc, "ownerId"),
        students: get_strings(doc, "students"),
        assigned_courses: get_strings(doc, "assignedCourses"),
        updated_at: get_timestamp(doc, "updatedAt", doc.update_time.as_ref()),
    }
}

fn course_scalars(doc: &CourseDocument) -> HashMap<String, Value> {
    HashMap::from([
        ("title".to_string(), Value::string(&doc.title)),
        ("slug".to_string(), Value::string(&doc.slug)),
        ("ownerId".to_string(), Value::string(&doc.owner_id)),
        ("subject".to_string(), Value::string(&doc.subject)),
        ("yearOfStudy".to_string(), Value::integer(doc.year_of_study as i64)),
        ("isActive".to_string(), Value::BooleanValue(doc.is_active)),
        ("createdAt".to_string(), timestamp(&doc.created_at)),
        ("updatedAt".to_string(), timestamp(&doc.updated_at)),
    ])
}

#[async_trait]
impl ProjectionClient for FirestoreClient {
    async fn fetch_course(&self, id: &str) -> Result<Option<CourseDocument>, AppError> {
        Ok(self.get_document(COURSES, id).await?.as_ref().map(course_from_document))
    }

    async fn list_courses(&self) -> Result<Vec<CourseDocument>, AppError> {
        let documents = self.list_documents(COURSES).await?;
        Ok(documents.iter().map(course_from_document).collect())
    }

    async fn slug_owners(&self, slug: &str) -> Result<Vec<String>, AppError> {
        let url = self.url(":runQuery")?;
        let request = dto::RunQueryRequest {
            structured_query: dto::StructuredQuery {
                from: vec![dto::CollectionSelector {
                    collection_id: COURSES.to_string(),
                }],
                filter: dto::Filter {
                    field_filter: dto::FieldFilter {
                        field: dto::FieldReference {
                            field_path: "slug".to_string(),
                        },
                        op: "EQUAL".to_string(),
                        value: Value::string(slug),
                    },
                },
                limit: 2,
            },
        };

        let items = self
            .send(self.client.post(url).json(&request), "runQuery")
            .await?
            .json::<Vec<dto::RunQueryResponseItem>>()
            .await
            .map_err(|e| AppError::Projection(format!("Failed to parse Firestore query: {}", e)))?;

        Ok(items
            .into_iter()
            .filter_map(|item| item.document)
            .map(|doc| doc.id().to_string())
            .collect())
    }

    async fn merge_course(&self, doc: &CourseDocument) -> Result<(), AppError> {
        let write = self.merge_write(
            COURSES,
            &doc.id,
            course_scalars(doc),
            &[
                (MemberField::Links.field_path(), doc.links.as_slice()),
                (MemberField::AttachmentUrls.field_path(), doc.attachment_urls.as_slice()),
                (MemberField::AssignedUsers.field_path(), doc.assigned_users.as_slice()),
                (MemberField::AssignedClasses.field_path(), doc.assigned_classes.as_slice()),
            ],
        );
        self.commit(vec![write], "merge course").await
    }

    async fn merge_course_members(
        &self,
        course_id: &str,
        field: MemberField,
        values: &[String],
        op: MergeOp,
    ) -> Result<(), AppError> {
        if values.is_empty() {
            return Ok(());
        }
        let write = self.transform_write(
            COURSES,
            course_id,
            vec![Self::array_transform(field.field_path(), values, op)],
        );
        self.commit(vec![write], "merge course members").await
    }

    async fn delete_course(&self, id: &str) -> Result<(), AppError> {
        let write = dto::Write {
            delete: Some(self.document_name(COURSES, id)),
            ..Default::default()
        };
        self.commit(vec![write], "delete course").await
    }

    async fn fetch_class(&self, id: &str) -> Result<Option<ClassDocument>, AppError> {
        Ok(self.get_document(CLASSES, id).await?.as_ref().map(class_from_document))
    }

    async fn merge_class(&self, doc: &ClassDocument) -> Result<(), AppError> {
        let fields = HashMap::from([
            ("name".to_string(), Value::string(&doc.name)),
            ("gradeLevel".to_string(), Value::integer(doc.grade_level as i64)),
            ("ownerId".to_string(), Value::string(&doc.owner_id)),
            ("updatedAt".to_string(), timestamp(&doc.updated_at)),
        ]);
        let write = self.merge_write(
            CLASSES,
            &doc.id,
            fields,
            &[("students", doc.students.as_slice()), ("assignedCourses", doc.assigned_courses.as_slice())],
        );
        self.commit(vec![write], "merge class").await
    }

    async fn merge_class_students(&self, class_id: &str, values: &[String], op: MergeOp) -> Result<(), AppError> {
        if values.is_empty() {
            return Ok(());
        }
        let write = self.transform_write(CLASSES, class_id, vec![Self::array_transform("students", values, op)]);
        self.commit(vec![write], "merge class students").await
    }

    async fn link_course_class(&self, course_id: &str, class_id: &str) -> Result<(), AppError> {
        let course_write = self.transform_write(
            COURSES,
            course_id,
            vec![Self::array_transform(
                MemberField::AssignedClasses.field_path(),
                &[class_id.to_string()],
                MergeOp::Add,
            )],
        );
        let class_write = self.transform_write(
            CLASSES,
            class_id,
            vec![Self::array_transform("assignedCourses", &[course_id.to_string()], MergeOp::Add)],
        );
        self.commit(vec![course_write, class_write], "link course class").await
    }

    async fn unlink_course_from_class(&self, class_id: &str, course_id: &str) -> Result<(), AppError> {
        let write = self.transform_write(
            CLASSES,
            class_id,
            vec![Self::array_transform("assignedCourses", &[course_id.to_string()], MergeOp::Remove)],
        );
        match self.commit(vec![write], "unlink course class").await {
            Err(AppError::NotFound(_)) => Ok(()),
            other => other,
        }
    }

    async fn delete_class(&self, id: &str) -> Result<(), AppError> {
        let write = dto::Write {
            delete: Some(self.document_name(CLASSES, id)),
            ..Default::default()
        };
        self.commit(vec![write], "delete class").await
    }

    async fn health_check(&self) -> Result<(), AppError> {
        let mut url = self.url(&format!("/{}", COURSES))?;
        url.query_pairs_mut().append_pair("pageSize", "1");
        self.send(self.client.get(url), "health").await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> FirestoreClient {
        FirestoreClient::new(
            FirestoreConfig {
                project_id: "demo".to_string(),
                database: "(default)".to_string(),
                api_token: "token".to_string(),
                base_url: "https://firestore.googleapis.com/v1".to_string(),
            },
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn merge_write_masks_scalars_and_appends_collections() {
        let client = client();
        let users = vec!["u1".to_string()];
        let empty: Vec<String> = Vec::new();
        let write = client.merge_write(
            COURSES,
            "c1",
            HashMap::from([("title".to_string(), Value::string("Biologia"))]),
            &[("assignedUsers", users.as_slice()), ("links", empty.as_slice())],
        );
        let json = serde_json::to_value(&write).unwrap();

        assert_eq!(
            json["update"]["name"],
            "projects/demo/databases/(default)/documents/courses/c1"
        );
        assert_eq!(json["updateMask"]["fieldPaths"][0], "title");
        assert_eq!(json["updateTransforms"].as_array().unwrap().len(), 1);
        assert_eq!(json["updateTransforms"][0]["fieldPath"], "assignedUsers");
        assert!(json.get("currentDocument").is_none());
    }

    #[test]
    fn parses_course_document_with_defaults() {
        let doc: dto::Document = serde_json::from_value(serde_json::json!({
            "name": "projects/demo/databases/(default)/documents/courses/c9",
            "fields": {
                "title": { "stringValue": "Historia" },
                "slug": { "stringValue": "historia" },
                "assignedUsers": { "arrayValue": { "values": [{ "stringValue": "u1" }, { "stringValue": "u2" }] } }
            },
            "updateTime": "2026-02-01T08:00:00.000000Z"
        }))
        .unwrap();

        let course = course_from_document(&doc);
        assert_eq!(course.id, "c9");
        assert_eq!(course.slug, "historia");
        assert!(course.is_active);
        assert_eq!(course.assigned_users, vec!["u1", "u2"]);
        assert!(course.links.is_empty());
        assert_eq!(course.updated_at.to_rfc3339(), "2026-02-01T08:00:00+00:00");
    }
}
