use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Typed Firestore value, externally tagged the way the REST API encodes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Value {
    NullValue(()),
    BooleanValue(bool),
    IntegerValue(String),
    DoubleValue(f64),
    TimestampValue(String),
    StringValue(String),
    ArrayValue(ArrayValue),
    MapValue(MapValue),
}

impl Value {
    pub fn string(value: impl Into<String>) -> Self {
        Value::StringValue(value.into())
    }

    pub fn integer(value: i64) -> Self {
        Value::IntegerValue(value.to_string())
    }

    pub fn strings<'a>(values: impl IntoIterator<Item = &'a String>) -> ArrayValue {
        ArrayValue {
            values: values.into_iter().map(|v| Value::StringValue(v.clone())).collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArrayValue {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MapValue {
    #[serde(default)]
    pub fields: HashMap<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub name: String,
    #[serde(default)]
    pub fields: HashMap<String, Value>,
    #[serde(default)]
    pub create_time: Option<String>,
    #[serde(default)]
    pub update_time: Option<String>,
}

impl Document {
    /// Last path segment of the resource name, i.e. the document id.
    pub fn id(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListDocumentsResponse {
    #[serde(default)]
    pub documents: Vec<Document>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunQueryRequest {
    pub structured_query: StructuredQuery,
}

#[derive(Debug, Serialize)]
pub struct StructuredQuery {
    pub from: Vec<CollectionSelector>,
    #[serde(rename = "where")]
    pub filter: Filter,
    pub limit: i32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSelector {
    pub collection_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Filter {
    pub field_filter: FieldFilter,
}

#[derive(Debug, Serialize)]
pub struct FieldFilter {
    pub field: FieldReference,
    pub op: String,
    pub value: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldReference {
    pub field_path: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunQueryResponseItem {
    #[serde(default)]
    pub document: Option<Document>,
    #[serde(default)]
    pub read_time: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CommitRequest {
    pub writes: Vec<Write>,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Write {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update: Option<DocumentWrite>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delete: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_mask: Option<DocumentMask>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub update_transforms: Vec<FieldTransform>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_document: Option<Precondition>,
}

#[derive(Debug, Serialize)]
pub struct DocumentWrite {
    pub name: String,
    pub fields: HashMap<String, Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMask {
    pub field_paths: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldTransform {
    pub field_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub append_missing_elements: Option<ArrayValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remove_all_from_array: Option<ArrayValue>,
}

#[derive(Debug, Serialize)]
pub struct Precondition {
    pub exists: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_typed_document_fields() {
        let doc: Document = serde_json::from_value(serde_json::json!({
            "name": "projects/p/databases/(default)/documents/courses/c1",
            "fields": {
                "title": { "stringValue": "Matematyka" },
                "yearOfStudy": { "integerValue": "2" },
                "isActive": { "booleanValue": true },
                "assignedUsers": { "arrayValue": { "values": [{ "stringValue": "u1" }] } },
                "links": { "arrayValue": {} },
                "thumbnail": { "nullValue": null }
            },
            "createTime": "2026-01-10T10:00:00Z"
        }))
        .unwrap();

        assert_eq!(doc.id(), "c1");
        assert_eq!(doc.fields["yearOfStudy"], Value::IntegerValue("2".to_string()));
        assert_eq!(doc.fields["links"], Value::ArrayValue(ArrayValue::default()));
        assert_eq!(doc.fields["thumbnail"], Value::NullValue(()));
    }

    #[test]
    fn transform_write_omits_empty_parts() {
        let write = Write {
            update_transforms: vec![FieldTransform {
                field_path: "assignedUsers".to_string(),
                append_missing_elements: Some(Value::strings(&["u1".to_string()])),
                remove_all_from_array: None,
            }],
            current_document: Some(Precondition { exists: true }),
            ..Default::default()
        };
        let json = serde_json::to_value(&write).unwrap();
        assert!(json.get("update").is_none());
        assert_eq!(json["updateTransforms"][0]["appendMissingElements"]["values"][0]["stringValue"], "u1");
        assert_eq!(json["currentDocument"]["exists"], true);
    }
}
