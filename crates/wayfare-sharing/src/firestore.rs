//! Cloud Firestore backend over the REST v1 API.
//!
//! Documents are addressed as
//! `{base}/projects/{project}/databases/(default)/documents/{collection}/{id}`.
//! Firestore's typed values (`stringValue`, `arrayValue`, ...) are converted
//! to and from plain JSON at this boundary. Change listeners poll.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Number, Value};
use tokio::sync::mpsc;
use tracing::instrument;
use wayfare_core::FirestoreConfig;

use crate::error::SharingError;
use crate::retry::{send_with_retry, RetryPolicy};
use crate::store::{Document, DocumentStore, DocumentStream, Filter, LISTEN_BUFFER};

#[derive(Debug, Deserialize)]
struct FirestoreDocument {
    name: String,
    #[serde(default)]
    fields: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct RunQueryItem {
    document: Option<FirestoreDocument>,
}

#[derive(Debug, Deserialize)]
struct FirestoreErrorBody {
    error: Option<FirestoreErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct FirestoreErrorDetail {
    message: Option<String>,
}

struct Inner {
    http: reqwest::Client,
    documents_url: String,
    api_key: Option<String>,
    poll_interval: Duration,
    retry: RetryPolicy,
}

#[derive(Clone)]
pub struct FirestoreDocumentStore {
    inner: Arc<Inner>,
}

impl FirestoreDocumentStore {
    pub fn new(config: &FirestoreConfig) -> Self {
        let documents_url = format!(
            "{}/projects/{}/databases/(default)/documents",
            config.base_url.trim_end_matches('/'),
            config.project_id
        );
        Self {
            inner: Arc::new(Inner {
                http: reqwest::Client::new(),
                documents_url,
                api_key: config.api_key.clone(),
                poll_interval: Duration::from_secs(config.poll_interval_secs.max(1)),
                retry: RetryPolicy::default(),
            }),
        }
    }

    /// Override the poll interval backing `listen`.
    pub fn with_poll_interval(self, poll_interval: Duration) -> Self {
        self.rebuild(|inner| inner.poll_interval = poll_interval)
    }

    pub fn with_retry_policy(self, retry: RetryPolicy) -> Self {
        self.rebuild(|inner| inner.retry = retry)
    }

    fn rebuild(self, apply: impl FnOnce(&mut Inner)) -> Self {
        let mut inner = Inner {
            http: self.inner.http.clone(),
            documents_url: self.inner.documents_url.clone(),
            api_key: self.inner.api_key.clone(),
            poll_interval: self.inner.poll_interval,
            retry: self.inner.retry.clone(),
        };
        apply(&mut inner);
        Self {
            inner: Arc::new(inner),
        }
    }

    fn collection_url(&self, collection: &str) -> String {
        format!("{}/{}", self.inner.documents_url, collection)
    }

    fn document_url(&self, collection: &str, id: &str) -> String {
        format!(
            "{}/{}/{}",
            self.inner.documents_url,
            collection,
            urlencoding::encode(id)
        )
    }

    fn with_key(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.inner.api_key {
            Some(key) => request.query(&[("key", key)]),
            None => request,
        }
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, SharingError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<FirestoreErrorBody>(&text)
            .ok()
            .and_then(|body| body.error)
            .and_then(|detail| detail.message)
            .unwrap_or(text);

        Err(SharingError::Remote {
            status: status.as_u16(),
            message,
        })
    }

    async fn write(
        &self,
        request: reqwest::RequestBuilder,
        data: &Map<String, Value>,
    ) -> Result<FirestoreDocument, SharingError> {
        let response = self
            .with_key(request)
            .json(&json!({ "fields": encode_fields(data) }))
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }
}

#[async_trait]
impl DocumentStore for FirestoreDocumentStore {
    #[instrument(skip(self, data), level = "info")]
    async fn add(&self, collection: &str, data: Map<String, Value>) -> Result<String, SharingError> {
        let request = self.inner.http.post(self.collection_url(collection));
        let created = self.write(request, &data).await?;
        Ok(document_id(&created.name).to_string())
    }

    #[instrument(skip(self, data), level = "info")]
    async fn set(
        &self,
        collection: &str,
        id: &str,
        data: Map<String, Value>,
    ) -> Result<(), SharingError> {
        let request = self.inner.http.patch(self.document_url(collection, id));
        self.write(request, &data).await?;
        Ok(())
    }

    #[instrument(skip(self, data), level = "info")]
    async fn update(
        &self,
        collection: &str,
        id: &str,
        data: Map<String, Value>,
    ) -> Result<(), SharingError> {
        let request = self
            .inner
            .http
            .patch(self.document_url(collection, id))
            .query(&[("currentDocument.exists", "true")]);

        match self.write(request, &data).await {
            Err(SharingError::Remote { status: 404, .. }) => Err(SharingError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            }),
            other => other.map(|_| ()),
        }
    }

    #[instrument(skip(self), level = "info")]
    async fn delete(&self, collection: &str, id: &str) -> Result<(), SharingError> {
        let response = self
            .with_key(self.inner.http.delete(self.document_url(collection, id)))
            .send()
            .await?;
        match Self::check(response).await {
            Ok(_) | Err(SharingError::Remote { status: 404, .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self), level = "debug")]
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, SharingError> {
        let url = self.document_url(collection, id);
        let response = send_with_retry(&self.inner.retry, || {
            self.with_key(self.inner.http.get(&url)).send()
        })
        .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let doc: FirestoreDocument = Self::check(response).await?.json().await?;
        decode_document(doc).map(Some)
    }

    #[instrument(skip(self), level = "debug")]
    async fn query(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> Result<Vec<Document>, SharingError> {
        let url = format!("{}:runQuery", self.inner.documents_url);
        let body = json!({ "structuredQuery": structured_query(collection, filter) });

        let response = send_with_retry(&self.inner.retry, || {
            self.with_key(self.inner.http.post(&url)).json(&body).send()
        })
        .await?;

        let items: Vec<RunQueryItem> = Self::check(response).await?.json().await?;
        let mut docs = items
            .into_iter()
            .filter_map(|item| item.document)
            .map(decode_document)
            .collect::<Result<Vec<_>, _>>()?;
        docs.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(docs)
    }

    fn listen(&self, collection: &str, filter: Filter) -> DocumentStream {
        let (tx, rx) = mpsc::channel(LISTEN_BUFFER);
        let store = self.clone();
        let collection = collection.to_string();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(store.inner.poll_interval);
            let mut last: Option<Vec<Document>> = None;
            let mut failing = false;

            loop {
                tokio::select! {
                    _ = tx.closed() => return,
                    _ = ticker.tick() => {}
                }

                match store.query(&collection, &filter).await {
                    Ok(snapshot) => {
                        failing = false;
                        if last.as_ref() != Some(&snapshot) {
                            if tx.send(Ok(snapshot.clone())).await.is_err() {
                                return;
                            }
                            last = Some(snapshot);
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Polling {} failed: {}", collection, e);
                        // Report once per outage
                        if !failing {
                            failing = true;
                            if tx.send(Err(e)).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            }
        });

        rx
    }
}

fn structured_query(collection: &str, filter: &Filter) -> Value {
    let (field, op, value) = match filter {
        Filter::ArrayContains { field, value } => (field, "ARRAY_CONTAINS", value),
        Filter::Equals { field, value } => (field, "EQUAL", value),
    };
    json!({
        "from": [{ "collectionId": collection }],
        "where": {
            "fieldFilter": {
                "field": { "fieldPath": field },
                "op": op,
                "value": encode_value(value),
            }
        }
    })
}

fn document_id(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

fn decode_document(doc: FirestoreDocument) -> Result<Document, SharingError> {
    let id = document_id(&doc.name).to_string();
    let data = decode_fields(&doc.fields).map_err(|message| SharingError::InvalidDocument {
        id: id.clone(),
        message,
    })?;
    Ok(Document { id, data })
}

fn encode_fields(data: &Map<String, Value>) -> Map<String, Value> {
    data.iter()
        .map(|(k, v)| (k.clone(), encode_value(v)))
        .collect()
}

fn encode_value(value: &Value) -> Value {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(b) => json!({ "booleanValue": b }),
        Value::Number(n) if n.is_f64() => json!({ "doubleValue": n }),
        // Firestore sends 64-bit integers as strings
        Value::Number(n) => json!({ "integerValue": n.to_string() }),
        Value::String(s) => json!({ "stringValue": s }),
        Value::Array(items) => json!({
            "arrayValue": { "values": items.iter().map(encode_value).collect::<Vec<_>>() }
        }),
        Value::Object(map) => json!({ "mapValue": { "fields": encode_fields(map) } }),
    }
}

fn decode_fields(fields: &Map<String, Value>) -> Result<Map<String, Value>, String> {
    fields
        .iter()
        .map(|(k, v)| decode_value(v).map(|v| (k.clone(), v)))
        .collect()
}

fn decode_value(value: &Value) -> Result<Value, String> {
    let Some((kind, inner)) = value.as_object().and_then(|m| m.iter().next()) else {
        return Err(format!("not a Firestore value: {}", value));
    };

    match kind.as_str() {
        "nullValue" => Ok(Value::Null),
        "booleanValue" | "doubleValue" => Ok(inner.clone()),
        "stringValue" | "timestampValue" | "referenceValue" | "bytesValue" => Ok(inner.clone()),
        "integerValue" => {
            let parsed = match inner {
                Value::String(s) => s.parse::<i64>().map_err(|e| e.to_string())?,
                Value::Number(n) => n.as_i64().ok_or("integer out of range")?,
                other => return Err(format!("bad integerValue: {}", other)),
            };
            Ok(Value::Number(Number::from(parsed)))
        }
        "arrayValue" => inner
            .get("values")
            .and_then(Value::as_array)
            .map(|items| items.iter().map(decode_value).collect::<Result<Vec<_>, _>>())
            .transpose()
            .map(|items| Value::Array(items.unwrap_or_default())),
        "mapValue" => {
            let empty = Map::new();
            let fields = inner
                .get("fields")
                .and_then(Value::as_object)
                .unwrap_or(&empty);
            decode_fields(fields).map(Value::Object)
        }
        "geoPointValue" => Ok(inner.clone()),
        other => Err(format!("unsupported Firestore value type {}", other)),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const DOCS: &str = "/projects/wayfare-test/databases/(default)/documents";

    fn store(server: &MockServer) -> FirestoreDocumentStore {
        FirestoreDocumentStore::new(&FirestoreConfig {
            project_id: "wayfare-test".to_string(),
            api_key: Some("key123".to_string()),
            base_url: server.uri(),
            poll_interval_secs: 30,
        })
        .with_retry_policy(RetryPolicy::none())
    }

    fn grant_doc(id: &str, emails: &[&str]) -> Value {
        json!({
            "name": format!("projects/wayfare-test/databases/(default)/documents/sharedTrips/{}", id),
            "fields": {
                "tripId": {"stringValue": id},
                "sharedWith": {"arrayValue": {"values": emails.iter().map(|e| json!({"stringValue": e})).collect::<Vec<_>>()}},
                "permissions": {"arrayValue": {"values": [{"stringValue": "view"}]}}
            }
        })
    }

    #[test]
    fn test_document_url_escapes_id() {
        let store = FirestoreDocumentStore::new(&FirestoreConfig {
            project_id: "wayfare-test".to_string(),
            api_key: None,
            base_url: "http://127.0.0.1:9/".to_string(),
            poll_interval_secs: 0,
        });

        assert_eq!(
            store.document_url("sharedTrips", "a/b?c#d"),
            format!("http://127.0.0.1:9{}/sharedTrips/a%2Fb%3Fc%23d", DOCS)
        );
        assert_eq!(store.inner.poll_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_value_conversion() {
        let plain = json!({
            "title": "Lisbon",
            "budget": 4200.5,
            "nights": 7,
            "shared": true,
            "note": null,
            "tags": ["food", "sun"],
            "location": {"latitude": 38.7, "longitude": -9.1}
        });
        let plain = plain.as_object().unwrap();

        let encoded = encode_fields(plain);
        assert_eq!(encoded["nights"], json!({"integerValue": "7"}));
        assert_eq!(encoded["budget"], json!({"doubleValue": 4200.5}));
        assert_eq!(
            encoded["tags"],
            json!({"arrayValue": {"values": [{"stringValue": "food"}, {"stringValue": "sun"}]}})
        );

        assert_eq!(&decode_fields(&encoded).unwrap(), plain);
    }

    #[test]
    fn test_empty_array_and_map_decode() {
        let fields = json!({
            "sharedWith": {"arrayValue": {}},
            "meta": {"mapValue": {}}
        });

        let decoded = decode_fields(fields.as_object().unwrap()).unwrap();

        assert_eq!(decoded["sharedWith"], json!([]));
        assert_eq!(decoded["meta"], json!({}));
    }

    #[tokio::test]
    async fn test_get_document() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("{}/sharedTrips/t1", DOCS)))
            .and(query_param("key", "key123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(grant_doc("t1", &["a@x.com"])))
            .mount(&server)
            .await;

        let doc = store(&server).get("sharedTrips", "t1").await.unwrap().unwrap();

        assert_eq!(doc.id, "t1");
        assert_eq!(doc.data["sharedWith"], json!(["a@x.com"]));
    }

    #[tokio::test]
    async fn test_get_missing_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "error": {"code": 404, "message": "Document not found", "status": "NOT_FOUND"}
            })))
            .mount(&server)
            .await;

        assert!(store(&server).get("sharedTrips", "nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_run_query() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("{}:runQuery", DOCS)))
            .and(body_partial_json(json!({
                "structuredQuery": {
                    "from": [{"collectionId": "sharedTrips"}],
                    "where": {"fieldFilter": {
                        "field": {"fieldPath": "sharedWith"},
                        "op": "ARRAY_CONTAINS",
                        "value": {"stringValue": "a@x.com"}
                    }}
                }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"document": grant_doc("t2", &["a@x.com"]), "readTime": "2025-01-01T00:00:00Z"},
                {"document": grant_doc("t1", &["a@x.com", "b@x.com"]), "readTime": "2025-01-01T00:00:00Z"}
            ])))
            .mount(&server)
            .await;

        let docs = store(&server)
            .query("sharedTrips", &Filter::array_contains("sharedWith", "a@x.com"))
            .await
            .unwrap();

        let ids: Vec<&str> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["t1", "t2"]);
    }

    #[tokio::test]
    async fn test_empty_query_result() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("{}:runQuery", DOCS)))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!([{"readTime": "2025-01-01T00:00:00Z"}])),
            )
            .mount(&server)
            .await;

        let docs = store(&server)
            .query("sharedTrips", &Filter::equals("tripId", "t9"))
            .await
            .unwrap();

        assert!(docs.is_empty());
    }

    #[tokio::test]
    async fn test_set_sends_typed_fields() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path(format!("{}/sharedTrips/t1", DOCS)))
            .and(body_partial_json(json!({
                "fields": {"sharedWith": {"arrayValue": {"values": [{"stringValue": "a@x.com"}]}}}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(grant_doc("t1", &["a@x.com"])))
            .expect(1)
            .mount(&server)
            .await;

        let data = json!({"tripId": "t1", "sharedWith": ["a@x.com"], "permissions": ["view"]});
        store(&server)
            .set("sharedTrips", "t1", data.as_object().unwrap().clone())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(query_param("currentDocument.exists", "true"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "error": {"code": 404, "message": "No document to update"}
            })))
            .mount(&server)
            .await;

        let err = store(&server)
            .update("sharedTrips", "t1", Map::new())
            .await
            .unwrap_err();

        assert!(matches!(err, SharingError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_add_returns_generated_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("{}/trips", DOCS)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "projects/wayfare-test/databases/(default)/documents/trips/gen42",
                "fields": {}
            })))
            .mount(&server)
            .await;

        let id = store(&server).add("trips", Map::new()).await.unwrap();

        assert_eq!(id, "gen42");
    }

    #[tokio::test]
    async fn test_permission_denied_surfaces_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "error": {"code": 403, "message": "Missing or insufficient permissions."}
            })))
            .mount(&server)
            .await;

        let err = store(&server)
            .query("sharedTrips", &Filter::equals("tripId", "t1"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SharingError::Remote { status: 403, ref message } if message == "Missing or insufficient permissions."
        ));
    }

    #[tokio::test]
    async fn test_listen_polls_for_changes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("{}:runQuery", DOCS)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"document": grant_doc("t1", &["a@x.com"])}
            ])))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(format!("{}:runQuery", DOCS)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"document": grant_doc("t1", &["a@x.com"])},
                {"document": grant_doc("t2", &["a@x.com"])}
            ])))
            .mount(&server)
            .await;

        let store = store(&server).with_poll_interval(Duration::from_millis(20));
        let mut stream = store.listen("sharedTrips", Filter::array_contains("sharedWith", "a@x.com"));

        assert_eq!(stream.recv().await.unwrap().unwrap().len(), 1);
        // The unchanged second poll is skipped
        assert_eq!(stream.recv().await.unwrap().unwrap().len(), 2);
    }
}
