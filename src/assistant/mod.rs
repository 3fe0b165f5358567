use async_trait::async_trait;
use log::{ debug, info, warn };
use reqwest::multipart::{ Form, Part };
use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::backend::{ ensure_success, extract_error_detail, read_json, ApiClient };
use crate::error::{ SyncError, SyncResult };

/// One assistant turn as sent to `POST /chat`.
#[derive(Clone, Debug, PartialEq)]
pub struct ChatRequest {
    pub message: String,
    pub chat_id: String,
    pub use_docs: bool,
    pub system_prompt: String,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ChatReply {
    pub response: String,
    #[serde(default)]
    pub chat_id: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct UploadReply {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub file_path: Option<String>,
}

/// A document the backend has indexed for retrieval.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DocumentEntry {
    pub id: String,
    pub filename: String,
}

#[derive(Deserialize)]
struct WireDocument {
    #[serde(default, alias = "document_id")]
    id: Option<JsonValue>,
    #[serde(default, alias = "name")]
    filename: Option<String>,
}

impl WireDocument {
    fn into_entry(self) -> Option<DocumentEntry> {
        let id = match self.id? {
            JsonValue::String(s) if !s.trim().is_empty() => s,
            JsonValue::Number(n) => n.to_string(),
            _ => {
                return None;
            }
        };
        let filename = self.filename.unwrap_or_else(|| id.clone());
        Some(DocumentEntry { id, filename })
    }
}

/// The listing comes as `{"files": [...]}`, `{"documents": [...]}` or a bare
/// array depending on the backend version.
fn decode_documents(body: JsonValue) -> SyncResult<Vec<DocumentEntry>> {
    let items = match body {
        JsonValue::Array(items) => items,
        JsonValue::Object(mut map) => {
            match map.remove("files").or_else(|| map.remove("documents")) {
                Some(JsonValue::Array(items)) => items,
                Some(JsonValue::Null) | None => Vec::new(),
                Some(other) => {
                    return Err(SyncError::Malformed(format!("document list: {}", other)));
                }
            }
        }
        other => {
            return Err(SyncError::Malformed(format!("document list: {}", other)));
        }
    };

    Ok(
        items
            .into_iter()
            .filter_map(|item| serde_json::from_value::<WireDocument>(item).ok())
            .filter_map(WireDocument::into_entry)
            .collect()
    )
}

#[async_trait]
pub trait AssistantClient: Send + Sync {
    async fn chat(&self, request: &ChatRequest) -> SyncResult<ChatReply>;

    async fn upload(&self, file_name: &str, bytes: Vec<u8>) -> SyncResult<UploadReply>;

    async fn list_documents(&self) -> SyncResult<Vec<DocumentEntry>>;

    async fn delete_document(&self, id: &str) -> SyncResult<()>;

    /// Removes every uploaded file and clears the retrieval index.
    async fn delete_all_documents(&self) -> SyncResult<()>;
}

/// The inference backend reached through `/chat` and `/upload`.
pub struct RemoteAssistant {
    api: ApiClient,
}

impl RemoteAssistant {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }
}

#[async_trait]
impl AssistantClient for RemoteAssistant {
    async fn chat(&self, request: &ChatRequest) -> SyncResult<ChatReply> {
        let url = self.api.endpoint(&["chat"])?;
        let form = Form::new()
            .text("message", request.message.clone())
            .text("chat_id", request.chat_id.clone())
            .text("use_docs", request.use_docs.to_string())
            .text("system_prompt", request.system_prompt.clone());

        debug!("Sending chat turn for {} (use_docs: {})", request.chat_id, request.use_docs);
        let resp = ensure_success(self.api.http().post(url).multipart(form).send().await?).await?;
        let reply: ChatReply = read_json(resp).await.map_err(|e| match e {
            SyncError::Malformed(detail) => SyncError::Malformed(format!("chat reply: {}", detail)),
            other => other,
        })?;
        if reply.response.trim().is_empty() {
            return Err(SyncError::Malformed("chat reply: empty response".to_string()));
        }
        Ok(reply)
    }

    async fn upload(&self, file_name: &str, bytes: Vec<u8>) -> SyncResult<UploadReply> {
        let url = self.api.endpoint(&["upload"])?;
        let size = bytes.len();
        let form = Form::new().part("file", Part::bytes(bytes).file_name(file_name.to_string()));

        info!("Uploading {} ({} bytes)", file_name, size);
        let resp = ensure_success(self.api.http().post(url).multipart(form).send().await?).await?;
        let text = resp.text().await?;
        Ok(serde_json::from_str(&text).unwrap_or_default())
    }

    async fn list_documents(&self) -> SyncResult<Vec<DocumentEntry>> {
        let body: JsonValue = self.api.get_json(&["documents"]).await?;
        let documents = decode_documents(body)?;
        debug!("Backend holds {} document(s)", documents.len());
        Ok(documents)
    }

    async fn delete_document(&self, id: &str) -> SyncResult<()> {
        let url = self.api.endpoint(&["documents", id])?;
        ensure_success(self.api.http().delete(url).send().await?).await?;
        info!("Deleted document {}", id);
        Ok(())
    }

    async fn delete_all_documents(&self) -> SyncResult<()> {
        let url = self.api.endpoint(&["api", "documents", "delete-all"])?;
        let resp = ensure_success(self.api.http().delete(url).send().await?).await?;
        let status = resp.status().as_u16();
        let text = resp.text().await?;

        // A 200 can still carry `"success": false` when clearing the index failed.
        if let Ok(body) = serde_json::from_str::<JsonValue>(&text) {
            if body.get("success").and_then(JsonValue::as_bool) == Some(false) {
                warn!("Backend refused to delete all documents: {}", text);
                return Err(SyncError::ServerRejected {
                    status,
                    message: extract_error_detail(status, &text),
                });
            }
        }
        info!("Deleted all documents");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{ method, path };
    use wiremock::{ Mock, MockServer, ResponseTemplate };

    fn request() -> ChatRequest {
        ChatRequest {
            message: "What is Rust?".into(),
            chat_id: "c1".into(),
            use_docs: true,
            system_prompt: "Be brief.".into(),
        }
    }

    #[tokio::test]
    async fn chat_sends_multipart_fields() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "response": "A language.", "chat_id": "c1" })))
            .expect(1)
            .mount(&server).await;

        let assistant = RemoteAssistant::new(ApiClient::new(&server.uri()).unwrap());
        let reply = assistant.chat(&request()).await.unwrap();
        assert_eq!(reply.response, "A language.");

        let requests = server.received_requests().await.unwrap();
        let body = String::from_utf8_lossy(&requests[0].body).to_string();
        for field in ["name=\"message\"", "name=\"chat_id\"", "name=\"use_docs\"", "name=\"system_prompt\""] {
            assert!(body.contains(field), "missing {}", field);
        }
        assert!(body.contains("What is Rust?"));
        assert!(body.contains("true"));
    }

    #[tokio::test]
    async fn reply_without_response_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "chat_id": "c1" })))
            .mount(&server).await;

        let assistant = RemoteAssistant::new(ApiClient::new(&server.uri()).unwrap());
        assert!(matches!(assistant.chat(&request()).await, Err(SyncError::Malformed(_))));
    }

    #[tokio::test]
    async fn blank_response_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "response": "  ", "chat_id": "c1" })))
            .mount(&server).await;

        let assistant = RemoteAssistant::new(ApiClient::new(&server.uri()).unwrap());
        assert!(matches!(assistant.chat(&request()).await, Err(SyncError::Malformed(_))));
    }

    #[tokio::test]
    async fn server_detail_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat"))
            .respond_with(
                ResponseTemplate::new(500).set_body_json(json!({ "detail": "Error generating response: model offline" }))
            )
            .mount(&server).await;

        let assistant = RemoteAssistant::new(ApiClient::new(&server.uri()).unwrap());
        let err = assistant.chat(&request()).await.unwrap_err();
        assert_eq!(err.user_message(), "Error: Error generating response: model offline");
    }

    #[tokio::test]
    async fn upload_posts_file_part() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/upload"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "message": "Document 'notes.txt' processed and stored successfully" }))
            )
            .expect(1)
            .mount(&server).await;

        let assistant = RemoteAssistant::new(ApiClient::new(&server.uri()).unwrap());
        let reply = assistant.upload("notes.txt", b"hello".to_vec()).await.unwrap();
        assert!(reply.message.unwrap().contains("notes.txt"));

        let requests = server.received_requests().await.unwrap();
        let body = String::from_utf8_lossy(&requests[0].body).to_string();
        assert!(body.contains("name=\"file\"; filename=\"notes.txt\""));
    }

    #[tokio::test]
    async fn documents_are_listed_from_either_shape() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/documents"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(
                    json!({
                        "files": [
                            { "id": 7, "filename": "notes.txt", "filehash": "ab12" },
                            { "document_id": "d-2", "name": "paper.pdf" },
                            { "filename": "orphan.txt" }
                        ]
                    })
                )
            )
            .mount(&server).await;

        let assistant = RemoteAssistant::new(ApiClient::new(&server.uri()).unwrap());
        let documents = assistant.list_documents().await.unwrap();
        assert_eq!(
            documents,
            vec![
                DocumentEntry { id: "7".into(), filename: "notes.txt".into() },
                DocumentEntry { id: "d-2".into(), filename: "paper.pdf".into() }
            ]
        );

        assert!(decode_documents(json!({ "documents": [] })).unwrap().is_empty());
        assert_eq!(decode_documents(json!([{ "id": "x" }])).unwrap()[0].filename, "x");
        assert!(matches!(decode_documents(json!("nope")), Err(SyncError::Malformed(_))));
    }

    #[tokio::test]
    async fn document_listing_failure_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/documents"))
            .respond_with(
                ResponseTemplate::new(500).set_body_json(json!({ "error": "Failed to retrieve documents: locked" }))
            )
            .mount(&server).await;

        let assistant = RemoteAssistant::new(ApiClient::new(&server.uri()).unwrap());
        assert_eq!(
            assistant.list_documents().await.unwrap_err(),
            SyncError::ServerRejected { status: 500, message: "Failed to retrieve documents: locked".into() }
        );
    }

    #[tokio::test]
    async fn single_document_is_deleted_by_id() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/documents/7"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
            .expect(1)
            .mount(&server).await;
        Mock::given(method("DELETE"))
            .and(path("/documents/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({ "message": "Document not found" })))
            .mount(&server).await;

        let assistant = RemoteAssistant::new(ApiClient::new(&server.uri()).unwrap());
        assistant.delete_document("7").await.unwrap();
        assert_eq!(
            assistant.delete_document("missing").await.unwrap_err(),
            SyncError::ServerRejected { status: 404, message: "Document not found".into() }
        );
    }

    #[tokio::test]
    async fn delete_all_honours_success_flag() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/api/documents/delete-all"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "success": true, "message": "All documents deleted successfully" }))
            )
            .up_to_n_times(1)
            .mount(&server).await;
        Mock::given(method("DELETE"))
            .and(path("/api/documents/delete-all"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(
                    json!({ "success": false, "message": "Failed to clear ChromaDB: busy" })
                )
            )
            .mount(&server).await;

        let assistant = RemoteAssistant::new(ApiClient::new(&server.uri()).unwrap());
        assistant.delete_all_documents().await.unwrap();
        assert_eq!(
            assistant.delete_all_documents().await.unwrap_err(),
            SyncError::ServerRejected { status: 200, message: "Failed to clear ChromaDB: busy".into() }
        );
    }
}
