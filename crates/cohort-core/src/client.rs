//! HTTP client for the agent backend.
//!
//! Opens event streams, forwards approval decisions, discards server-side
//! sessions and uploads attachments. Every failure is returned as an
//! [`EngineError`]; nothing is retried.

use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::Config;
use crate::error::{EngineError, EngineResult, ErrorKind, classify_reqwest_error};
use crate::upload::FileDescriptor;

/// Raw byte stream of an open event stream response.
pub type ByteStream = BoxStream<'static, Result<Bytes, reqwest::Error>>;

/// Standard User-Agent header for requests.
pub const USER_AGENT: &str = concat!("cohort/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    message: &'a str,
    session_id: &'a str,
}

#[derive(Debug, Serialize)]
struct FileAnalysisRequest<'a> {
    message: &'a str,
    session_id: &'a str,
    file_name: &'a str,
    file_type: &'a str,
    file_content: &'a str,
}

#[derive(Debug, Serialize)]
struct FeedbackRequest<'a> {
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct Ack {
    success: bool,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    success: bool,
    #[serde(default)]
    message: String,
    file_info: Option<UploadFileInfo>,
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UploadFileInfo {
    filename: String,
    size: u64,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Clone)]
pub struct ChatClient {
    http: reqwest::Client,
    base_url: String,
    demo: bool,
}

impl ChatClient {
    /// Creates a client with default HTTP settings.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            demo: false,
        }
    }

    /// Creates a client from configuration (URL override, timeout, demo mode).
    ///
    /// # Errors
    /// Returns an error if the server URL is invalid or the HTTP client
    /// cannot be built.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        use anyhow::Context;

        let base_url = config.resolve_server_url()?;
        let mut builder = reqwest::Client::builder().user_agent(USER_AGENT);
        if let Some(timeout) = config.connect_timeout() {
            builder = builder.connect_timeout(timeout);
        }
        let http = builder.build().context("build HTTP client")?;

        Ok(Self {
            http,
            base_url,
            demo: config.demo,
        })
    }

    #[must_use]
    pub fn with_demo(mut self, demo: bool) -> Self {
        self.demo = demo;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn is_demo(&self) -> bool {
        self.demo
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Opens the chat event stream (`/chat/stream`, or the demo variant).
    ///
    /// # Errors
    /// Returns a transport or HTTP status error.
    pub async fn stream_chat(&self, message: &str, session_id: &str) -> EngineResult<ByteStream> {
        let path = if self.demo {
            "chat/stream/demo"
        } else {
            "chat/stream"
        };
        let request = self
            .http
            .post(self.endpoint(path))
            .json(&ChatRequest {
                message,
                session_id,
            });
        self.open_stream(request).await
    }

    /// Opens the file analysis event stream.
    ///
    /// # Errors
    /// Returns a transport or HTTP status error.
    pub async fn stream_file_analysis(
        &self,
        message: &str,
        session_id: &str,
        file: &FileDescriptor,
    ) -> EngineResult<ByteStream> {
        let request = self
            .http
            .post(self.endpoint("chat/file-analysis/stream"))
            .json(&FileAnalysisRequest {
                message,
                session_id,
                file_name: &file.name,
                file_type: &file.kind,
                file_content: &file.content,
            });
        self.open_stream(request).await
    }

    async fn open_stream(&self, request: reqwest::RequestBuilder) -> EngineResult<ByteStream> {
        let response = request
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| classify_reqwest_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(EngineError::http_status(status.as_u16(), &error_body));
        }

        if let Some(content_type) = response.headers().get(CONTENT_TYPE) {
            debug!(content_type = ?content_type, "event stream opened");
        }
        Ok(response.bytes_stream().boxed())
    }

    /// Discards server-side state for a session.
    ///
    /// # Errors
    /// Returns a transport or HTTP status error.
    pub async fn delete_session(&self, session_id: &str) -> EngineResult<()> {
        let response = self
            .http
            .delete(self.endpoint(&format!("chat/session/{session_id}")))
            .send()
            .await
            .map_err(|e| classify_reqwest_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::http_status(status.as_u16(), &body));
        }
        Ok(())
    }

    /// Forwards an approval decision on the side channel.
    ///
    /// # Errors
    /// Returns a transport or HTTP status error, or `Rejected` when the
    /// backend answers with `success: false`.
    pub async fn submit_feedback(&self, content: &str) -> EngineResult<()> {
        let response = self
            .http
            .post(self.endpoint("chat/feedback"))
            .json(&FeedbackRequest { content })
            .send()
            .await
            .map_err(|e| classify_reqwest_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::http_status(status.as_u16(), &body));
        }

        let ack: Ack = response.json().await.map_err(|e| {
            EngineError::new(ErrorKind::Rejected, format!("Unreadable feedback reply: {e}"))
        })?;
        if ack.success {
            Ok(())
        } else {
            Err(EngineError::new(
                ErrorKind::Rejected,
                format!("Feedback rejected: {}", ack.message),
            ))
        }
    }

    /// Uploads a file and returns the backend's description of it,
    /// including the extracted text.
    ///
    /// # Errors
    /// Returns a transport or HTTP status error, or `Rejected` when the
    /// backend could not accept or parse the file.
    pub async fn upload(&self, file_name: &str, bytes: Vec<u8>) -> EngineResult<FileDescriptor> {
        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name.to_string());
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .http
            .post(self.endpoint("upload"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| classify_reqwest_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::http_status(status.as_u16(), &body));
        }

        let reply: UploadResponse = response.json().await.map_err(|e| {
            EngineError::new(ErrorKind::Rejected, format!("Unreadable upload reply: {e}"))
        })?;
        if !reply.success {
            return Err(EngineError::new(
                ErrorKind::Rejected,
                format!("Upload failed: {}", reply.message),
            ));
        }

        let Some(info) = reply.file_info else {
            return Err(EngineError::new(
                ErrorKind::Rejected,
                "Upload reply is missing file_info",
            ));
        };
        Ok(FileDescriptor {
            name: info.filename,
            kind: info.kind,
            size: info.size,
            content: reply.content.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[tokio::test]
    async fn test_stream_chat_posts_message_and_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/stream"))
            .and(body_json(json!({"message": "hi", "session_id": "session_1"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string("data: {\"type\":\"complete\"}\n\n"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = ChatClient::new(server.uri());
        let mut stream = client.stream_chat("hi", "session_1").await.unwrap();

        let mut body = Vec::new();
        while let Some(chunk) = stream.next().await {
            body.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(body, b"data: {\"type\":\"complete\"}\n\n");
    }

    #[tokio::test]
    async fn test_demo_mode_uses_demo_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/stream/demo"))
            .respond_with(ResponseTemplate::new(200).set_body_string(""))
            .expect(1)
            .mount(&server)
            .await;

        let client = ChatClient::new(server.uri()).with_demo(true);
        assert!(client.stream_chat("hi", "s").await.is_ok());
    }

    #[tokio::test]
    async fn test_stream_http_error_is_classified() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/stream"))
            .respond_with(ResponseTemplate::new(500).set_body_string(r#"{"detail":"agents offline"}"#))
            .mount(&server)
            .await;

        let err = ChatClient::new(server.uri())
            .stream_chat("hi", "s")
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind, ErrorKind::HttpStatus);
        assert_eq!(err.message, "HTTP 500: agents offline");
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        let client = ChatClient::new("http://127.0.0.1:9");
        let err = client.stream_chat("hi", "s").await.err().unwrap();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_file_analysis_sends_file_fields() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/file-analysis/stream"))
            .and(body_json(json!({
                "message": "summarize",
                "session_id": "s",
                "file_name": "notes.md",
                "file_type": "text",
                "file_content": "# Notes"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_string(""))
            .expect(1)
            .mount(&server)
            .await;

        let file = FileDescriptor {
            name: "notes.md".to_string(),
            kind: "text".to_string(),
            size: 7,
            content: "# Notes".to_string(),
        };
        let mut stream = ChatClient::new(server.uri())
            .stream_file_analysis("summarize", "s", &file)
            .await
            .unwrap();
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_feedback_success_and_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/feedback"))
            .and(body_json(json!({"content": "APPROVE"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true, "message": "ok"})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/chat/feedback"))
            .and(body_json(json!({"content": "nope"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"success": false, "message": "queue closed"})),
            )
            .mount(&server)
            .await;

        let client = ChatClient::new(server.uri());
        client.submit_feedback("APPROVE").await.unwrap();

        let err = client.submit_feedback("nope").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Rejected);
        assert_eq!(err.message, "Feedback rejected: queue closed");
    }

    #[tokio::test]
    async fn test_delete_session() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/chat/session/session_42"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"message": "deleted"})))
            .expect(1)
            .mount(&server)
            .await;

        ChatClient::new(server.uri())
            .delete_session("session_42")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_upload_returns_descriptor() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/upload"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "message": "parsed",
                "file_info": {"filename": "notes.md", "size": 7, "type": "text", "metadata": {}},
                "content": "# Notes"
            })))
            .mount(&server)
            .await;

        let file = ChatClient::new(server.uri())
            .upload("notes.md", b"# Notes".to_vec())
            .await
            .unwrap();

        assert_eq!(file.name, "notes.md");
        assert_eq!(file.kind, "text");
        assert_eq!(file.size, 7);
        assert_eq!(file.content, "# Notes");
    }

    #[tokio::test]
    async fn test_upload_failure_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/upload"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"success": false, "message": "unsupported"})),
            )
            .mount(&server)
            .await;

        let err = ChatClient::new(server.uri())
            .upload("x.txt", b"x".to_vec())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Rejected);
    }
}
