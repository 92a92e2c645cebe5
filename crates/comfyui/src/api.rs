//! REST API client for the worker's HTTP endpoints.
//!
//! Wraps job submission, input-image staging, artifact retrieval, queue
//! deletion and interruption using [`reqwest`].

use serde::Deserialize;

use crate::messages::Artifact;

/// HTTP client for the worker.
#[derive(Debug, Clone)]
pub struct ComfyUIApi {
    client: reqwest::Client,
    api_url: String,
    auth_token: Option<String>,
}

/// Response returned by the `/prompt` endpoint after successfully
/// queuing a workflow.
#[derive(Debug, Deserialize)]
pub struct SubmitResponse {
    /// Server-assigned identifier for the queued prompt.
    #[serde(alias = "jobId")]
    pub prompt_id: String,
    /// Position in the execution queue.
    #[serde(default)]
    pub number: i32,
}

/// Response returned by `/upload/image`.
#[derive(Debug, Deserialize)]
pub struct UploadResponse {
    pub name: String,
    #[serde(default)]
    pub subfolder: String,
    #[serde(rename = "type", default)]
    pub kind: String,
}

impl UploadResponse {
    /// The value a `LoadImage`-style node input expects for this file.
    pub fn staged_reference(&self) -> String {
        if self.subfolder.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", self.subfolder, self.name)
        }
    }
}

/// Errors from the worker REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIApiError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The worker returned a non-2xx status code.
    #[error("Worker API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },
}

impl ComfyUIApi {
    /// Create a new API client.
    ///
    /// * `api_url` - Base HTTP URL, e.g. `http://host:8188`.
    pub fn new(api_url: String) -> Self {
        Self::with_client(reqwest::Client::new(), api_url)
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, api_url: String) -> Self {
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            auth_token: None,
        }
    }

    /// Send `Authorization: Bearer <token>` on every request.
    pub fn with_auth_token(mut self, token: Option<String>) -> Self {
        self.auth_token = token;
        self
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Submit a workflow for execution.
    ///
    /// Sends `POST /prompt` with the workflow JSON and client ID. Returns
    /// the server-assigned `prompt_id` and queue position.
    pub async fn submit_workflow(
        &self,
        workflow: &serde_json::Value,
        client_id: &str,
    ) -> Result<SubmitResponse, ComfyUIApiError> {
        let body = serde_json::json!({
            "prompt": workflow,
            "client_id": client_id,
        });

        let response = self
            .request(reqwest::Method::POST, "/prompt")
            .json(&body)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Stage an input image so a workflow can reference it.
    ///
    /// Sends a multipart `POST /upload/image` with field `image`.
    pub async fn upload_image(
        &self,
        filename: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<UploadResponse, ComfyUIApiError> {
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str(content_type)?;
        let form = reqwest::multipart::Form::new()
            .part("image", part)
            .text("overwrite", "true");

        let response = self
            .request(reqwest::Method::POST, "/upload/image")
            .multipart(form)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Download the bytes of a produced file via `GET /view`.
    pub async fn download_artifact(&self, artifact: &Artifact) -> Result<Vec<u8>, ComfyUIApiError> {
        let response = self
            .request(reqwest::Method::GET, "/view")
            .query(&[
                ("filename", artifact.filename.as_str()),
                ("subfolder", artifact.subfolder.as_str()),
                ("type", artifact.kind.as_str()),
            ])
            .send()
            .await?;

        let response = Self::ensure_success(response).await?;
        Ok(response.bytes().await?.to_vec())
    }

    /// Cancel a queued execution.
    ///
    /// Sends a `POST /queue` request asking the worker to delete the
    /// specified prompt from the queue.
    pub async fn cancel_execution(&self, prompt_id: &str) -> Result<(), ComfyUIApiError> {
        let body = serde_json::json!({
            "delete": [prompt_id],
        });

        let response = self
            .request(reqwest::Method::POST, "/queue")
            .json(&body)
            .send()
            .await?;

        Self::check_status(response).await
    }

    /// Interrupt whatever is executing right now.
    ///
    /// Sends `POST /interrupt`, which does not target a specific prompt.
    pub async fn interrupt(&self) -> Result<(), ComfyUIApiError> {
        let response = self
            .request(reqwest::Method::POST, "/interrupt")
            .send()
            .await?;

        Self::check_status(response).await
    }

    // ---- private helpers ----

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{}", self.api_url, path));
        match &self.auth_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`ComfyUIApiError::ApiError`]
    /// containing the status and body text on failure.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ComfyUIApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ComfyUIApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ComfyUIApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }

    /// Assert the response has a success status code, discarding the body.
    async fn check_status(response: reqwest::Response) -> Result<(), ComfyUIApiError> {
        Self::ensure_success(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::messages::ArtifactKind;

    #[tokio::test]
    async fn submit_posts_prompt_and_client_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/prompt"))
            .and(body_partial_json(serde_json::json!({
                "client_id": "c-1",
                "prompt": {"3": {"inputs": {"seed": 42}}}
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"prompt_id": "p1", "number": 4})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let api = ComfyUIApi::new(server.uri());
        let response = api
            .submit_workflow(&serde_json::json!({"3": {"inputs": {"seed": 42}}}), "c-1")
            .await
            .unwrap();

        assert_eq!(response.prompt_id, "p1");
        assert_eq!(response.number, 4);
    }

    #[tokio::test]
    async fn non_success_status_is_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/prompt"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid prompt"))
            .mount(&server)
            .await;

        let api = ComfyUIApi::new(server.uri());
        let err = api
            .submit_workflow(&serde_json::json!({}), "c-1")
            .await
            .unwrap_err();

        assert_matches!(err, ComfyUIApiError::ApiError { status: 400, ref body } if body == "invalid prompt");
    }

    #[tokio::test]
    async fn download_passes_filename_subfolder_and_type() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/view"))
            .and(query_param("filename", "a.png"))
            .and(query_param("subfolder", "batch"))
            .and(query_param("type", "output"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8, 2, 3]))
            .mount(&server)
            .await;

        let api = ComfyUIApi::new(server.uri());
        let artifact = Artifact {
            filename: "a.png".into(),
            subfolder: "batch".into(),
            kind: ArtifactKind::Output,
        };

        assert_eq!(api.download_artifact(&artifact).await.unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn upload_returns_staged_reference() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/upload/image"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "name": "cat.png", "subfolder": "uploads", "type": "input"
            })))
            .mount(&server)
            .await;

        let api = ComfyUIApi::new(server.uri());
        let staged = api
            .upload_image("cat.png", vec![0u8; 8], "image/png")
            .await
            .unwrap();

        assert_eq!(staged.staged_reference(), "uploads/cat.png");
        assert_eq!(staged.kind, "input");
    }

    #[tokio::test]
    async fn cancel_sends_delete_list_with_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/queue"))
            .and(header("authorization", "Bearer s3cret"))
            .and(body_partial_json(serde_json::json!({"delete": ["p7"]})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let api = ComfyUIApi::new(server.uri()).with_auth_token(Some("s3cret".into()));
        api.cancel_execution("p7").await.unwrap();
    }

    #[tokio::test]
    async fn interrupt_failure_surfaces_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/interrupt"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let api = ComfyUIApi::new(server.uri());
        assert_matches!(
            api.interrupt().await,
            Err(ComfyUIApiError::ApiError { status: 503, .. })
        );
    }

    #[test]
    fn staged_reference_without_subfolder() {
        let staged = UploadResponse {
            name: "dog.png".into(),
            subfolder: String::new(),
            kind: "input".into(),
        };
        assert_eq!(staged.staged_reference(), "dog.png");
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let api = ComfyUIApi::new("http://worker:8188/".into());
        assert_eq!(api.api_url(), "http://worker:8188");
    }
}
