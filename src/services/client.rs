//! Workflow API client: one streamed request/response cycle per call,
//! plus multipart file upload.

use crate::services::stream::read_terminal_payload;
use async_trait::async_trait;
use log::{debug, warn};
use reqwest::{multipart, Client};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Errors from the workflow transport layer.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    /// No credential configured. Raised before any network activity.
    #[error("请先在设置中配置 Coze API Key")]
    Unauthenticated,

    /// The HTTP request itself failed (network, DNS, TLS, broken stream).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The service answered with a non-2xx status.
    #[error("Workflow API error ({status}): {body}")]
    Transport { status: u16, body: String },

    /// The stream closed without a terminal `End` event carrying content.
    #[error("Failed to retrieve content from workflow: no terminal event")]
    StreamEmpty,

    /// Upload endpoint answered with a non-zero application code.
    #[error("文件上传失败: {0}")]
    Upload(String),

    /// The image workflow answered, but no URL could be found in it.
    #[error("Could not parse image URL from response: {0}")]
    ImageUrlMissing(String),

    /// The prompt workflow answered with nothing usable as a prompt.
    #[error("Workflow returned an empty prompt: {0}")]
    EmptyPrompt(String),
}

impl WorkflowError {
    /// Whether simply trying again may succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, WorkflowError::Unauthenticated)
    }
}

#[derive(Clone, Serialize)]
pub struct WorkflowRequest {
    pub workflow_id: String,
    pub parameters: Map<String, Value>,
    #[serde(skip)]
    pub credential: String,
}

impl WorkflowRequest {
    pub fn new(workflow_id: &str, parameters: Map<String, Value>, credential: &str) -> Self {
        Self {
            workflow_id: workflow_id.to_string(),
            parameters,
            credential: credential.to_string(),
        }
    }
}

impl std::fmt::Debug for WorkflowRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowRequest")
            .field("workflow_id", &self.workflow_id)
            .field("parameters", &self.parameters)
            .field("credential", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UploadedFile {
    pub id: String,
    pub file_name: String,
}

#[derive(Deserialize)]
struct UploadResponse {
    code: i64,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    data: Option<UploadedFile>,
}

#[async_trait]
pub trait WorkflowClient: Send + Sync {
    /// Runs a workflow and returns its terminal payload.
    async fn invoke(&self, request: WorkflowRequest) -> Result<String, WorkflowError>;

    async fn upload_file(
        &self,
        data: Vec<u8>,
        file_name: &str,
        credential: &str,
    ) -> Result<UploadedFile, WorkflowError>;
}

#[derive(Debug, Clone)]
pub struct CozeClient {
    client: Client,
    base_url: String,
}

impl CozeClient {
    pub fn new(base_url: &str) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn ensure_success(resp: reqwest::Response) -> Result<reqwest::Response, WorkflowError> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(WorkflowError::Transport {
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp)
    }
}

fn require_credential(credential: &str) -> Result<(), WorkflowError> {
    if credential.trim().is_empty() {
        return Err(WorkflowError::Unauthenticated);
    }
    Ok(())
}

#[async_trait]
impl WorkflowClient for CozeClient {
    async fn invoke(&self, request: WorkflowRequest) -> Result<String, WorkflowError> {
        require_credential(&request.credential)?;

        debug!("Requesting workflow {}", request.workflow_id);
        debug!(
            "Workflow parameters: {}",
            serde_json::to_string(&request.parameters).unwrap_or_default()
        );

        let resp = self
            .client
            .post(format!("{}/v1/workflow/stream_run", self.base_url))
            .bearer_auth(&request.credential)
            .json(&request)
            .send()
            .await?;
        let resp = Self::ensure_success(resp).await?;

        match read_terminal_payload(resp.bytes_stream()).await {
            Ok(payload) => {
                debug!("Response from workflow {}: {}", request.workflow_id, payload);
                Ok(payload)
            }
            Err(e) => {
                warn!("Workflow {} produced no terminal payload: {}", request.workflow_id, e);
                Err(e)
            }
        }
    }

    async fn upload_file(
        &self,
        data: Vec<u8>,
        file_name: &str,
        credential: &str,
    ) -> Result<UploadedFile, WorkflowError> {
        require_credential(credential)?;

        debug!("Uploading {} ({} bytes)", file_name, data.len());
        let part = multipart::Part::bytes(data).file_name(file_name.to_string());
        let form = multipart::Form::new().part("file", part);

        let resp = self
            .client
            .post(format!("{}/v1/files/upload", self.base_url))
            .bearer_auth(credential)
            .multipart(form)
            .send()
            .await?;
        let resp = Self::ensure_success(resp).await?;
        let body: UploadResponse = resp.json().await?;
        parse_upload_response(body)
    }
}

fn parse_upload_response(body: UploadResponse) -> Result<UploadedFile, WorkflowError> {
    if body.code != 0 {
        return Err(WorkflowError::Upload(
            body.msg.unwrap_or_else(|| "文件上传失败".to_string()),
        ));
    }
    body.data
        .ok_or_else(|| WorkflowError::Upload("response carried no file data".to_string()))
}
