use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use bytes::Bytes;
use client_logging::client_debug;
use docsearch_core::models::ApiEnvelope;
use docsearch_core::{ClientError, FailureKind, OperationKey, UploadProgress};
use futures_util::StreamExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::multipart::{Form, Part};
use reqwest::{Method, StatusCode, Url};
use serde_json::Value;

use crate::ClientSettings;

const UPLOAD_CHUNK_BYTES: usize = 64 * 1024;

/// Receives upload progress as a percentage in `0..=100`, never decreasing.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, percent: u8);
}

impl<F> ProgressSink for F
where
    F: Fn(u8) + Send + Sync,
{
    fn emit(&self, percent: u8) {
        self(percent)
    }
}

/// Decoded response body.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(Value),
    Text(String),
}

impl Payload {
    pub fn into_json(self) -> Result<Value, ClientError> {
        match self {
            Payload::Json(value) => Ok(value),
            Payload::Text(text) => Err(ClientError::new(
                FailureKind::Decode,
                format!("expected JSON, got {} bytes of text", text.len()),
            )),
        }
    }
}

#[derive(Clone)]
pub enum RequestBody {
    Empty,
    Json(Value),
    Upload(UploadBody),
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestBody::Empty => write!(f, "Empty"),
            RequestBody::Json(value) => write!(f, "Json({value})"),
            RequestBody::Upload(upload) => write!(
                f,
                "Upload({}, {} bytes, {} fields)",
                upload.file_name,
                upload.bytes.len(),
                upload.fields.len()
            ),
        }
    }
}

/// A file sent as the multipart `file` field plus extra text fields.
#[derive(Clone)]
pub struct UploadBody {
    pub file_name: String,
    pub bytes: Bytes,
    pub fields: Vec<(String, String)>,
    progress: Option<ProgressReporter>,
}

impl UploadBody {
    pub fn new(file_name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes: bytes.into(),
            fields: Vec::new(),
            progress: None,
        }
    }

    pub fn field(mut self, name: &str, value: impl ToString) -> Self {
        self.fields.push((name.to_string(), value.to_string()));
        self
    }

    pub fn progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        let tracker = UploadProgress::new(self.bytes.len() as u64);
        self.progress = Some(ProgressReporter {
            sink,
            tracker: Arc::new(Mutex::new(tracker)),
        });
        self
    }

    /// Reports 100% once the server has accepted the upload.
    pub(crate) fn mark_complete(&self) {
        if let Some(reporter) = &self.progress {
            reporter.report(|tracker| tracker.complete());
        }
    }

    fn into_part(self) -> Result<Part, ClientError> {
        let total = self.bytes.len() as u64;
        let reporter = self.progress.clone();
        if let Some(reporter) = &reporter {
            reporter.report(|tracker| {
                tracker.restart();
                tracker.advance(0)
            });
        }

        let chunks: Vec<Bytes> = (0..self.bytes.len())
            .step_by(UPLOAD_CHUNK_BYTES)
            .map(|start| {
                let end = (start + UPLOAD_CHUNK_BYTES).min(self.bytes.len());
                self.bytes.slice(start..end)
            })
            .collect();
        let stream = futures_util::stream::iter(chunks).map(move |chunk| {
            if let Some(reporter) = &reporter {
                reporter.report(|tracker| tracker.advance(chunk.len() as u64));
            }
            Ok::<Bytes, std::io::Error>(chunk)
        });

        Part::stream_with_length(reqwest::Body::wrap_stream(stream), total)
            .file_name(self.file_name)
            .mime_str("application/octet-stream")
            .map_err(|err| ClientError::new(FailureKind::InvalidRequest, err.to_string()))
    }
}

/// Shared between retries so a restarted upload never reports a lower percentage.
#[derive(Clone)]
struct ProgressReporter {
    sink: Arc<dyn ProgressSink>,
    tracker: Arc<Mutex<UploadProgress>>,
}

impl ProgressReporter {
    fn report(&self, step: impl FnOnce(&mut UploadProgress) -> Option<u8>) {
        let percent = {
            let mut tracker = self.tracker.lock().unwrap_or_else(PoisonError::into_inner);
            step(&mut tracker)
        };
        if let Some(percent) = percent {
            self.sink.emit(percent);
        }
    }
}

/// One logical call against the backend.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: RequestBody,
    /// Overrides the executor's default timeout.
    pub timeout: Option<Duration>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: RequestBody::Empty,
            timeout: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn post_json(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::POST, path).json(body)
    }

    pub fn put_json(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::PUT, path).json(body)
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = RequestBody::Json(body);
        self
    }

    pub fn upload(mut self, upload: UploadBody) -> Self {
        self.body = RequestBody::Upload(upload);
        self
    }

    pub fn query(mut self, name: &str, value: impl ToString) -> Self {
        self.query.push((name.to_string(), value.to_string()));
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        if timeout.is_some() {
            self.timeout = timeout;
        }
        self
    }

    /// Identity used for caching and de-duplication. Uploads are keyed by
    /// their caller, which knows the content digest.
    pub fn key(&self) -> OperationKey {
        let builder = OperationKey::builder(self.method.as_str(), &self.path).params(&self.query);
        match &self.body {
            RequestBody::Json(body) => builder.body(body).build(),
            RequestBody::Empty | RequestBody::Upload(_) => builder.build(),
        }
    }
}

/// Issues exactly one network call per invocation and classifies its failure.
/// Never retries.
#[derive(Debug, Clone)]
pub struct RequestExecutor {
    client: reqwest::Client,
    base_url: String,
    default_timeout: Duration,
}

impl RequestExecutor {
    pub fn new(settings: &ClientSettings) -> Result<Self, ClientError> {
        Url::parse(&settings.base_url).map_err(|err| {
            ClientError::new(
                FailureKind::InvalidRequest,
                format!("invalid base url {:?}: {err}", settings.base_url),
            )
        })?;
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .build()
            .map_err(|err| ClientError::new(FailureKind::Transport, err.to_string()))?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            default_timeout: settings.request_timeout,
        })
    }

    /// Sends `request` and decodes its body. The deadline covers the whole
    /// exchange; on expiry the in-flight transport future is dropped, which
    /// aborts the connection.
    pub async fn execute(&self, request: &ApiRequest) -> Result<Payload, ClientError> {
        let timeout = request.timeout.unwrap_or(self.default_timeout);
        let started = Instant::now();
        client_debug!("{} {} dispatched", request.method, request.path);

        let exchange = async {
            let response = self
                .build(request)?
                .send()
                .await
                .map_err(map_reqwest_error)?;
            read_payload(response).await
        };

        let result = match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(timeout_error(timeout)),
        };

        match &result {
            Ok(_) => {
                if let RequestBody::Upload(upload) = &request.body {
                    upload.mark_complete();
                }
                client_debug!(
                    "{} {} completed in {:?}",
                    request.method,
                    request.path,
                    started.elapsed()
                );
            }
            Err(err) => client_debug!("{} {} failed: {}", request.method, request.path, err),
        }
        result
    }

    /// Opens a streaming response. The deadline covers only the wait for
    /// response headers; the body is read by the caller.
    pub async fn open_stream(&self, request: &ApiRequest) -> Result<reqwest::Response, ClientError> {
        let timeout = request.timeout.unwrap_or(self.default_timeout);
        client_debug!("{} {} opening stream", request.method, request.path);

        let open = async {
            let response = self
                .build(request)?
                .send()
                .await
                .map_err(map_reqwest_error)?;
            if response.status().is_success() {
                return Ok(response);
            }
            let status = response.status();
            let body = response.bytes().await.unwrap_or_default();
            Err(status_error(status, &body))
        };

        tokio::time::timeout(timeout, open)
            .await
            .unwrap_or_else(|_| Err(timeout_error(timeout)))
    }

    fn build(&self, request: &ApiRequest) -> Result<reqwest::RequestBuilder, ClientError> {
        let mut url = Url::parse(&format!("{}{}", self.base_url, request.path))
            .map_err(|err| ClientError::new(FailureKind::InvalidRequest, err.to_string()))?;
        if !request.query.is_empty() {
            url.query_pairs_mut().extend_pairs(&request.query);
        }

        let builder = self.client.request(request.method.clone(), url);
        let builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(body) => builder
                .header(CONTENT_TYPE, "application/json")
                .body(body.to_string()),
            RequestBody::Upload(upload) => {
                let mut form = Form::new().part("file", upload.clone().into_part()?);
                for (name, value) in &upload.fields {
                    form = form.text(name.clone(), value.clone());
                }
                builder.multipart(form)
            }
        };
        Ok(builder)
    }
}

async fn read_payload(response: reqwest::Response) -> Result<Payload, ClientError> {
    let status = response.status();
    let is_json = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(is_json_content_type)
        .unwrap_or(false);
    let body = response.bytes().await.map_err(map_reqwest_error)?;

    if !status.is_success() {
        return Err(status_error(status, &body));
    }
    if !is_json {
        return Ok(Payload::Text(String::from_utf8_lossy(&body).into_owned()));
    }

    let value: Value = serde_json::from_slice(&body).map_err(|err| {
        ClientError::new(FailureKind::Decode, format!("invalid JSON body: {err}"))
    })?;
    if let Some(envelope) = ApiEnvelope::from_value(&value) {
        if !envelope.success {
            let message = envelope
                .message
                .unwrap_or_else(|| "request rejected".to_string());
            return Err(ClientError::new(FailureKind::Rejected, message));
        }
    }
    Ok(Payload::Json(value))
}

fn is_json_content_type(content_type: &str) -> bool {
    let mime = content_type.split(';').next().unwrap_or(content_type).trim();
    mime.eq_ignore_ascii_case("application/json") || mime.ends_with("+json")
}

/// Prefers the backend's JSON `message`, falling back to `"<code> <reason>"`.
fn status_error(status: StatusCode, body: &[u8]) -> ClientError {
    let message = serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(|value| {
            value
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .filter(|message| !message.is_empty())
        .unwrap_or_else(|| status.to_string());
    ClientError::new(FailureKind::HttpStatus(status.as_u16()), message)
}

fn timeout_error(timeout: Duration) -> ClientError {
    ClientError::new(FailureKind::Timeout, format!("no response within {timeout:?}"))
}

pub(crate) fn map_reqwest_error(err: reqwest::Error) -> ClientError {
    if err.is_timeout() {
        return ClientError::new(FailureKind::Timeout, err.to_string());
    }
    if err.is_builder() {
        return ClientError::new(FailureKind::InvalidRequest, err.to_string());
    }
    ClientError::new(FailureKind::Transport, err.to_string())
}
