use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use client_logging::{client_debug, client_info};
use docsearch_core::models::{
    decode_data, BatchDeleteReport, FileList, QueryAnswer, SessionInfo, UploadReceipt,
};
use docsearch_core::{
    ClientError, FailureKind, JobId, JobStatus, OperationKey, PollOutcome, RetryPolicy,
};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::cache::CacheStore;
use crate::inflight::InFlightRegistry;
use crate::poller::{JobPoller, PollHandle, StatusSource};
use crate::retry::run_with_retry;
use crate::stream::{spawn_stream, ActiveStreams, StreamSubscription};
use crate::{ApiRequest, CallOptions, ClientSettings, Payload, ProgressSink, RequestExecutor, UploadBody};

const FILE_API: &str = "/api/file";
const SEARCH_API: &str = "/api/search";

struct ClientInner {
    settings: ClientSettings,
    executor: RequestExecutor,
    cache: CacheStore<Payload>,
    inflight: InFlightRegistry<Dispatched>,
    streams: ActiveStreams,
}

impl ClientInner {
    /// Drops cached reads under `prefix` and detaches in-flight reads under
    /// it, so a later read starts fresh work instead of joining a request
    /// sent before the change.
    fn invalidate(&self, prefix: &str) {
        self.cache.invalidate_prefix(prefix);
        self.inflight.forget_prefix(prefix);
    }
}

/// Outcome of one shared call, tagged with the cache generation read just
/// before it was sent.
#[derive(Clone)]
struct Dispatched {
    generation: u64,
    result: Result<Payload, ClientError>,
}

/// Entry point for every backend operation.
///
/// Reads are served from the cache when fresh, otherwise fetched once per key
/// (concurrent callers share the call) under the retry policy. Mutations are
/// de-duplicated the same way and invalidate the cached reads they affect.
///
/// Cloning is cheap; clones share the cache, the in-flight registry and the
/// stream guard.
#[derive(Clone)]
pub struct DocSearchClient {
    inner: Arc<ClientInner>,
    options: CallOptions,
}

impl DocSearchClient {
    pub fn new(settings: ClientSettings) -> Result<Self, ClientError> {
        let executor = RequestExecutor::new(&settings)?;
        let inner = ClientInner {
            cache: CacheStore::new(settings.cache_ttl),
            executor,
            inflight: InFlightRegistry::new(),
            streams: ActiveStreams::new(),
            settings,
        };
        Ok(Self {
            inner: Arc::new(inner),
            options: CallOptions::default(),
        })
    }

    /// Handle whose calls use `options`, sharing all state with `self`.
    pub fn with_call_options(&self, options: CallOptions) -> Self {
        Self {
            inner: self.inner.clone(),
            options,
        }
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.inner.settings
    }

    pub fn cache(&self) -> &CacheStore<Payload> {
        &self.inner.cache
    }

    /// Operations currently running on behalf of one or more callers.
    pub fn pending_requests(&self) -> usize {
        self.inner.inflight.len()
    }

    pub fn is_streaming(&self, session_id: u64) -> bool {
        self.inner.streams.is_active(session_id)
    }

    // Files

    pub async fn list_files(&self, page: u32, page_size: u32) -> Result<FileList, ClientError> {
        let request = ApiRequest::get(format!("{FILE_API}/list"))
            .query("user_id", self.user_id())
            .query("page", page)
            .query("page_size", page_size);
        decode(self.fetch(request).await?)
    }

    pub async fn search_files(
        &self,
        keyword: &str,
        page: u32,
        page_size: u32,
    ) -> Result<FileList, ClientError> {
        let keyword = non_empty("keyword", keyword)?;
        let request = ApiRequest::get(format!("{FILE_API}/search"))
            .query("user_id", self.user_id())
            .query("keyword", keyword)
            .query("page", page)
            .query("page_size", page_size);
        decode(self.fetch(request).await?)
    }

    pub async fn file_info(&self, file_id: u64) -> Result<Value, ClientError> {
        let request = ApiRequest::get(format!("{FILE_API}/info/{file_id}"))
            .query("user_id", self.user_id());
        decode(self.fetch(request).await?)
    }

    /// Current processing status. Never cached.
    pub async fn file_status(&self, file_id: u64) -> Result<JobStatus, ClientError> {
        let request = ApiRequest::get(format!("{FILE_API}/status/{file_id}"))
            .query("user_id", self.user_id());
        decode(self.send(request).await?)
    }

    /// Uploads `bytes` as `file_name`. Submitting the same bytes again while
    /// the first upload runs joins it; only the first caller's `progress`
    /// sink is driven.
    pub async fn upload_file(
        &self,
        file_name: &str,
        bytes: impl Into<Bytes>,
        progress: Option<Arc<dyn ProgressSink>>,
    ) -> Result<UploadReceipt, ClientError> {
        let file_name = non_empty("file name", file_name)?;
        let bytes = bytes.into();
        let key = OperationKey::content("POST", &upload_path(), &sha256_hex(&bytes));

        let mut upload = UploadBody::new(file_name, bytes).field("user_id", self.user_id());
        if let Some(sink) = progress {
            upload = upload.progress(sink);
        }
        let request = ApiRequest::new(Method::POST, upload_path()).upload(upload);
        client_info!("Uploading {} ({})", file_name, key);
        decode(self.mutate(key, request, &[file_reads()]).await?)
    }

    pub async fn upload_path(
        &self,
        path: impl AsRef<Path>,
        progress: Option<Arc<dyn ProgressSink>>,
    ) -> Result<UploadReceipt, ClientError> {
        let path = path.as_ref();
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                ClientError::new(
                    FailureKind::InvalidRequest,
                    format!("{} has no usable file name", path.display()),
                )
            })?;
        let bytes = tokio::fs::read(path).await.map_err(|err| {
            ClientError::new(
                FailureKind::InvalidRequest,
                format!("cannot read {}: {err}", path.display()),
            )
        })?;
        self.upload_file(file_name, bytes, progress).await
    }

    pub async fn delete_file(&self, file_id: u64) -> Result<Value, ClientError> {
        let request = ApiRequest::delete(format!("{FILE_API}/delete/{file_id}"))
            .query("user_id", self.user_id());
        let key = request.key();
        decode(self.mutate(key, request, &[file_reads()]).await?)
    }

    pub async fn rename_file(&self, file_id: u64, new_name: &str) -> Result<Value, ClientError> {
        let new_name = non_empty("new name", new_name)?;
        let request = ApiRequest::put_json(
            format!("{FILE_API}/rename/{file_id}"),
            json!({ "new_name": new_name, "user_id": self.user_id() }),
        );
        let key = request.key();
        decode(self.mutate(key, request, &[file_reads()]).await?)
    }

    pub async fn batch_delete(&self, file_ids: &[u64]) -> Result<BatchDeleteReport, ClientError> {
        if file_ids.is_empty() {
            return Err(ClientError::new(
                FailureKind::InvalidRequest,
                "no file ids to delete",
            ));
        }
        let request = ApiRequest::post_json(
            format!("{FILE_API}/batch/delete"),
            json!({ "file_ids": file_ids, "user_id": self.user_id() }),
        );
        let key = request.key();
        decode(self.mutate(key, request, &[file_reads()]).await?)
    }

    /// Polls the processing job of an uploaded file until it settles. Cached
    /// file reads are dropped once the job reaches a terminal state.
    pub fn watch_processing<F>(&self, job_id: JobId, on_terminal: F) -> PollHandle
    where
        F: FnOnce(PollOutcome) + Send + 'static,
    {
        let checks = self.with_call_options(CallOptions {
            retry: Some(RetryPolicy::none()),
            ..self.options
        });
        let settings = self.options.poll.unwrap_or(self.inner.settings.poll);
        let inner = self.inner.clone();
        let poller = JobPoller::new(Arc::new(HttpStatusSource { client: checks }), settings);
        poller.watch(job_id, move |outcome| {
            if matches!(outcome, PollOutcome::Completed | PollOutcome::Failed) {
                inner.invalidate(&file_reads());
            }
            on_terminal(outcome);
        })
    }

    // Sessions

    pub async fn create_session(&self, session_name: &str) -> Result<SessionInfo, ClientError> {
        let request = ApiRequest::post_json(
            format!("{SEARCH_API}/session/create"),
            json!({ "user_id": self.user_id(), "session_name": session_name }),
        );
        let key = request.key();
        decode(self.mutate(key, request, &[session_list()]).await?)
    }

    pub async fn list_sessions(&self) -> Result<Value, ClientError> {
        let request = ApiRequest::get(format!("{SEARCH_API}/sessions"))
            .query("user_id", self.user_id());
        decode(self.fetch(request).await?)
    }

    pub async fn session_history(
        &self,
        session_id: u64,
        page: u32,
        page_size: u32,
    ) -> Result<Value, ClientError> {
        let request = ApiRequest::get(history_path(session_id))
            .query("user_id", self.user_id())
            .query("page", page)
            .query("page_size", page_size);
        decode(self.fetch(request).await?)
    }

    pub async fn delete_session(&self, session_id: u64) -> Result<Value, ClientError> {
        let request = ApiRequest::delete(format!("{SEARCH_API}/session/delete/{session_id}"))
            .query("user_id", self.user_id());
        let key = request.key();
        let affected = [session_list(), history_reads(session_id)];
        decode(self.mutate(key, request, &affected).await?)
    }

    pub async fn rename_session(&self, session_id: u64, new_name: &str) -> Result<Value, ClientError> {
        let new_name = non_empty("new name", new_name)?;
        let request = ApiRequest::put_json(
            format!("{SEARCH_API}/session/rename/{session_id}"),
            json!({ "user_id": self.user_id(), "new_name": new_name }),
        );
        let key = request.key();
        decode(self.mutate(key, request, &[session_list()]).await?)
    }

    /// Asks `query` and waits for the whole answer.
    pub async fn query(
        &self,
        session_id: u64,
        query: &str,
        file_ids: &[u64],
    ) -> Result<QueryAnswer, ClientError> {
        let body = self.query_body(session_id, query, file_ids)?;
        let payload = self
            .send(ApiRequest::post_json(format!("{SEARCH_API}/query"), body))
            .await?;
        self.inner.invalidate(&history_reads(session_id));
        decode(payload)
    }

    /// Opens a streamed answer to `query`. Fails with `Busy` if the session
    /// already has a stream that has not ended. Must be called from within a
    /// tokio runtime.
    pub fn stream_query(
        &self,
        session_id: u64,
        query: &str,
        file_ids: &[u64],
    ) -> Result<StreamSubscription, ClientError> {
        let body = self.query_body(session_id, query, file_ids)?;
        let slot = self
            .inner
            .streams
            .try_acquire(session_id)
            .ok_or_else(|| ClientError::busy(session_id))?;

        let request = self.prepare(ApiRequest::post_json(format!("{SEARCH_API}/stream"), body));
        let inner = self.inner.clone();
        let on_finished = Box::new(move || {
            inner.invalidate(&history_reads(session_id));
        });
        client_debug!("Streaming answer for session {}", session_id);
        Ok(spawn_stream(
            self.inner.executor.clone(),
            request,
            slot,
            self.inner.settings.stream_idle_timeout,
            on_finished,
        ))
    }

    pub async fn suggestions(&self, keyword: &str, limit: u32) -> Result<Value, ClientError> {
        let request = ApiRequest::get(format!("{SEARCH_API}/suggestions"))
            .query("user_id", self.user_id())
            .query("keyword", keyword)
            .query("limit", limit);
        decode(self.fetch(request).await?)
    }

    pub async fn analytics(&self, days: u32) -> Result<Value, ClientError> {
        let request = ApiRequest::get(format!("{SEARCH_API}/analytics"))
            .query("user_id", self.user_id())
            .query("days", days);
        decode(self.fetch(request).await?)
    }

    // Plumbing

    fn user_id(&self) -> u64 {
        self.inner.settings.user_id
    }

    fn query_body(&self, session_id: u64, query: &str, file_ids: &[u64]) -> Result<Value, ClientError> {
        let query = non_empty("query", query)?;
        Ok(json!({
            "session_id": session_id,
            "user_id": self.user_id(),
            "query": query,
            "file_ids": file_ids,
        }))
    }

    fn prepare(&self, request: ApiRequest) -> ApiRequest {
        request.timeout(self.options.timeout)
    }

    fn retry_policy(&self, mutation: bool) -> RetryPolicy {
        match self.options.retry {
            Some(policy) => policy,
            None if mutation && !self.inner.settings.retry_mutations => RetryPolicy::none(),
            None => self.inner.settings.retry,
        }
    }

    /// Cached read: a fresh cache entry wins, otherwise one shared fetch.
    async fn fetch(&self, request: ApiRequest) -> Result<Payload, ClientError> {
        let request = self.prepare(request);
        let key = request.key();
        let cache = &self.inner.cache;
        if !self.options.bypass_cache {
            if let Some(hit) = cache.get(&key) {
                return Ok(hit);
            }
        }

        let dispatched = self
            .shared_call(key.clone(), request, self.retry_policy(false))
            .await;
        let payload = dispatched.result?;
        let ttl = self.options.cache_ttl.unwrap_or(self.inner.settings.cache_ttl);
        cache.set_if_current(key, payload.clone(), ttl, dispatched.generation);
        Ok(payload)
    }

    /// Uncached read, still shared between concurrent callers.
    async fn send(&self, request: ApiRequest) -> Result<Payload, ClientError> {
        let request = self.prepare(request);
        let key = request.key();
        self.shared_call(key, request, self.retry_policy(false))
            .await
            .result
    }

    /// Side-effecting call. `affected` prefixes are invalidated whatever the
    /// outcome, since a failed call may still have been applied.
    async fn mutate(
        &self,
        key: OperationKey,
        request: ApiRequest,
        affected: &[String],
    ) -> Result<Payload, ClientError> {
        let request = self.prepare(request);
        let dispatched = self.shared_call(key, request, self.retry_policy(true)).await;
        for prefix in affected {
            self.inner.invalidate(prefix);
        }
        dispatched.result
    }

    async fn shared_call(
        &self,
        key: OperationKey,
        request: ApiRequest,
        policy: RetryPolicy,
    ) -> Dispatched {
        let inner = self.inner.clone();
        let label = key.to_string();
        self.inner
            .inflight
            .join_or_start(key, move || async move {
                // Read at send time; joiners store against this generation.
                let generation = inner.cache.generation();
                let executor = &inner.executor;
                let result =
                    run_with_retry(&policy, &label, || executor.execute(&request)).await;
                Dispatched { generation, result }
            })
            .await
    }
}

/// Status checks for the poller; one attempt each.
struct HttpStatusSource {
    client: DocSearchClient,
}

#[async_trait::async_trait]
impl StatusSource for HttpStatusSource {
    async fn check(&self, job_id: JobId) -> Result<JobStatus, ClientError> {
        self.client.file_status(job_id).await
    }
}

fn decode<T: DeserializeOwned>(payload: Payload) -> Result<T, ClientError> {
    decode_data(&payload.into_json()?)
}

fn non_empty<'a>(what: &str, value: &'a str) -> Result<&'a str, ClientError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ClientError::new(
            FailureKind::InvalidRequest,
            format!("{what} must not be empty"),
        ));
    }
    Ok(trimmed)
}

fn sha256_hex(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

fn upload_path() -> String {
    format!("{FILE_API}/upload")
}

fn history_path(session_id: u64) -> String {
    format!("{SEARCH_API}/history/{session_id}")
}

/// Every cached file read: lists, searches, info.
fn file_reads() -> String {
    OperationKey::prefix("GET", &format!("{FILE_API}/"))
}

fn session_list() -> String {
    OperationKey::prefix("GET", &format!("{SEARCH_API}/sessions"))
}

/// Cached history pages of one session. The trailing `?` keeps session 1
/// from matching session 12.
fn history_reads(session_id: u64) -> String {
    format!("{}?", OperationKey::prefix("GET", &history_path(session_id)))
}
