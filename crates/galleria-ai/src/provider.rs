//! Embedding service clients.
//!
//! Two API shapes are supported, selected by [`ProviderKind`]:
//!
//! - [`SyncHttpProvider`]: `POST /embed` answers with the vector directly.
//!   Also supports `POST /embed/batch` and `GET /health`.
//! - [`JobHttpProvider`]: `POST /jobs` returns a job id; `GET /jobs/{id}` is
//!   polled on a fixed interval until the job succeeds, fails, or the attempt
//!   budget runs out.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use galleria_core::{EmbeddingConfig, ProviderKind};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cache::EmbeddingKind;
use crate::error::EmbeddingError;

/// Something that turns text or an image URL into a vector.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Short provider label for logs.
    fn name(&self) -> &'static str;

    async fn embed(&self, kind: EmbeddingKind, content: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Embed several inputs of the same kind, one vector per input, in order.
    ///
    /// The default issues one concurrent `embed` call per input and fails on
    /// the first error.
    async fn embed_batch(
        &self,
        kind: EmbeddingKind,
        contents: &[&str],
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        futures::future::try_join_all(contents.iter().map(|c| self.embed(kind, c))).await
    }

    async fn health(&self) -> Result<HealthStatus, EmbeddingError> {
        Err(EmbeddingError::Provider(format!(
            "{} provider has no health endpoint",
            self.name()
        )))
    }
}

/// Build the provider named by `config.provider`.
pub fn build_provider(
    config: &EmbeddingConfig,
) -> Result<Arc<dyn EmbeddingProvider>, EmbeddingError> {
    let provider: Arc<dyn EmbeddingProvider> = match config.provider {
        ProviderKind::Sync => Arc::new(SyncHttpProvider::new(
            &config.endpoint,
            config.request_timeout(),
        )?),
        ProviderKind::Job => Arc::new(JobHttpProvider::new(
            &config.endpoint,
            config.request_timeout(),
            PollPolicy {
                interval: config.poll_interval(),
                max_attempts: config.max_poll_attempts,
            },
        )?),
    };
    info!(provider = provider.name(), endpoint = %config.endpoint, "embedding provider ready");
    Ok(provider)
}

// ── Wire types ──

#[derive(Serialize)]
struct EmbedRequest<'a> {
    input: &'a str,
    #[serde(rename = "type")]
    kind: EmbeddingKind,
}

#[derive(Serialize)]
struct BatchEmbedRequest<'a> {
    inputs: &'a [&'a str],
    #[serde(rename = "type")]
    kind: EmbeddingKind,
}

/// Reply of `POST /embed`.
#[derive(Debug, Deserialize)]
pub struct EmbedResponse {
    pub success: bool,
    #[serde(default, alias = "vector")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub processing_time: Option<f64>,
}

impl EmbedResponse {
    pub fn into_vector(self) -> Result<Vec<f32>, EmbeddingError> {
        if !self.success {
            return Err(EmbeddingError::Provider(
                self.error.unwrap_or_else(|| "unspecified provider failure".into()),
            ));
        }
        match self.embedding {
            Some(v) if !v.is_empty() => Ok(v),
            _ => Err(EmbeddingError::Malformed(
                "success reported without an embedding".into(),
            )),
        }
    }
}

/// Reply of `POST /embed/batch`.
#[derive(Debug, Deserialize)]
pub struct BatchEmbedResponse {
    pub success: bool,
    #[serde(default, alias = "vectors")]
    pub embeddings: Option<Vec<Vec<f32>>>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub processing_time: Option<f64>,
}

impl BatchEmbedResponse {
    pub fn into_vectors(self, expected: usize) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if !self.success {
            return Err(EmbeddingError::Provider(
                self.error.unwrap_or_else(|| "unspecified provider failure".into()),
            ));
        }
        let vectors = self.embeddings.ok_or_else(|| {
            EmbeddingError::Malformed("success reported without embeddings".into())
        })?;
        if vectors.len() != expected {
            return Err(EmbeddingError::Malformed(format!(
                "expected {expected} embeddings, got {}",
                vectors.len()
            )));
        }
        Ok(vectors)
    }
}

/// Reply of `GET /health`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    #[serde(default)]
    pub device: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub torch_version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JobSubmitted {
    #[serde(alias = "id")]
    job_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    #[serde(alias = "queued", alias = "running")]
    Pending,
    #[serde(alias = "completed", alias = "done")]
    Succeeded,
    Failed,
}

/// Reply of `GET /jobs/{id}`.
#[derive(Debug, Deserialize)]
pub struct JobStatusResponse {
    pub status: JobState,
    #[serde(default, alias = "vector")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub error: Option<String>,
}

impl JobStatusResponse {
    fn into_poll(self) -> JobPoll {
        match self.status {
            JobState::Pending => JobPoll::Pending,
            JobState::Succeeded => JobPoll::Succeeded(self.embedding.unwrap_or_default()),
            JobState::Failed => {
                JobPoll::Failed(self.error.unwrap_or_else(|| "no reason given".into()))
            }
        }
    }
}

// ── HTTP plumbing ──

fn http_client(timeout: Duration) -> Result<reqwest::Client, EmbeddingError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| EmbeddingError::Transport(format!("build HTTP client: {e}")))
}

fn transport_error(e: reqwest::Error, timeout: Duration) -> EmbeddingError {
    if e.is_timeout() {
        EmbeddingError::RequestTimeout(timeout)
    } else if e.is_decode() {
        EmbeddingError::Malformed(e.to_string())
    } else {
        EmbeddingError::Transport(e.to_string())
    }
}

async fn read_json<R: DeserializeOwned>(
    resp: reqwest::Response,
    timeout: Duration,
) -> Result<R, EmbeddingError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(EmbeddingError::Server {
            status: status.as_u16(),
            body,
        });
    }
    resp.json().await.map_err(|e| transport_error(e, timeout))
}

// ── Synchronous provider ──

/// Client for an embedding server that answers `POST /embed` in one round trip.
pub struct SyncHttpProvider {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl SyncHttpProvider {
    /// `base_url` should be like `http://localhost:8000` (a trailing slash is trimmed).
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, EmbeddingError> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    async fn post<B: Serialize + Sync, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, EmbeddingError> {
        let url = format!("{}{path}", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| transport_error(e, self.timeout))?;
        read_json(resp, self.timeout).await
    }
}

#[async_trait]
impl EmbeddingProvider for SyncHttpProvider {
    fn name(&self) -> &'static str {
        "sync"
    }

    async fn embed(&self, kind: EmbeddingKind, content: &str) -> Result<Vec<f32>, EmbeddingError> {
        let resp: EmbedResponse = self
            .post("/embed", &EmbedRequest {
                input: content,
                kind,
            })
            .await?;
        if let Some(t) = resp.processing_time {
            debug!(%kind, secs = t, "embedding computed");
        }
        resp.into_vector()
    }

    async fn embed_batch(
        &self,
        kind: EmbeddingKind,
        contents: &[&str],
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if contents.is_empty() {
            return Ok(vec![]);
        }
        let resp: BatchEmbedResponse = self
            .post("/embed/batch", &BatchEmbedRequest {
                inputs: contents,
                kind,
            })
            .await?;
        info!(%kind, count = contents.len(), "batch embeddings computed");
        resp.into_vectors(contents.len())
    }

    async fn health(&self) -> Result<HealthStatus, EmbeddingError> {
        let url = format!("{}/health", self.base_url);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| transport_error(e, self.timeout))?;
        read_json(resp, self.timeout).await
    }
}

// ── Job-style provider ──

/// How often, and how many times, a pending job is polled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_attempts: 30,
        }
    }
}

/// One observation of a job's state.
#[derive(Debug, Clone, PartialEq)]
pub enum JobPoll {
    Pending,
    Succeeded(Vec<f32>),
    Failed(String),
}

/// Poll `check` until the job finishes or `policy.max_attempts` polls have
/// seen it pending. Each poll is preceded by one `policy.interval` sleep.
///
/// Transport errors from `check` end the loop immediately.
pub async fn poll_until_ready<F, Fut>(
    job_id: &str,
    policy: PollPolicy,
    mut check: F,
) -> Result<Vec<f32>, EmbeddingError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<JobPoll, EmbeddingError>>,
{
    for attempt in 1..=policy.max_attempts {
        tokio::time::sleep(policy.interval).await;
        match check().await? {
            JobPoll::Succeeded(v) if v.is_empty() => {
                return Err(EmbeddingError::Malformed(format!(
                    "job {job_id} succeeded without an embedding"
                )));
            }
            JobPoll::Succeeded(v) => {
                debug!(job_id, attempt, "embedding job finished");
                return Ok(v);
            }
            JobPoll::Failed(reason) => {
                warn!(job_id, attempt, %reason, "embedding job failed");
                return Err(EmbeddingError::JobFailed {
                    job_id: job_id.to_string(),
                    reason,
                });
            }
            JobPoll::Pending => debug!(job_id, attempt, "embedding job pending"),
        }
    }
    Err(EmbeddingError::PollTimeout {
        job_id: job_id.to_string(),
        attempts: policy.max_attempts,
    })
}

/// Client for an embedding server that runs each request as an async job.
pub struct JobHttpProvider {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
    poll: PollPolicy,
}

impl JobHttpProvider {
    pub fn new(base_url: &str, timeout: Duration, poll: PollPolicy) -> Result<Self, EmbeddingError> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
            poll,
        })
    }

    async fn submit(&self, kind: EmbeddingKind, content: &str) -> Result<String, EmbeddingError> {
        let url = format!("{}/jobs", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&EmbedRequest {
                input: content,
                kind,
            })
            .send()
            .await
            .map_err(|e| transport_error(e, self.timeout))?;
        let submitted: JobSubmitted = read_json(resp, self.timeout).await?;
        debug!(%kind, job_id = %submitted.job_id, "embedding job submitted");
        Ok(submitted.job_id)
    }

    async fn status(&self, job_id: &str) -> Result<JobPoll, EmbeddingError> {
        let url = format!("{}/jobs/{job_id}", self.base_url);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| transport_error(e, self.timeout))?;
        let status: JobStatusResponse = read_json(resp, self.timeout).await?;
        Ok(status.into_poll())
    }
}

#[async_trait]
impl EmbeddingProvider for JobHttpProvider {
    fn name(&self) -> &'static str {
        "job"
    }

    async fn embed(&self, kind: EmbeddingKind, content: &str) -> Result<Vec<f32>, EmbeddingError> {
        let job_id = self.submit(kind, content).await?;
        poll_until_ready(&job_id, self.poll, || self.status(&job_id)).await
    }
}
