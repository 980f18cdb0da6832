use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use reqwest::{Client, Url};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::BackendConfig;
use crate::error::{ResetError, TeardownError};
use crate::secret::Secret;
use crate::storage::WorkerId;

/// Backend operations that release a session's shared resources.
///
/// Both calls are idempotent from the client's side: calling them for a
/// worker the backend already removed is not an error.
#[async_trait]
pub trait TeardownBackend: Send + Sync {
    /// Leave every shared group, deleting groups where the worker was sole admin
    async fn leave_all_groups(&self, worker_id: &WorkerId) -> Result<(), TeardownError>;

    /// Purge the worker's contributed location data and metadata
    async fn purge_user(&self, worker_id: &WorkerId) -> Result<(), TeardownError>;
}

/// HTTP implementation of the teardown endpoints
#[derive(Debug, Clone)]
pub struct HttpTeardownBackend {
    http_client: Client,
    base_url: Url,
    api_token: Option<Secret<String>>,
    request_timeout: Duration,
}

impl HttpTeardownBackend {
    pub fn new(config: &BackendConfig) -> crate::error::Result<Self> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| ResetError::Config(format!("Invalid backend URL: {}", e)))?;
        if base_url.cannot_be_a_base() {
            return Err(ResetError::Config(format!(
                "Backend URL cannot carry a path: {}",
                base_url
            )));
        }

        let request_timeout = Duration::from_secs(config.request_timeout_seconds);
        let http_client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| ResetError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url,
            api_token: config.api_token.clone(),
            request_timeout,
        })
    }

    pub fn leave_all_url(&self, worker_id: &WorkerId) -> Result<Url, TeardownError> {
        self.endpoint(&["groups", worker_id.as_str(), "leave-all"])
    }

    pub fn purge_url(&self, worker_id: &WorkerId) -> Result<Url, TeardownError> {
        self.endpoint(&["user", worker_id.as_str(), "purge"])
    }

    /// Append path segments to the base URL, percent-encoding each one
    fn endpoint(&self, segments: &[&str]) -> Result<Url, TeardownError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| TeardownError::Other(format!("Cannot extend {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn post(&self, url: Url) -> Result<(), TeardownError> {
        let mut request = self
            .http_client
            .post(url.clone())
            .timeout(self.request_timeout);
        if let Some(token) = &self.api_token {
            request = request.header(reqwest::header::AUTHORIZATION, token.bearer());
        }

        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(TeardownError::Rejected { status, body });
        }

        debug!(url = %url, "Teardown request accepted");
        Ok(())
    }
}

#[async_trait]
impl TeardownBackend for HttpTeardownBackend {
    async fn leave_all_groups(&self, worker_id: &WorkerId) -> Result<(), TeardownError> {
        self.post(self.leave_all_url(worker_id)?).await
    }

    async fn purge_user(&self, worker_id: &WorkerId) -> Result<(), TeardownError> {
        self.post(self.purge_url(worker_id)?).await
    }
}

/// Settled state of one teardown call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome {
    Succeeded,
    Failed(String),
    TimedOut,
}

impl CallOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CallOutcome::Succeeded)
    }
}

/// What the remote phase did; informational only
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TeardownReport {
    /// No worker id was stored, so nothing was sent
    Skipped,
    /// Both calls were attempted and settled
    Attempted {
        leave_groups: CallOutcome,
        purge_user: CallOutcome,
        attempted_at: DateTime<Utc>,
    },
}

impl TeardownReport {
    pub fn fully_succeeded(&self) -> bool {
        match self {
            TeardownReport::Skipped => false,
            TeardownReport::Attempted {
                leave_groups,
                purge_user,
                ..
            } => leave_groups.is_success() && purge_user.is_success(),
        }
    }
}

/// Best-effort remote teardown requester.
///
/// At-most-once and never retried: each call is sent once, both run
/// concurrently, and the phase is bounded by `deadline`. Failures are logged
/// and counted here and never reach the caller.
#[derive(Clone)]
pub struct RemoteTeardown {
    backend: Arc<dyn TeardownBackend>,
    deadline: Duration,
}

impl RemoteTeardown {
    pub fn new(backend: Arc<dyn TeardownBackend>, deadline: Duration) -> Self {
        Self { backend, deadline }
    }

    pub async fn request_teardown(&self, worker_id: Option<&WorkerId>) -> TeardownReport {
        let Some(worker_id) = worker_id else {
            info!("No session identity stored, skipping remote teardown");
            return TeardownReport::Skipped;
        };

        let attempted_at = Utc::now();
        let (leave_groups, purge_user) = tokio::join!(
            self.settle("leave_all_groups", self.backend.leave_all_groups(worker_id)),
            self.settle("purge_user", self.backend.purge_user(worker_id)),
        );

        let report = TeardownReport::Attempted {
            leave_groups,
            purge_user,
            attempted_at,
        };

        if report.fully_succeeded() {
            info!("Remote teardown completed");
        } else {
            warn!(report = ?report, "Remote teardown incomplete, continuing with local reset");
        }

        report
    }

    async fn settle<F>(&self, call: &'static str, request: F) -> CallOutcome
    where
        F: std::future::Future<Output = Result<(), TeardownError>>,
    {
        match tokio::time::timeout(self.deadline, request).await {
            Ok(Ok(())) => CallOutcome::Succeeded,
            Ok(Err(e)) => {
                counter!("session_reset_remote_failures_total", 1, "call" => call);
                warn!(call, error = %e, "Teardown request failed");
                CallOutcome::Failed(e.to_string())
            }
            Err(_) => {
                counter!("session_reset_remote_failures_total", 1, "call" => call);
                warn!(
                    call,
                    error = %TeardownError::DeadlineExceeded(self.deadline),
                    "Teardown request abandoned"
                );
                CallOutcome::TimedOut
            }
        }
    }
}

impl std::fmt::Debug for RemoteTeardown {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteTeardown")
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}
