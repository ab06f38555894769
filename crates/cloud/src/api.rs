//! REST client for the encoding service.
//!
//! Speaks the JSON contract in [`crate::wire`]:
//!
//! | call                                   | purpose                        |
//! |----------------------------------------|--------------------------------|
//! | `POST /encodings`                      | create an encoding, get its id |
//! | `POST /encodings/{id}/start`           | queue it for processing        |
//! | `GET /encodings/{id}/status`           | current status and messages    |
//! | `GET /encodings?status=QUEUED`         | size of the remote queue       |

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use encbatch_core::job::JobDescriptor;
use encbatch_core::remote::{EncodingService, ServiceError, SubmitError, TaskReport};
use encbatch_core::types::TaskId;

use crate::wire::{
    classify_start_failure, CreateEncodingRequest, CreateEncodingResponse, ListResponse,
    StatusResponse,
};

/// Errors from the HTTP layer.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout, body decoding).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The service returned a non-2xx status code.
    #[error("Encoding API error ({status}): {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },
}

impl From<ApiError> for ServiceError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Request(e) if e.is_decode() => ServiceError::Decode(e.to_string()),
            ApiError::Request(e) => ServiceError::Request(e.to_string()),
            ApiError::Status { status, body } => ServiceError::Api { status, body },
        }
    }
}

/// [`EncodingService`] backed by the REST API.
pub struct HttpEncodingService {
    client: reqwest::Client,
    api_url: String,
    /// Encodings created for a job whose start call has not succeeded yet,
    /// keyed by job name. Reused on the next attempt instead of creating
    /// another encoding.
    created: Mutex<HashMap<String, TaskId>>,
}

impl HttpEncodingService {
    /// Create a client for the service at `api_url`, e.g. `http://host:8080/v1`.
    pub fn new(api_url: impl Into<String>, request_timeout: Duration) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;
        Ok(Self::with_client(client, api_url))
    }

    /// Create a client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, api_url: impl Into<String>) -> Self {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        Self {
            client,
            api_url,
            created: Mutex::new(HashMap::new()),
        }
    }

    /// Base URL requests are sent to, without a trailing slash.
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    async fn create_encoding(&self, job: &JobDescriptor) -> Result<TaskId, ApiError> {
        let body = CreateEncodingRequest {
            name: &job.name,
            input_path: &job.input_path,
            output_path: &job.output_path,
        };

        let response = self
            .client
            .post(format!("{}/encodings", self.api_url))
            .json(&body)
            .send()
            .await?;

        let created: CreateEncodingResponse = Self::parse_response(response).await?;
        tracing::debug!(job = %job.name, task_id = %created.id, "Encoding created");
        Ok(TaskId::new(created.id))
    }

    async fn start_encoding(&self, task_id: &TaskId) -> Result<(), SubmitError> {
        let response = self
            .client
            .post(format!("{}/encodings/{}/start", self.api_url, task_id))
            .send()
            .await
            .map_err(|e| SubmitError::Failed(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        Err(classify_start_failure(status.as_u16(), &body))
    }

    /// Task id of an encoding created earlier but never started.
    fn take_created(&self, name: &str) -> Option<TaskId> {
        self.created.lock().ok()?.remove(name)
    }

    fn remember_created(&self, name: &str, task_id: TaskId) {
        if let Ok(mut created) = self.created.lock() {
            created.insert(name.to_string(), task_id);
        }
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl EncodingService for HttpEncodingService {
    async fn submit(
        &self,
        job: &JobDescriptor,
        previous: Option<&TaskId>,
    ) -> Result<TaskId, SubmitError> {
        let task_id = match previous.cloned().or_else(|| self.take_created(&job.name)) {
            Some(id) => id,
            None => self
                .create_encoding(job)
                .await
                .map_err(|e| SubmitError::Failed(e.to_string()))?,
        };

        match self.start_encoding(&task_id).await {
            Ok(()) => Ok(task_id),
            Err(e) => {
                if previous.is_none() {
                    self.remember_created(&job.name, task_id);
                }
                Err(e)
            }
        }
    }

    async fn query_status(&self, task_id: &TaskId) -> Result<TaskReport, ServiceError> {
        let response = self
            .client
            .get(format!("{}/encodings/{}/status", self.api_url, task_id))
            .send()
            .await
            .map_err(ApiError::from)?;

        let status: StatusResponse = Self::parse_response(response).await?;
        tracing::debug!(
            task_id = %task_id,
            status = %status.status,
            progress = status.progress,
            "Encoding status",
        );
        Ok(status.into_report())
    }

    async fn count_queued(&self) -> Result<usize, ServiceError> {
        let response = self
            .client
            .get(format!("{}/encodings", self.api_url))
            .query(&[("status", "QUEUED")])
            .send()
            .await
            .map_err(ApiError::from)?;

        let list: ListResponse = Self::parse_response(response).await?;
        Ok(list.total_count)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn trailing_slash_is_trimmed() {
        let svc = HttpEncodingService::with_client(reqwest::Client::new(), "http://host/v1/");
        assert_eq!(svc.api_url(), "http://host/v1");
    }

    #[test]
    fn created_encodings_are_reused_once() {
        let svc = HttpEncodingService::with_client(reqwest::Client::new(), "http://host");
        svc.remember_created("encoding1", TaskId::new("t-1"));
        assert_eq!(svc.take_created("encoding1"), Some(TaskId::new("t-1")));
        assert_eq!(svc.take_created("encoding1"), None);
    }

    #[test]
    fn status_errors_map_to_api_service_error() {
        let err: ServiceError = ApiError::Status {
            status: 503,
            body: "unavailable".into(),
        }
        .into();
        assert_matches!(err, ServiceError::Api { status: 503, .. });
    }

    #[tokio::test]
    async fn unreachable_service_fails_submission() {
        // Port 9 (discard) on localhost is expected to refuse connections.
        let svc = HttpEncodingService::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
        let job = JobDescriptor::new("encoding1", "in.mp4", "out/encoding1");
        let result = svc.submit(&job, None).await;
        assert_matches!(result, Err(SubmitError::Failed(_)));
    }
}
