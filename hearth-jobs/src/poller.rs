//! Status-poll port and its HTTP implementation.

use async_trait::async_trait;
use hearth_core::{ConfigError, HearthResult, JobConfig, JobError};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::de::DeserializeOwned;

use crate::types::StatusResponse;

/// Issues one status request for a job.
#[async_trait]
pub trait StatusPoller<T>: Send + Sync {
    async fn poll_status(&self, job_id: &str) -> HearthResult<StatusResponse<T>>;
}

/// Polls `GET {api_base_url}{status_path}` with `{id}` replaced by the job id.
#[derive(Clone)]
pub struct HttpStatusPoller {
    client: reqwest::Client,
    base_url: String,
    status_path: String,
    headers: HeaderMap,
}

impl HttpStatusPoller {
    pub fn from_config(config: &JobConfig) -> HearthResult<Self> {
        let base_url = config
            .api_base_url
            .as_deref()
            .ok_or_else(|| ConfigError::InvalidValue {
                field: "jobs.api_base_url".to_string(),
                value: String::new(),
                reason: "required by the HTTP status poller".to_string(),
            })?;

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                field: "jobs".to_string(),
                value: base_url.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            status_path: config.status_path.clone(),
            headers: build_auth_headers(config.api_key.as_deref())?,
        })
    }

    pub fn status_url(&self, job_id: &str) -> String {
        format!("{}{}", self.base_url, self.status_path.replace("{id}", job_id))
    }
}

impl std::fmt::Debug for HttpStatusPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpStatusPoller")
            .field("base_url", &self.base_url)
            .field("status_path", &self.status_path)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<T> StatusPoller<T> for HttpStatusPoller
where
    T: DeserializeOwned + Send + 'static,
{
    async fn poll_status(&self, job_id: &str) -> HearthResult<StatusResponse<T>> {
        let poll_err = |reason: String| JobError::PollFailed {
            job_id: job_id.to_string(),
            reason,
        };

        let response = self
            .client
            .get(self.status_url(job_id))
            .headers(self.headers.clone())
            .send()
            .await
            .map_err(|e| poll_err(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(poll_err(format!("HTTP {}: {}", status, body)).into());
        }

        let parsed = response
            .json::<StatusResponse<T>>()
            .await
            .map_err(|e| poll_err(e.to_string()))?;
        Ok(parsed)
    }
}

fn build_auth_headers(api_key: Option<&str>) -> HearthResult<HeaderMap> {
    let mut headers = HeaderMap::new();
    if let Some(api_key) = api_key {
        let value = HeaderValue::from_str(api_key).map_err(|e| ConfigError::InvalidValue {
            field: "jobs.api_key".to_string(),
            value: "<redacted>".to_string(),
            reason: e.to_string(),
        })?;
        headers.insert(HeaderName::from_static("x-api-key"), value);
    }
    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_core::HearthError;

    fn config(base: &str) -> JobConfig {
        JobConfig {
            api_base_url: Some(base.to_string()),
            ..JobConfig::default()
        }
    }

    #[test]
    fn test_status_url_substitutes_id() {
        let poller = HttpStatusPoller::from_config(&config("https://api.example.com/")).unwrap();
        assert_eq!(
            poller.status_url("j-42"),
            "https://api.example.com/api/generation/j-42/status"
        );
    }

    #[test]
    fn test_missing_base_url_is_config_error() {
        let err = HttpStatusPoller::from_config(&JobConfig::default()).unwrap_err();
        assert!(matches!(err, HearthError::Config(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_api_key_header() {
        let headers = build_auth_headers(Some("secret")).unwrap();
        assert_eq!(headers.get("x-api-key").unwrap(), "secret");
        assert!(build_auth_headers(None).unwrap().is_empty());
        assert!(build_auth_headers(Some("bad\nkey")).is_err());
    }
}
