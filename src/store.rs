//! Search-store collaborator (§6): the three read-only queries the
//! pipeline consumes, a `reqwest`-backed production implementation, and a
//! null implementation for tests.
//!
//! Grounded on `src/proxmox.rs::ProxmoxClient`'s `reqwest::Client` wrapper
//! for the HTTP shape, and on `ai/manager.rs::AIManager`'s
//! trait-object-swap pattern for keeping the orchestrator decoupled from
//! the concrete collaborator.

use std::error::Error;

use async_trait::async_trait;

use crate::errors::StageError;
use crate::model::{RawAlarm, RawLog};

/// Read-only telemetry queries the pipeline needs from the external search
/// store (§6). Implementors return `Box<dyn Error + Send + Sync>` on
/// failure, matching `ai/provider.rs::AIProvider::ask`'s boundary; the
/// orchestrator maps these into `StageError::StoreQueryFailed`.
#[async_trait]
pub trait SearchStore: Send + Sync {
    async fn query_alarms_by_host(&self, host: &str) -> Result<Vec<RawAlarm>, Box<dyn Error + Send + Sync>>;

    async fn query_logs_by_trace_id_and_host(
        &self,
        trace_id: &str,
        host: &str,
        alarm_time: i64,
    ) -> Result<Vec<RawLog>, Box<dyn Error + Send + Sync>>;

    async fn query_logs_by_process_guids(
        &self,
        host: &str,
        parent_guids: &[String],
        max_depth: u32,
    ) -> Result<Vec<RawLog>, Box<dyn Error + Send + Sync>>;
}

/// `reqwest`-backed production collaborator. Each method is a plain JSON
/// GET against `base_url`, mirroring `ProxmoxClient`'s one-client-many-
/// endpoints shape rather than introducing a per-call client.
pub struct HttpSearchStore {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSearchStore {
    pub fn new(base_url: impl Into<String>) -> HttpSearchStore {
        HttpSearchStore {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl SearchStore for HttpSearchStore {
    async fn query_alarms_by_host(&self, host: &str) -> Result<Vec<RawAlarm>, Box<dyn Error + Send + Sync>> {
        let url = format!("{}/alarms?host={}", self.base_url, host);
        let alarms = self.client.get(&url).send().await?.json::<Vec<RawAlarm>>().await?;
        Ok(alarms)
    }

    async fn query_logs_by_trace_id_and_host(
        &self,
        trace_id: &str,
        host: &str,
        alarm_time: i64,
    ) -> Result<Vec<RawLog>, Box<dyn Error + Send + Sync>> {
        let url = format!(
            "{}/logs?traceId={}&host={}&alarmTime={}",
            self.base_url, trace_id, host, alarm_time
        );
        let logs = self.client.get(&url).send().await?.json::<Vec<RawLog>>().await?;
        Ok(logs)
    }

    async fn query_logs_by_process_guids(
        &self,
        host: &str,
        parent_guids: &[String],
        max_depth: u32,
    ) -> Result<Vec<RawLog>, Box<dyn Error + Send + Sync>> {
        let url = format!(
            "{}/logs/ancestors?host={}&maxDepth={}&guids={}",
            self.base_url,
            host,
            max_depth,
            parent_guids.join(",")
        );
        let logs = self.client.get(&url).send().await?.json::<Vec<RawLog>>().await?;
        Ok(logs)
    }
}

/// Classifies a query failure as `StoreUnavailable` (couldn't reach the
/// store at all — connect/timeout) versus `StoreQueryFailed` (the store
/// answered with something the pipeline couldn't use), per §7's distinct
/// store-failure kinds. Callers log whichever this returns and degrade
/// the same way either way; the distinction is for the log line only.
pub fn classify_store_error(stage: &str, err: &(dyn Error + Send + Sync)) -> StageError {
    if let Some(req_err) = err.downcast_ref::<reqwest::Error>() {
        if req_err.is_connect() || req_err.is_timeout() {
            return StageError::StoreUnavailable(format!("{}: {}", stage, req_err));
        }
    }
    StageError::StoreQueryFailed(format!("{}: {}", stage, err))
}

/// Returns empty for every query. Backs unit tests that exercise the
/// orchestrator without a live store.
pub struct NullSearchStore;

#[async_trait]
impl SearchStore for NullSearchStore {
    async fn query_alarms_by_host(&self, _host: &str) -> Result<Vec<RawAlarm>, Box<dyn Error + Send + Sync>> {
        Ok(Vec::new())
    }

    async fn query_logs_by_trace_id_and_host(
        &self,
        _trace_id: &str,
        _host: &str,
        _alarm_time: i64,
    ) -> Result<Vec<RawLog>, Box<dyn Error + Send + Sync>> {
        Ok(Vec::new())
    }

    async fn query_logs_by_process_guids(
        &self,
        _host: &str,
        _parent_guids: &[String],
        _max_depth: u32,
    ) -> Result<Vec<RawLog>, Box<dyn Error + Send + Sync>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_store_returns_empty_for_every_query() {
        let store = NullSearchStore;
        assert!(store.query_alarms_by_host("h").await.unwrap().is_empty());
        assert!(store
            .query_logs_by_trace_id_and_host("t", "h", 0)
            .await
            .unwrap()
            .is_empty());
        assert!(store
            .query_logs_by_process_guids("h", &["g".to_string()], 2)
            .await
            .unwrap()
            .is_empty());
    }
}
