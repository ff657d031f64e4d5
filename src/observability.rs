//! Observability (tracing delegate, counters, subscriber setup)

use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::delegate::{ResponseContext, ServiceTaskDelegate};
use crate::error::{BoxError, HttpStatusError, ServiceError};
use crate::metrics::ServiceTaskMetrics;
use crate::network::HttpResponse;
use crate::request::ServiceRequest;

/// Install a fmt subscriber filtered by `RUST_LOG`, defaulting to `info`.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Delegate that logs every callback and keeps counters.
#[derive(Debug, Default)]
pub struct TracingDelegate {
    reject_http_errors: bool,
    failures: AtomicU64,
    validation_rejections: AtomicU64,
    ui_updates: AtomicU64,
    metrics_reports: AtomicU64,
}

impl TracingDelegate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also fail tasks whose response status is not 2xx.
    pub fn rejecting_http_errors(mut self, reject: bool) -> Self {
        self.reject_http_errors = reject;
        self
    }

    pub fn snapshot(&self) -> DelegateSnapshot {
        DelegateSnapshot {
            failures: self.failures.load(Ordering::Relaxed),
            validation_rejections: self.validation_rejections.load(Ordering::Relaxed),
            ui_updates: self.ui_updates.load(Ordering::Relaxed),
            metrics_reports: self.metrics_reports.load(Ordering::Relaxed),
        }
    }
}

impl ServiceTaskDelegate for TracingDelegate {
    fn validate_response(&self, ctx: &ResponseContext<'_>) -> Result<(), BoxError> {
        if !self.reject_http_errors {
            return Ok(());
        }
        match ctx.response {
            Some(response) if !response.is_success() => {
                self.validation_rejections.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    task_id = %ctx.task_id,
                    status = response.status.as_u16(),
                    "Rejecting HTTP error status"
                );
                Err(Box::new(HttpStatusError {
                    status: response.status,
                }))
            }
            _ => Ok(()),
        }
    }

    fn service_result_failure(
        &self,
        task_id: Uuid,
        response: Option<&HttpResponse>,
        error: &ServiceError,
    ) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            %task_id,
            status = response.map(|r| r.status.as_u16()),
            error = %error,
            "Service task failed"
        );
    }

    fn will_begin_update_ui(&self, task_id: Uuid) {
        tracing::trace!(%task_id, "UI update starting");
    }

    fn did_finish_update_ui(&self, task_id: Uuid) {
        self.ui_updates.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(%task_id, "UI update finished");
    }

    fn did_finish_collecting_metrics(
        &self,
        task_id: Uuid,
        metrics: &ServiceTaskMetrics,
        request: Option<&ServiceRequest>,
        response: Option<&HttpResponse>,
    ) {
        self.metrics_reports.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            %task_id,
            url = request.map(|r| r.url.as_str()),
            status = response.map(|r| r.status.as_u16()),
            fetch_ms = metrics.fetch_duration().map(|d| d.num_milliseconds()),
            json_ms = metrics.json_duration().map(|d| d.num_milliseconds()),
            ui_ms = metrics.update_ui_duration().map(|d| d.num_milliseconds()),
            "Service task metrics"
        );
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelegateSnapshot {
    pub failures: u64,
    pub validation_rejections: u64,
    pub ui_updates: u64,
    pub metrics_reports: u64,
}
