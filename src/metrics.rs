//! Lifecycle timestamps of a service task

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// Timestamps captured while a task runs.
///
/// Each field is written at most once. When present they are ordered:
/// `fetch_start <= response_end <= response_json_* <= update_ui_*`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ServiceTaskMetrics {
    pub fetch_start: Option<DateTime<Utc>>,
    pub response_end: Option<DateTime<Utc>>,
    pub response_json_start: Option<DateTime<Utc>>,
    pub response_json_end: Option<DateTime<Utc>>,
    pub update_ui_start: Option<DateTime<Utc>>,
    pub update_ui_end: Option<DateTime<Utc>>,
}

impl ServiceTaskMetrics {
    pub(crate) fn mark_fetch_start(&mut self) {
        mark(&mut self.fetch_start);
    }

    pub(crate) fn mark_response_end(&mut self) {
        mark(&mut self.response_end);
    }

    pub(crate) fn mark_response_json_start(&mut self) {
        mark(&mut self.response_json_start);
    }

    pub(crate) fn mark_response_json_end(&mut self) {
        mark(&mut self.response_json_end);
    }

    pub(crate) fn mark_update_ui_start(&mut self) {
        mark(&mut self.update_ui_start);
    }

    pub(crate) fn mark_update_ui_end(&mut self) {
        mark(&mut self.update_ui_end);
    }

    /// Time between `resume` and the network completion.
    pub fn fetch_duration(&self) -> Option<Duration> {
        span(self.fetch_start, self.response_end)
    }

    pub fn json_duration(&self) -> Option<Duration> {
        span(self.response_json_start, self.response_json_end)
    }

    pub fn update_ui_duration(&self) -> Option<Duration> {
        span(self.update_ui_start, self.update_ui_end)
    }
}

fn mark(slot: &mut Option<DateTime<Utc>>) {
    if slot.is_none() {
        *slot = Some(Utc::now());
    }
}

fn span(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Option<Duration> {
    Some(end? - start?)
}
