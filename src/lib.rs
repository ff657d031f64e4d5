pub mod config;
pub mod delegate;
pub mod error;
pub mod humanize;
pub mod metrics;
pub mod network;
pub mod observability;
pub mod pipeline;
pub mod request;
pub mod result;
pub mod service;
pub mod task;
pub mod ui;

pub use delegate::{ResponseContext, ServiceTaskDelegate};
pub use error::{BoxError, ServiceError};
pub use metrics::ServiceTaskMetrics;
pub use network::{HttpResponse, NetworkProvider, NetworkTask};
pub use request::ServiceRequest;
pub use result::{Payload, ServiceResult};
pub use service::WebService;
pub use task::{ServiceTask, TaskOptions, TaskState};
pub use ui::{InlineDispatcher, UiDispatcher, UiThread};
