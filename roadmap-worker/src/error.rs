use roadmap_common::sink::SinkError;
use thiserror::Error;

use crate::service::ServiceError;

/// Enumeration of errors that stop the worker process.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("failed to connect to postgres: {0}")]
    StoreError(SinkError),
    #[error("failed to set up RabbitMQ: {0}")]
    BrokerError(SinkError),
    #[error("pipeline error: {0}")]
    ServiceError(#[from] ServiceError),
    #[error("failed to serve metrics: {0}")]
    MetricsError(String),
}
