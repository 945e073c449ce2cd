use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

pub use sqlx::Error as SqlxError;

use crate::messages::{EnrichedResult, StatsSnapshot};

/// Enumeration of errors raised by the collaborators the pipeline publishes to and reads from.
/// Errors can originate from sqlx, lapin or serde_json and are wrapped to provide additional context.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("failed to serialize message: {0}")]
    SerializeError(#[from] serde_json::Error),
    #[error("broker operation failed with: {0}")]
    BrokerError(#[from] lapin::Error),
    #[error("channel to the broker is closed")]
    ChannelClosed,
    #[error("broker rejected message published to {exchange:?} with routing key {routing_key:?}")]
    NackError {
        exchange: String,
        routing_key: String,
    },
    #[error("connection failed with: {error}")]
    ConnectionError { error: sqlx::Error },
    #[error("migrations failed with: {0}")]
    MigrationError(sqlx::migrate::MigrateError),
    #[error("{command} query failed with: {error}")]
    QueryError { command: String, error: sqlx::Error },
    #[error("{column} value {value} is out of range")]
    OutOfRangeError { column: String, value: i64 },
}

/// Bulk source of class to roadmap mappings.
#[async_trait]
pub trait RoadmapSource: Send + Sync {
    async fn load_roadmaps(&self) -> Result<HashMap<u8, u8>, SinkError>;
}

/// Egress for enriched results.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn publish(&self, result: &EnrichedResult) -> Result<(), SinkError>;
}

/// Persistence for enriched results. Insert only.
#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn save(&self, result: &EnrichedResult) -> Result<(), SinkError>;
}

/// Egress for counter snapshots.
#[async_trait]
pub trait StatsSink: Send + Sync {
    async fn publish_stats(&self, snapshot: StatsSnapshot) -> Result<(), SinkError>;
}
