use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info};

use crate::messages::EnrichedResult;
use crate::sink::{ResultStore, RoadmapSource, SinkError};

/// Roadmap mappings and enriched results live in the same `messages` table.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect a new pool to the PostgreSQL database at `url`.
    pub async fn new(url: &str, max_connections: u32) -> Result<Self, SinkError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|error| SinkError::ConnectionError { error })?;

        info!("connected to postgres");

        Ok(Self { pool })
    }

    /// Apply the migrations bundled with this repository.
    pub async fn migrate(&self) -> Result<(), SinkError> {
        sqlx::migrate!("../migrations")
            .run(&self.pool)
            .await
            .map_err(SinkError::MigrationError)
    }

    pub async fn close(&self) {
        self.pool.close().await
    }
}

/// Narrow a SMALLINT column into the `u8` identifiers we carry around.
fn to_u8(column: &str, value: i16) -> Result<u8, SinkError> {
    u8::try_from(value).map_err(|_| SinkError::OutOfRangeError {
        column: column.to_owned(),
        value: i64::from(value),
    })
}

#[async_trait]
impl RoadmapSource for PgStore {
    async fn load_roadmaps(&self) -> Result<HashMap<u8, u8>, SinkError> {
        let rows: Vec<(i16, i16)> = sqlx::query_as("SELECT class_id, roadmap_id FROM messages")
            .fetch_all(&self.pool)
            .await
            .map_err(|error| SinkError::QueryError {
                command: "SELECT".to_owned(),
                error,
            })?;

        let mut roadmaps = HashMap::with_capacity(rows.len());
        for (class_id, roadmap_id) in rows {
            roadmaps.insert(
                to_u8("class_id", class_id)?,
                to_u8("roadmap_id", roadmap_id)?,
            );
        }

        info!(entries = roadmaps.len(), "loaded roadmaps from postgres");

        Ok(roadmaps)
    }
}

#[async_trait]
impl ResultStore for PgStore {
    async fn save(&self, result: &EnrichedResult) -> Result<(), SinkError> {
        sqlx::query("INSERT INTO messages (profile_id, class_id, roadmap_id) VALUES ($1, $2, $3)")
            .bind(result.profile_id)
            .bind(i16::from(result.class_id))
            .bind(i16::from(result.roadmap_id))
            .execute(&self.pool)
            .await
            .map_err(|error| SinkError::QueryError {
                command: "INSERT".to_owned(),
                error,
            })?;

        debug!(profile_id = result.profile_id, "result saved to postgres");

        Ok(())
    }
}
