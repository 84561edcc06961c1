//! Durable storage — the persistence collaborator behind the Leader.
//!
//! DESIGN
//! ======
//! The core only ever talks to `DurableStore`: one read at bootstrap, one
//! debounced write per change window from the Leader. Three adapters cover
//! the deployment shapes: `MemoryStore` for tests and storeless relays,
//! `PgStore` for the relay's own database, `HttpStore` for cores running
//! apart from it.
//!
//! ERROR HANDLING
//! ==============
//! Store failures are never fatal upstream: a failed read bootstraps blank,
//! a failed write leaves the document dirty for the next flush attempt.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::crdt::{DocumentView, Element};
use crate::frame::ErrorCode;

// =============================================================================
// TYPES
// =============================================================================

/// Everything durable about a Room: the element list and canvas settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoomContent {
    pub elements: Vec<Element>,
    pub settings: BTreeMap<String, serde_json::Value>,
}

impl RoomContent {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty() && self.settings.is_empty()
    }
}

impl From<DocumentView> for RoomContent {
    fn from(view: DocumentView) -> Self {
        Self { elements: view.elements, settings: view.settings }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("storage request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("storage payload invalid: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl ErrorCode for StoreError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Database(_) => "E_STORE_DATABASE",
            Self::Http(_) => "E_STORE_HTTP",
            Self::Encoding(_) => "E_STORE_ENCODING",
            Self::Unavailable(_) => "E_STORE_UNAVAILABLE",
        }
    }

    fn retryable(&self) -> bool {
        !matches!(self, Self::Encoding(_))
    }
}

/// The narrow interface the collaboration core persists through.
#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn read(&self, room_id: Uuid) -> Result<Option<RoomContent>, StoreError>;
    async fn write(&self, room_id: Uuid, content: &RoomContent) -> Result<(), StoreError>;
}

// =============================================================================
// MEMORY
// =============================================================================

/// In-process store for tests and relays running without a database.
#[derive(Default)]
pub struct MemoryStore {
    rooms: RwLock<HashMap<Uuid, RoomContent>>,
    writes: AtomicUsize,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate a room, bypassing the write counter.
    pub async fn seed(&self, room_id: Uuid, content: RoomContent) {
        self.rooms.write().await.insert(room_id, content);
    }

    /// Completed writes since construction; lets tests assert debouncing.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn read(&self, room_id: Uuid) -> Result<Option<RoomContent>, StoreError> {
        Ok(self.rooms.read().await.get(&room_id).cloned())
    }

    async fn write(&self, room_id: Uuid, content: &RoomContent) -> Result<(), StoreError> {
        self.rooms.write().await.insert(room_id, content.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// =============================================================================
// POSTGRES
// =============================================================================

/// One JSONB row per room; upsert on write.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DurableStore for PgStore {
    async fn read(&self, room_id: Uuid) -> Result<Option<RoomContent>, StoreError> {
        let row = sqlx::query_as::<_, (serde_json::Value, serde_json::Value)>(
            "SELECT elements, settings FROM room_content WHERE room_id = $1",
        )
        .bind(room_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some((elements, settings)) = row else {
            return Ok(None);
        };
        Ok(Some(RoomContent {
            elements: serde_json::from_value(elements)?,
            settings: serde_json::from_value(settings)?,
        }))
    }

    async fn write(&self, room_id: Uuid, content: &RoomContent) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO room_content (room_id, elements, settings, updated_at) \
             VALUES ($1, $2, $3, now()) \
             ON CONFLICT (room_id) DO UPDATE SET \
                 elements = EXCLUDED.elements, \
                 settings = EXCLUDED.settings, \
                 updated_at = now()",
        )
        .bind(room_id)
        .bind(serde_json::to_value(&content.elements)?)
        .bind(serde_json::to_value(&content.settings)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// =============================================================================
// HTTP
// =============================================================================

/// Client for the relay's room-content endpoints.
pub struct HttpStore {
    base_url: String,
    client: reqwest::Client,
}

impl HttpStore {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into(), client: reqwest::Client::new() }
    }

    fn content_url(&self, room_id: Uuid) -> String {
        format!("{}/api/rooms/{room_id}/content", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl DurableStore for HttpStore {
    async fn read(&self, room_id: Uuid) -> Result<Option<RoomContent>, StoreError> {
        let response = self.client.get(self.content_url(room_id)).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let content = response.error_for_status()?.json::<RoomContent>().await?;
        Ok(Some(content))
    }

    async fn write(&self, room_id: Uuid, content: &RoomContent) -> Result<(), StoreError> {
        self.client
            .put(self.content_url(room_id))
            .json(content)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "storage_test.rs"]
mod tests;
