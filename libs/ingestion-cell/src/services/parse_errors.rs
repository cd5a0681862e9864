use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Method;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{error, info, warn};
use uuid::Uuid;

use shared_database::supabase::{SupabaseClient, SupabaseError};

use crate::models::{IngestionError, ParseError, ParseFailureEvent};

#[async_trait]
pub trait ParseErrorStore: Send + Sync {
    async fn insert(&self, record: ParseError) -> Result<ParseError, IngestionError>;

    async fn get(&self, id: Uuid) -> Result<Option<ParseError>, IngestionError>;

    /// Newest first, optionally filtered on the resolved flag.
    async fn list(&self, resolved: Option<bool>) -> Result<Vec<ParseError>, IngestionError>;

    async fn update(&self, record: ParseError) -> Result<ParseError, IngestionError>;
}

/// Hand-off to the admin notification collaborator.
#[async_trait]
pub trait ParseFailureNotifier: Send + Sync {
    async fn notify(&self, event: &ParseFailureEvent) -> anyhow::Result<()>;
}

/// Emits the failure as a structured log event.
pub struct LoggingNotifier;

#[async_trait]
impl ParseFailureNotifier for LoggingNotifier {
    async fn notify(&self, event: &ParseFailureEvent) -> anyhow::Result<()> {
        warn!(
            source_id = %event.source_id,
            error_type = %event.error_type,
            sender = %event.metadata.sender,
            "Reservation message needs review: {}",
            event.error_message
        );
        Ok(())
    }
}

pub struct ParseErrorService {
    store: Arc<dyn ParseErrorStore>,
    notifier: Arc<dyn ParseFailureNotifier>,
}

impl ParseErrorService {
    pub fn new(store: Arc<dyn ParseErrorStore>, notifier: Arc<dyn ParseFailureNotifier>) -> Self {
        Self { store, notifier }
    }

    /// Stores the failure, then notifies. A notifier failure is logged only;
    /// the stored row is what staff review.
    pub async fn record(&self, event: ParseFailureEvent) -> Result<ParseError, IngestionError> {
        let stored = self.store.insert(ParseError::from_event(event.clone())).await?;
        info!("Parse error {} recorded ({})", stored.id, stored.error_type);

        if let Err(e) = self.notifier.notify(&event).await {
            error!("Failed to notify about parse error {}: {:#}", stored.id, e);
        }
        Ok(stored)
    }

    pub async fn list(&self, resolved: Option<bool>) -> Result<Vec<ParseError>, IngestionError> {
        self.store.list(resolved).await
    }

    pub async fn resolve(&self, id: Uuid, resolved_by: String) -> Result<ParseError, IngestionError> {
        if resolved_by.trim().is_empty() {
            return Err(IngestionError::Validation("resolved_by is required".to_string()));
        }

        let mut record = self
            .store
            .get(id)
            .await?
            .ok_or(IngestionError::ParseErrorNotFound(id))?;
        if record.resolved {
            return Err(IngestionError::AlreadyResolved(id));
        }

        record.resolved = true;
        record.resolved_at = Some(Utc::now());
        record.resolved_by = Some(resolved_by);
        self.store.update(record).await
    }
}

// ==============================================================================
// IN-MEMORY STORE
// ==============================================================================

#[derive(Default)]
pub struct InMemoryParseErrorStore {
    records: RwLock<Vec<ParseError>>,
}

impl InMemoryParseErrorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn count(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl ParseErrorStore for InMemoryParseErrorStore {
    async fn insert(&self, record: ParseError) -> Result<ParseError, IngestionError> {
        self.records.write().await.push(record.clone());
        Ok(record)
    }

    async fn get(&self, id: Uuid) -> Result<Option<ParseError>, IngestionError> {
        Ok(self.records.read().await.iter().find(|r| r.id == id).cloned())
    }

    async fn list(&self, resolved: Option<bool>) -> Result<Vec<ParseError>, IngestionError> {
        let mut found: Vec<ParseError> = self
            .records
            .read()
            .await
            .iter()
            .filter(|r| resolved.map_or(true, |flag| r.resolved == flag))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(found)
    }

    async fn update(&self, record: ParseError) -> Result<ParseError, IngestionError> {
        let mut records = self.records.write().await;
        match records.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => {
                *existing = record.clone();
                Ok(record)
            }
            None => Err(IngestionError::ParseErrorNotFound(record.id)),
        }
    }
}

// ==============================================================================
// SUPABASE STORE
// ==============================================================================

pub struct SupabaseParseErrorStore {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseParseErrorStore {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }
}

fn storage_error(err: SupabaseError) -> IngestionError {
    IngestionError::Storage(err.to_string())
}

fn decode(rows: Vec<Value>) -> Result<Vec<ParseError>, IngestionError> {
    rows.into_iter()
        .map(serde_json::from_value)
        .collect::<Result<Vec<ParseError>, _>>()
        .map_err(|e| IngestionError::Storage(format!("Failed to parse parse_errors row: {}", e)))
}

#[async_trait]
impl ParseErrorStore for SupabaseParseErrorStore {
    async fn insert(&self, record: ParseError) -> Result<ParseError, IngestionError> {
        let body = serde_json::to_value(&record).map_err(|e| IngestionError::Storage(e.to_string()))?;
        let rows: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/parse_errors",
                Some(body),
                Some(SupabaseClient::representation_headers()),
            )
            .await
            .map_err(storage_error)?;

        decode(rows)?
            .into_iter()
            .next()
            .ok_or_else(|| IngestionError::Storage("Parse error insert returned no rows".to_string()))
    }

    async fn get(&self, id: Uuid) -> Result<Option<ParseError>, IngestionError> {
        let path = format!("/rest/v1/parse_errors?id=eq.{}", id);
        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, None)
            .await
            .map_err(storage_error)?;
        Ok(decode(rows)?.into_iter().next())
    }

    async fn list(&self, resolved: Option<bool>) -> Result<Vec<ParseError>, IngestionError> {
        let mut path = "/rest/v1/parse_errors?order=created_at.desc".to_string();
        if let Some(flag) = resolved {
            path.push_str(&format!("&resolved=is.{}", flag));
        }
        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, None)
            .await
            .map_err(storage_error)?;
        decode(rows)
    }

    async fn update(&self, record: ParseError) -> Result<ParseError, IngestionError> {
        let path = format!("/rest/v1/parse_errors?id=eq.{}", record.id);
        let body = serde_json::to_value(&record).map_err(|e| IngestionError::Storage(e.to_string()))?;
        let rows: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &path,
                Some(body),
                Some(SupabaseClient::representation_headers()),
            )
            .await
            .map_err(storage_error)?;

        decode(rows)?
            .into_iter()
            .next()
            .ok_or(IngestionError::ParseErrorNotFound(record.id))
    }
}
