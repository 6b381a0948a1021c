// =============================================================================
// Event Catalog — scheduled macro-economic events
// =============================================================================
//
// The catalog is an external collaborator behind `EventCatalog`.  The bundled
// client reads the weekly JSON calendar feed:
//
//   [{ "title": "CPI m/m", "country": "USD", "date": "2024-03-12T08:30:00-04:00",
//      "impact": "High", "forecast": "0.4%", "previous": "0.3%" }, ...]
// =============================================================================

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::CatalogError;

/// Expected market impact of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImpactLevel {
    High,
    Medium,
    Low,
    #[serde(alias = "Non-Economic")]
    Holiday,
}

impl std::fmt::Display for ImpactLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::High => write!(f, "High"),
            Self::Medium => write!(f, "Medium"),
            Self::Low => write!(f, "Low"),
            Self::Holiday => write!(f, "Holiday"),
        }
    }
}

/// One scheduled event from the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledEvent {
    pub title: String,
    #[serde(rename = "country")]
    pub origin_country: String,
    #[serde(rename = "impact")]
    pub impact_level: ImpactLevel,
    #[serde(rename = "date")]
    pub scheduled_at: DateTime<FixedOffset>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub forecast: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub previous: Option<String>,
}

impl ScheduledEvent {
    /// Dedup identity: title plus scheduled instant.
    pub fn identity_key(&self) -> String {
        format!("{}-{}", self.title, self.scheduled_at.to_rfc3339())
    }

    pub fn scheduled_at_ms(&self) -> i64 {
        self.scheduled_at.timestamp_millis()
    }
}

fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.trim().is_empty()))
}

/// Source of this period's scheduled events.
#[async_trait]
pub trait EventCatalog: Send + Sync {
    async fn fetch_events(&self) -> Result<Vec<ScheduledEvent>, CatalogError>;
}

/// HTTP client for the weekly JSON calendar feed.
pub struct WeeklyCalendarClient {
    url: String,
    client: reqwest::Client,
}

impl WeeklyCalendarClient {
    pub fn new(url: impl Into<String>) -> Result<Self, CatalogError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| CatalogError::Fetch(e.to_string()))?;
        Ok(Self::with_client(url, client))
    }

    /// Create a catalog client that re-uses an existing HTTP client.
    pub fn with_client(url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            url: url.into(),
            client,
        }
    }
}

#[async_trait]
impl EventCatalog for WeeklyCalendarClient {
    #[instrument(skip(self), name = "calendar::fetch_events")]
    async fn fetch_events(&self) -> Result<Vec<ScheduledEvent>, CatalogError> {
        let resp = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| CatalogError::Fetch(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(CatalogError::Status(status.as_u16()));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| CatalogError::Fetch(e.to_string()))?;
        let events = parse_events(&body)?;

        debug!(count = events.len(), "calendar fetched");
        Ok(events)
    }
}

/// Parse a calendar feed payload.
pub fn parse_events(body: &str) -> Result<Vec<ScheduledEvent>, CatalogError> {
    serde_json::from_str(body).map_err(|e| CatalogError::Parse(e.to_string()))
}
