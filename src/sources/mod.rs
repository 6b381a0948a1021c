// =============================================================================
// Funding-Rate Sources — capability contracts and registry
// =============================================================================
//
// A source is one of two closed capability variants:
//
//   Bulk      — "list all current funding rates" in a single call.
//   Targeted  — "fetch the funding rate for one pair", plus the market list
//               used to decide which shortlisted instruments it can answer.
//
// The orchestrator dispatches on `SourceClient` rather than inspecting
// concrete client types.  How a client talks to its upstream is its own
// business; the core only relies on these traits.
// =============================================================================

pub mod registry;

pub use registry::{RegisteredSource, SourceRegistry};

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::SourceError;
use crate::types::{FundingRecord, QueryMode};

/// Source that reports every pair's funding rate in one call.
#[async_trait]
pub trait BulkSource: Send + Sync {
    /// Current funding records keyed by unified pair id.
    async fn list_funding_rates(&self) -> Result<BTreeMap<String, FundingRecord>, SourceError>;
}

/// Source that must be queried one pair at a time.
#[async_trait]
pub trait TargetedSource: Send + Sync {
    /// Unified pair ids this source lists.
    async fn list_markets(&self) -> Result<BTreeSet<String>, SourceError>;

    /// Funding record for `pair`, or `None` if the source has nothing for it.
    async fn fetch_funding_rate(&self, pair: &str) -> Result<Option<FundingRecord>, SourceError>;
}

/// Uniform handle over the two capability variants.
#[derive(Clone)]
pub enum SourceClient {
    Bulk(Arc<dyn BulkSource>),
    Targeted(Arc<dyn TargetedSource>),
}

impl SourceClient {
    pub fn mode(&self) -> QueryMode {
        match self {
            Self::Bulk(_) => QueryMode::Bulk,
            Self::Targeted(_) => QueryMode::Targeted,
        }
    }
}

impl std::fmt::Debug for SourceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SourceClient::{}", self.mode())
    }
}
