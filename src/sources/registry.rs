// =============================================================================
// Source Registry — static, read-only table of funding-rate sources
// =============================================================================

use std::sync::Arc;

use tracing::warn;

use super::{BulkSource, SourceClient, TargetedSource};
use crate::types::{QueryMode, SourceDescriptor};

/// A descriptor paired with the client that serves it.  The descriptor's
/// query mode always matches the client variant.
#[derive(Debug, Clone)]
pub struct RegisteredSource {
    pub descriptor: SourceDescriptor,
    pub client: SourceClient,
}

impl RegisteredSource {
    pub fn bulk(
        id: impl Into<String>,
        display_name: impl Into<String>,
        client: Arc<dyn BulkSource>,
    ) -> Self {
        Self {
            descriptor: SourceDescriptor::new(id, display_name, QueryMode::Bulk),
            client: SourceClient::Bulk(client),
        }
    }

    pub fn targeted(
        id: impl Into<String>,
        display_name: impl Into<String>,
        client: Arc<dyn TargetedSource>,
    ) -> Self {
        Self {
            descriptor: SourceDescriptor::new(id, display_name, QueryMode::Targeted),
            client: SourceClient::Targeted(client),
        }
    }

    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    pub fn name(&self) -> &str {
        &self.descriptor.display_name
    }
}

/// Ordered set of sources with unique ids.  Built once at startup.
#[derive(Debug, Clone, Default)]
pub struct SourceRegistry {
    sources: Vec<RegisteredSource>,
}

impl SourceRegistry {
    pub fn new(sources: impl IntoIterator<Item = RegisteredSource>) -> Self {
        let mut registry = Self::default();
        for source in sources {
            registry.register(source);
        }
        registry
    }

    /// Add `source` unless its id is already taken (first registration wins).
    fn register(&mut self, source: RegisteredSource) {
        if self.sources.iter().any(|s| s.id() == source.id()) {
            warn!(source = %source.id(), "duplicate source id ignored");
            return;
        }
        self.sources.push(source);
    }

    pub fn list_sources(&self) -> Vec<&SourceDescriptor> {
        self.sources.iter().map(|s| &s.descriptor).collect()
    }

    pub fn sources_by_mode(&self, mode: QueryMode) -> Vec<&RegisteredSource> {
        self.sources
            .iter()
            .filter(|s| s.descriptor.query_mode == mode)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};

    use async_trait::async_trait;

    use super::*;
    use crate::error::SourceError;
    use crate::types::FundingRecord;

    struct NoopBulk;

    #[async_trait]
    impl BulkSource for NoopBulk {
        async fn list_funding_rates(&self) -> Result<BTreeMap<String, FundingRecord>, SourceError> {
            Ok(BTreeMap::new())
        }
    }

    struct NoopTargeted;

    #[async_trait]
    impl TargetedSource for NoopTargeted {
        async fn list_markets(&self) -> Result<BTreeSet<String>, SourceError> {
            Ok(BTreeSet::new())
        }

        async fn fetch_funding_rate(&self, _pair: &str) -> Result<Option<FundingRecord>, SourceError> {
            Ok(None)
        }
    }

    fn sample() -> SourceRegistry {
        SourceRegistry::new([
            RegisteredSource::bulk("binance", "Binance", Arc::new(NoopBulk)),
            RegisteredSource::targeted("okx", "OKX", Arc::new(NoopTargeted)),
            RegisteredSource::bulk("bybit", "Bybit", Arc::new(NoopBulk)),
        ])
    }

    #[test]
    fn lists_sources_in_registration_order() {
        let registry = sample();
        let ids: Vec<_> = registry.list_sources().iter().map(|d| d.id.clone()).collect();
        assert_eq!(ids, vec!["binance", "okx", "bybit"]);
    }

    #[test]
    fn filters_by_mode() {
        let registry = sample();
        let bulk: Vec<_> = registry
            .sources_by_mode(QueryMode::Bulk)
            .iter()
            .map(|s| s.id().to_string())
            .collect();
        assert_eq!(bulk, vec!["binance", "bybit"]);

        let targeted = registry.sources_by_mode(QueryMode::Targeted);
        assert_eq!(targeted.len(), 1);
        assert_eq!(targeted[0].client.mode(), QueryMode::Targeted);
    }

    #[test]
    fn duplicate_ids_are_dropped() {
        let registry = SourceRegistry::new([
            RegisteredSource::bulk("binance", "Binance", Arc::new(NoopBulk)),
            RegisteredSource::targeted("binance", "Binance again", Arc::new(NoopTargeted)),
        ]);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.list_sources()[0].query_mode, QueryMode::Bulk);
    }
}
