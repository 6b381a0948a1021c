// =============================================================================
// Funding Sentinel — multi-source funding-rate aggregation & alert gating
// =============================================================================
//
// Library surface used by the host binary (src/main.rs) and by any other
// trigger that wants to run invocations: build an `AppState`, then call
// `cron::run_invocation` or the fetch/alert primitives directly.
// =============================================================================

pub mod alerts;
pub mod app_state;
pub mod cache;
pub mod cron;
pub mod error;
pub mod exchanges;
pub mod funding;
pub mod runtime_config;
pub mod sources;
pub mod types;

pub use app_state::AppState;
pub use cron::{run_invocation, InvocationReport};
pub use error::{CatalogError, ConfigurationError, NotifyError, SourceError};
pub use runtime_config::RuntimeConfig;
