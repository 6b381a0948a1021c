// =============================================================================
// Funding Module — collection, resolution and ranking of funding rates
// =============================================================================
//
//   settlement    — per-record timestamp resolution and pair eligibility
//   orchestrator  — two-phase concurrent fetch across the source registry
//   aggregator    — grouping, filtering and two-level ranking
// =============================================================================

pub mod aggregator;
pub mod orchestrator;
pub mod settlement;

pub use aggregator::{aggregate, build_snapshot};
pub use orchestrator::{run_fetch_cycle, run_fetch_cycle_at, FetchParams};
pub use settlement::estimate_next_funding;
