// ============================================
// Background Jobs Module (後台任務模組)
// ============================================
//
// Contains background job runners for:
// 1. Aggregate snapshot refresh (rebuilds cached insights from history)
//
// Jobs only read observation history and never touch preference models,
// so they run alongside ingestion without blocking it.

pub mod aggregate_refresh;

pub use aggregate_refresh::{AggregateRefreshJob, RefreshStats};
