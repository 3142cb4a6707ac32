//! Reconciliation and summary engine over persisted and live step counts.

pub mod reconcile;
pub mod registry;
pub mod service;
pub mod store;
pub mod summary;
pub mod types;

pub use reconcile::{propagate_modes, reconcile_intervals};
pub use registry::{ModeRegistry, WalkingModeRegistry};
pub use service::{local_midnight, ActivityService, Valuation};
pub use store::{LiveCounter, NoLiveCounter, StepIntervalStore};
pub use summary::{bucketize, summarize, BucketSpec, MAX_CHART_BUCKETS};
pub use types::{
    ActivitySummary, ChartBucket, CumulativeTotals, DayReport, LiveSnapshot, NeighbouringModes,
    PropagationPolicy, Window,
};
