//! Core library modules for butterfly-reach
//!
//! Each stage of the house → stop distance pipeline lives in its own module;
//! `pipeline` strings them together.

pub mod aggregate;
pub mod dataset;
pub mod error;
pub mod matcher;
pub mod model;
pub mod partition;
pub mod pipeline;
pub mod projection;
pub mod retry;
pub mod router;
pub mod scheduler;

// Re-export main types for internal use
pub use dataset::{OverwriteBehavior, PointLayer};
pub use pipeline::{compute_distances, ReachOptions, ReachOutcome, RunStats};
pub use router::{RouterConfig, RoutingClient, TableService};
