//! Synthetic tracker telemetry: a bounded random walk inside a geofence.

mod telemetry;
mod walker;

pub use telemetry::Telemetry;
pub use walker::{Geofence, RandomWalker, WalkParams};
