//! Map rendering service, cache warm-up and metrics.

mod metrics;
mod renderer;
mod scheduler;


pub use metrics::{Metrics, MetricsReporter, MetricsSnapshot};
pub use renderer::{Layer, LayerSource, MapService, StripLayer, TileLayer};
pub use scheduler::{pyramid, PyramidTile, Scheduler, SchedulerConfig, WarmStats};
