//! Resource State Tracking
//!
//! The per-subresource state analysis that turns a compiled frame's pass
//! timeline into the minimal set of transition, UAV, aliasing, and
//! initialization events. See [`usage_analyzer::GpuResourceUsageAnalyzer`]
//! for the pipeline: zones → decay segmentation → read-combine
//! optimization → barrier merging.

pub mod barrier_merger;
pub mod events;
pub mod optimizer;
pub mod usage_analyzer;
pub mod zone;
pub mod zone_map;

pub use events::{GpuResourceEvent, GpuResourceEventKind, GpuResourceEventManager};
pub use usage_analyzer::GpuResourceUsageAnalyzer;
pub use zone::{PassRef, ResourceStateZone};
pub use zone_map::ResourceStateZoneMap;
