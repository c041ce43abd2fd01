//! Frame Graph
//!
//! The declarative per-frame description of rendering work and the
//! machinery that compiles it into ordered, synchronized multi-queue
//! command submissions: passes and bundles in, execution modules with a
//! minimal barrier stream out.

pub mod blackboard;
pub mod builder;
pub mod bundle;
pub mod compiler;
pub mod fence_collection;
pub mod frame_graph;
pub mod module;
pub mod pass;
pub mod record;
pub mod submit;
pub mod sync_point;

pub use blackboard::Blackboard;
pub use builder::FrameGraphBuilder;
pub use bundle::RenderPassBundle;
pub use compiler::FrameGraphExecutionContext;
pub use fence_collection::FrameGraphFenceCollection;
pub use frame_graph::{
    FrameGraph, FrameGraphContext, FrameGraphManager, MAX_FRAMES_IN_FLIGHT, RenderModule,
};
pub use module::{GpuExecutionModule, MAX_RENDER_PASSES_PER_EXECUTION_MODULE};
pub use pass::{
    ComputeQueue, CopyQueue, DirectQueue, GpuQueue, RenderPass, RenderPassId, ResourceDependency,
};
pub use record::{ComputeContext, CopyContext, DirectContext};
pub use submit::{GpuCommandContextVault, GpuCommandManager};
