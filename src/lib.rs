#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_arguments)]

pub mod alias;
pub mod descriptors;
pub mod engine;
pub mod errors;
pub mod graph;
pub mod jobs;
pub mod memory;
pub mod present;
pub mod pso;
pub mod resource;
pub mod rhi;
pub mod settings;
pub mod state;

pub use alias::TransientResourceAliasTracker;
pub use engine::{ForgeEngine, ForgeEngineDesc};
pub use errors::{ForgeError, Result};
pub use graph::{
    Blackboard, ComputeQueue, CopyQueue, DirectQueue, FrameGraph, FrameGraphBuilder,
    FrameGraphManager, RenderModule, RenderPass, RenderPassBundle,
};
pub use jobs::{JobGroup, JobNotifier, JobSystem};
pub use resource::{
    BufferResource, DepthStencilTexture, GpuResource, GpuResourceCreateInfo, LifetimeType,
    RenderTargetTexture, Texture2D,
};
pub use rhi::{Device, ResourceDesc, ResourceStates};
pub use settings::RenderSettings;
