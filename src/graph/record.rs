//! Command Recording Contexts
//!
//! Wraps the open command list a pass records into. Every operation that
//! touches a resource asserts (in debug builds) that the pass declared a
//! dependency on it with sufficient access; undeclared use would bypass
//! state analysis entirely and corrupt the barrier stream.
//!
//! The queue-typed wrappers expose only the operations their queue class
//! supports: copy contexts cannot draw, compute contexts cannot clear
//! render targets.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::resource::GpuResource;
use crate::rhi::device::CommandList;
use crate::rhi::states::ResourceStates;

use super::pass::RenderPassNode;

/// Queue-erased recording state for one pass.
pub struct RecordContext<'a> {
    list: &'a mut CommandList,
    pass: &'a RenderPassNode,
    present_requested: &'a AtomicBool,
    frame_number: u64,
}

impl<'a> RecordContext<'a> {
    pub(crate) fn new(
        list: &'a mut CommandList,
        pass: &'a RenderPassNode,
        present_requested: &'a AtomicBool,
        frame_number: u64,
    ) -> Self {
        Self {
            list,
            pass,
            present_requested,
            frame_number,
        }
    }

    /// The frame this pass records for.
    #[inline]
    #[must_use]
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    fn assert_dependency(&self, resource: &GpuResource, access: ResourceStates) {
        debug_assert!(
            self.pass.has_dependency(resource, access),
            "pass '{}' uses resource '{}' as {access:?} without declaring the dependency",
            self.pass.name(),
            resource.name(),
        );
    }

    fn raw(resource: &GpuResource) -> crate::rhi::types::RawResourceId {
        resource
            .raw_resource()
            .expect("resource recorded before its GPU allocation was created")
    }

    fn draw(&mut self, vertex_count: u32, instance_count: u32) {
        self.list.draw(vertex_count, instance_count);
    }

    fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        self.list.dispatch(x, y, z);
    }

    fn clear_render_target(&mut self, target: &Arc<GpuResource>, color: [f32; 4]) {
        self.assert_dependency(target, ResourceStates::RENDER_TARGET);
        self.list.clear_render_target(Self::raw(target), color);
    }

    fn clear_depth_stencil(&mut self, target: &Arc<GpuResource>, depth: f32, stencil: u8) {
        self.assert_dependency(target, ResourceStates::DEPTH_WRITE);
        self.list.clear_depth_stencil(Self::raw(target), depth, stencil);
    }

    fn copy_resource(&mut self, src: &Arc<GpuResource>, dst: &Arc<GpuResource>) {
        self.assert_dependency(src, ResourceStates::COPY_SOURCE);
        self.assert_dependency(dst, ResourceStates::COPY_DEST);
        self.list.copy_resource(Self::raw(src), Self::raw(dst));
    }

    fn copy_buffer_region(
        &mut self,
        src: &Arc<GpuResource>,
        src_offset: u64,
        dst: &Arc<GpuResource>,
        dst_offset: u64,
        size: u64,
    ) {
        self.assert_dependency(src, ResourceStates::COPY_SOURCE);
        self.assert_dependency(dst, ResourceStates::COPY_DEST);
        self.list
            .copy_buffer_region(Self::raw(src), src_offset, Self::raw(dst), dst_offset, size);
    }

    fn execute_indirect(
        &mut self,
        argument_buffer: &Arc<GpuResource>,
        argument_offset: u64,
        max_command_count: u32,
    ) {
        self.assert_dependency(argument_buffer, ResourceStates::INDIRECT_ARGUMENT);
        self.list
            .execute_indirect(Self::raw(argument_buffer), argument_offset, max_command_count);
    }
}

// ============================================================================
// Queue-typed contexts
// ============================================================================

/// Recording context of a direct-queue pass.
pub struct DirectContext<'a> {
    context: RecordContext<'a>,
}

impl<'a> DirectContext<'a> {
    pub(crate) fn new(context: RecordContext<'a>) -> Self {
        Self { context }
    }

    #[must_use]
    pub fn frame_number(&self) -> u64 {
        self.context.frame_number()
    }

    pub fn draw(&mut self, vertex_count: u32, instance_count: u32) {
        self.context.draw(vertex_count, instance_count);
    }

    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        self.context.dispatch(x, y, z);
    }

    pub fn clear_render_target(&mut self, target: &Arc<GpuResource>, color: [f32; 4]) {
        self.context.clear_render_target(target, color);
    }

    pub fn clear_depth_stencil(&mut self, target: &Arc<GpuResource>, depth: f32, stencil: u8) {
        self.context.clear_depth_stencil(target, depth, stencil);
    }

    pub fn copy_resource(&mut self, src: &Arc<GpuResource>, dst: &Arc<GpuResource>) {
        self.context.copy_resource(src, dst);
    }

    pub fn copy_buffer_region(
        &mut self,
        src: &Arc<GpuResource>,
        src_offset: u64,
        dst: &Arc<GpuResource>,
        dst_offset: u64,
        size: u64,
    ) {
        self.context
            .copy_buffer_region(src, src_offset, dst, dst_offset, size);
    }

    pub fn execute_indirect(
        &mut self,
        argument_buffer: &Arc<GpuResource>,
        argument_offset: u64,
        max_command_count: u32,
    ) {
        self.context
            .execute_indirect(argument_buffer, argument_offset, max_command_count);
    }

    /// Requests presentation at the end of this frame's submission.
    pub fn present(&mut self) {
        self.context
            .present_requested
            .store(true, Ordering::Release);
    }
}

/// Recording context of a compute-queue pass.
pub struct ComputeContext<'a> {
    context: RecordContext<'a>,
}

impl<'a> ComputeContext<'a> {
    pub(crate) fn new(context: RecordContext<'a>) -> Self {
        Self { context }
    }

    #[must_use]
    pub fn frame_number(&self) -> u64 {
        self.context.frame_number()
    }

    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        self.context.dispatch(x, y, z);
    }

    pub fn copy_resource(&mut self, src: &Arc<GpuResource>, dst: &Arc<GpuResource>) {
        self.context.copy_resource(src, dst);
    }

    pub fn copy_buffer_region(
        &mut self,
        src: &Arc<GpuResource>,
        src_offset: u64,
        dst: &Arc<GpuResource>,
        dst_offset: u64,
        size: u64,
    ) {
        self.context
            .copy_buffer_region(src, src_offset, dst, dst_offset, size);
    }

    pub fn execute_indirect(
        &mut self,
        argument_buffer: &Arc<GpuResource>,
        argument_offset: u64,
        max_command_count: u32,
    ) {
        self.context
            .execute_indirect(argument_buffer, argument_offset, max_command_count);
    }
}

/// Recording context of a copy-queue pass.
pub struct CopyContext<'a> {
    context: RecordContext<'a>,
}

impl<'a> CopyContext<'a> {
    pub(crate) fn new(context: RecordContext<'a>) -> Self {
        Self { context }
    }

    #[must_use]
    pub fn frame_number(&self) -> u64 {
        self.context.frame_number()
    }

    pub fn copy_resource(&mut self, src: &Arc<GpuResource>, dst: &Arc<GpuResource>) {
        self.context.copy_resource(src, dst);
    }

    pub fn copy_buffer_region(
        &mut self,
        src: &Arc<GpuResource>,
        src_offset: u64,
        dst: &Arc<GpuResource>,
        dst_offset: u64,
        size: u64,
    ) {
        self.context
            .copy_buffer_region(src, src_offset, dst, dst_offset, size);
    }
}

// ============================================================================
// Module recording
// ============================================================================

pub(crate) use emit::record_module_commands;

mod emit {
    use std::sync::atomic::AtomicBool;

    use super::RecordContext;
    use crate::graph::module::GpuExecutionModule;
    use crate::graph::submit::{GpuCommandContext, GpuCommandContextGroup, GpuCommandContextVault};
    use crate::resource::SpecialInitializationMethod;
    use crate::rhi::types::{ClearValue, QueueType, ResourceBarrier};
    use crate::state::events::{GpuResourceEventKind, GpuResourceEventManager};

    /// Records every pass of one execution module: the pass's events
    /// (barriers, initialization) first, then its record callback.
    pub(crate) fn record_module_commands(
        module: &GpuExecutionModule,
        events: &GpuResourceEventManager,
        vault: &GpuCommandContextVault,
        present_requested: &AtomicBool,
        frame_number: u64,
    ) -> GpuCommandContextGroup {
        let mut contexts: Vec<GpuCommandContext> = Vec::new();

        for queue in QueueType::ALL {
            if !module.used_queues().contains(queue.into()) {
                continue;
            }

            let mut context = vault.acquire(queue);

            for pass in module.passes(queue) {
                emit_pass_events(events, pass, &mut context);

                context.list.begin_event(pass.name(), pass.pix_color());
                if let Some(callback) = pass.take_callback() {
                    callback(RecordContext::new(
                        &mut context.list,
                        pass,
                        present_requested,
                        frame_number,
                    ));
                }
                context.list.end_event();
            }

            context.list.close();
            contexts.push(context);
        }

        GpuCommandContextGroup {
            module_id: module.module_id(),
            used_queues: module.used_queues(),
            contexts,
        }
    }

    fn emit_pass_events(
        events: &GpuResourceEventManager,
        pass: &crate::graph::pass::RenderPassNode,
        context: &mut GpuCommandContext,
    ) {
        let mut barriers: Vec<ResourceBarrier> = Vec::new();

        for event in events.events_for_pass(pass.id()) {
            let raw = event
                .resource
                .raw_resource()
                .expect("event references a resource without a GPU allocation");

            match &event.kind {
                GpuResourceEventKind::Transition {
                    subresource,
                    before,
                    after,
                    flags,
                } => barriers.push(ResourceBarrier::Transition {
                    resource: raw,
                    subresource: *subresource,
                    before: *before,
                    after: *after,
                    flags: *flags,
                }),
                GpuResourceEventKind::UavBarrier => {
                    barriers.push(ResourceBarrier::UnorderedAccess { resource: raw });
                }
                GpuResourceEventKind::Aliasing => {
                    barriers.push(ResourceBarrier::Aliasing {
                        before: None,
                        after: raw,
                    });
                }
                GpuResourceEventKind::SpecialInitialization(method) => {
                    // Initialization commands are ordered against the
                    // barriers already gathered for this pass.
                    context.list.resource_barriers(std::mem::take(&mut barriers));
                    match (method, event.resource.clear_value()) {
                        (SpecialInitializationMethod::Clear, Some(ClearValue::Color(color))) => {
                            context.list.clear_render_target(raw, color);
                        }
                        (
                            SpecialInitializationMethod::Clear,
                            Some(ClearValue::DepthStencil { depth, stencil }),
                        ) => {
                            context.list.clear_depth_stencil(raw, depth, stencil);
                        }
                        _ => context.list.discard_resource(raw),
                    }
                }
            }
        }

        context.list.resource_barriers(barriers);
    }
}
