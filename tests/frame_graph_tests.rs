//! Frame Graph Tests
//!
//! Tests for:
//! - Execution-module packing: single-queue merging, the pass cap, and
//!   sync-point isolation
//! - End-to-end frame processing against the software backend: special
//!   initialization, barrier recording, ordered submission
//! - Frame fence monotonicity across frames
//! - Presentation callbacks, including error collection

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use forge::engine::{ForgeEngine, ForgeEngineDesc};
use forge::descriptors::DescriptorHeapConfig;
use forge::errors::ForgeError;
use forge::graph::bundle::RenderPassBundle;
use forge::graph::module::{
    create_execution_modules, MAX_RENDER_PASSES_PER_EXECUTION_MODULE,
};
use forge::graph::pass::{ComputeQueue, DirectQueue, RenderPass};
use forge::graph::{FrameGraphBuilder, RenderModule};
use forge::resource::GpuResourceCreateInfo;
use forge::rhi::device::RecordedCommand;
use forge::rhi::software::{SoftwareDevice, SoftwareDeviceConfig};
use forge::rhi::states::ResourceStates;
use forge::rhi::types::{
    Format, QueueType, ResourceBarrier, ResourceDesc, ResourceFlags,
};
use forge::rhi::ClearValue;

fn direct_bundle(pass_count: usize) -> RenderPassBundle {
    let mut bundle = RenderPassBundle::new();
    for index in 0..pass_count {
        bundle.add_render_pass(RenderPass::<DirectQueue>::new(format!("pass_{index}")));
    }
    bundle
}

fn test_engine_desc() -> ForgeEngineDesc {
    ForgeEngineDesc {
        descriptor_heap: DescriptorHeapConfig {
            bindless_partition_size: 256,
            per_frame_partition_size: 256,
        },
        default_heap_size: 1 << 20,
        ..ForgeEngineDesc::default()
    }
}

// ============================================================================
// Module packing
// ============================================================================

#[test]
fn adjacent_direct_bundles_merge_into_one_module() {
    let mut bundles = vec![direct_bundle(2), direct_bundle(3), direct_bundle(1)];
    for (index, bundle) in bundles.iter_mut().enumerate() {
        bundle.set_id(index as u32);
    }

    let modules = create_execution_modules(bundles);
    assert_eq!(modules.len(), 1);
    assert_eq!(modules[0].pass_count(), 6);
    assert_eq!(modules[0].bundle_id_range(), Some((0, 2)));
}

#[test]
fn queue_changes_start_new_modules() {
    let mut compute_bundle = RenderPassBundle::new();
    compute_bundle.add_render_pass(RenderPass::<ComputeQueue>::new("async_work"));

    let mut bundles = vec![direct_bundle(1), compute_bundle, direct_bundle(1)];
    for (index, bundle) in bundles.iter_mut().enumerate() {
        bundle.set_id(index as u32);
    }

    let modules = create_execution_modules(bundles);
    assert_eq!(modules.len(), 3);
    assert_eq!(modules[0].module_id(), 0);
    assert_eq!(modules[2].module_id(), 2);
}

#[test]
fn pass_cap_limits_module_growth() {
    // 201 one-pass bundles: the cap closes the first module at 200.
    let mut bundles: Vec<RenderPassBundle> = (0..=MAX_RENDER_PASSES_PER_EXECUTION_MODULE)
        .map(|_| direct_bundle(1))
        .collect();
    for (index, bundle) in bundles.iter_mut().enumerate() {
        bundle.set_id(index as u32);
    }

    let modules = create_execution_modules(bundles);
    assert_eq!(modules.len(), 2);
    assert_eq!(modules[0].pass_count(), MAX_RENDER_PASSES_PER_EXECUTION_MODULE);
    assert_eq!(modules[1].pass_count(), 1);
}

#[test]
fn oversized_bundle_still_forms_a_single_module() {
    let mut bundles = vec![
        direct_bundle(MAX_RENDER_PASSES_PER_EXECUTION_MODULE + 50),
        direct_bundle(1),
    ];
    for (index, bundle) in bundles.iter_mut().enumerate() {
        bundle.set_id(index as u32);
    }

    let modules = create_execution_modules(bundles);
    assert_eq!(modules.len(), 2);
    assert_eq!(
        modules[0].pass_count(),
        MAX_RENDER_PASSES_PER_EXECUTION_MODULE + 50
    );
}

// ============================================================================
// End-to-end frame processing
// ============================================================================

struct ColorPassModule {
    draw_count: Arc<AtomicUsize>,
}

impl RenderModule for ColorPassModule {
    fn name(&self) -> &str {
        "color_pass"
    }

    fn build_frame_graph(&mut self, builder: &mut FrameGraphBuilder) {
        let target = builder.create_transient_resource(GpuResourceCreateInfo {
            clear_value: Some(ClearValue::Color([0.0, 0.0, 0.0, 1.0])),
            ..GpuResourceCreateInfo::new(
                ResourceDesc {
                    flags: ResourceFlags::ALLOW_RENDER_TARGET,
                    ..ResourceDesc::texture_2d(Format::Rgba8Unorm, 64, 64, 1)
                },
                "color_target",
            )
        });

        let mut render = RenderPass::<DirectQueue>::new("render");
        render.add_resource_dependency(&target, ResourceStates::RENDER_TARGET);
        {
            let target = Arc::clone(&target);
            let draw_count = Arc::clone(&self.draw_count);
            render.set_record_callback(move |ctx| {
                ctx.clear_render_target(&target, [0.2, 0.2, 0.2, 1.0]);
                ctx.draw(3, 1);
                draw_count.fetch_add(1, Ordering::Relaxed);
            });
        }

        let mut sample = RenderPass::<DirectQueue>::new("sample");
        sample.add_resource_dependency(&target, ResourceStates::PIXEL_SHADER_RESOURCE);
        sample.set_record_callback(|ctx| ctx.draw(3, 1));

        let mut bundle = RenderPassBundle::new();
        bundle.add_render_pass(render);
        bundle.add_render_pass(sample);
        builder.add_render_pass_bundle(bundle);
    }
}

#[test]
fn frames_execute_with_initialization_and_barriers() {
    let backend = Arc::new(SoftwareDevice::new(SoftwareDeviceConfig::default()));
    let mut engine = ForgeEngine::new(backend, test_engine_desc()).unwrap();

    let draw_count = Arc::new(AtomicUsize::new(0));
    let modules: Vec<Arc<Mutex<dyn RenderModule>>> = vec![Arc::new(Mutex::new(ColorPassModule {
        draw_count: Arc::clone(&draw_count),
    }))];

    for _ in 0..3 {
        engine.process_frame(&modules).unwrap();
    }
    engine.wait_for_idle().unwrap();

    assert_eq!(draw_count.load(Ordering::Relaxed), 3);

    let log = engine.command_manager().queue(QueueType::Direct).take_log();
    let mut clear_count = 0;
    let mut rt_to_srv_barriers = 0;

    for event in &log {
        let forge::rhi::device::QueueEvent::Execute(lists) = event else {
            continue;
        };
        for command in lists.iter().flatten() {
            match command {
                RecordedCommand::ClearRenderTarget { .. } => clear_count += 1,
                RecordedCommand::Barriers(barriers) => {
                    for barrier in barriers {
                        if let ResourceBarrier::Transition { before, after, .. } = barrier {
                            if *before == ResourceStates::RENDER_TARGET
                                && *after == ResourceStates::PIXEL_SHADER_RESOURCE
                            {
                                rt_to_srv_barriers += 1;
                            }
                        }
                    }
                }
                _ => {}
            }
        }
    }

    // One clear from the special initialization plus one from the pass
    // callback, every frame.
    assert_eq!(clear_count, 6);
    assert_eq!(rt_to_srv_barriers, 3);

    engine.shutdown().unwrap();
}

#[test]
fn frame_fences_signal_strictly_increasing_values() {
    let backend = Arc::new(SoftwareDevice::new(SoftwareDeviceConfig::default()));
    let mut engine = ForgeEngine::new(backend, test_engine_desc()).unwrap();

    let draw_count = Arc::new(AtomicUsize::new(0));
    let modules: Vec<Arc<Mutex<dyn RenderModule>>> = vec![Arc::new(Mutex::new(ColorPassModule {
        draw_count,
    }))];

    let mut previous = 0;
    for _ in 0..4 {
        engine.process_frame(&modules).unwrap();
        engine.wait_for_idle().unwrap();

        for queue in QueueType::ALL {
            let value = engine.command_manager().frame_fence(queue).completed_value();
            assert!(
                value > previous || queue != QueueType::Direct,
                "fence value must strictly increase per frame"
            );
        }
        let direct = engine
            .command_manager()
            .frame_fence(QueueType::Direct)
            .completed_value();
        assert!(direct > previous);
        previous = direct;
    }

    engine.shutdown().unwrap();
}

// ============================================================================
// Presentation
// ============================================================================

struct PresentingModule;

impl RenderModule for PresentingModule {
    fn name(&self) -> &str {
        "presenting"
    }

    fn build_frame_graph(&mut self, builder: &mut FrameGraphBuilder) {
        let mut pass = RenderPass::<DirectQueue>::new("composite");
        pass.set_record_callback(|ctx| {
            ctx.draw(3, 1);
            ctx.present();
        });
        builder.add_render_pass(pass);
    }
}

#[test]
fn present_callbacks_run_once_per_presented_frame() {
    let backend = Arc::new(SoftwareDevice::new(SoftwareDeviceConfig::default()));
    let mut engine = ForgeEngine::new(backend, test_engine_desc()).unwrap();

    let present_count = Arc::new(AtomicUsize::new(0));
    {
        let present_count = Arc::clone(&present_count);
        engine.presentation().register_present_callback(move || {
            present_count.fetch_add(1, Ordering::Relaxed);
            Ok(())
        });
    }

    let modules: Vec<Arc<Mutex<dyn RenderModule>>> =
        vec![Arc::new(Mutex::new(PresentingModule))];

    for _ in 0..2 {
        engine.process_frame(&modules).unwrap();
    }
    engine.wait_for_idle().unwrap();

    assert_eq!(present_count.load(Ordering::Relaxed), 2);
    engine.shutdown().unwrap();
}

#[test]
fn failing_present_callback_surfaces_after_all_callbacks_ran() {
    let backend = Arc::new(SoftwareDevice::new(SoftwareDeviceConfig::default()));
    let mut engine = ForgeEngine::new(backend, test_engine_desc()).unwrap();

    let survivor_ran = Arc::new(AtomicUsize::new(0));
    engine.presentation().register_present_callback(|| {
        Err(ForgeError::DeviceError("swap chain lost".into()))
    });
    {
        let survivor_ran = Arc::clone(&survivor_ran);
        engine.presentation().register_present_callback(move || {
            survivor_ran.fetch_add(1, Ordering::Relaxed);
            Ok(())
        });
    }

    let modules: Vec<Arc<Mutex<dyn RenderModule>>> =
        vec![Arc::new(Mutex::new(PresentingModule))];

    engine.process_frame(&modules).unwrap();
    let result = engine.wait_for_idle();

    assert!(matches!(
        result,
        Err(ForgeError::PresentationFailed { failed_count: 1, .. })
    ));
    // The error never short-circuited the other callback.
    assert_eq!(survivor_ran.load(Ordering::Relaxed), 1);

    engine.shutdown().unwrap();
}
