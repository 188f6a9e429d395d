//! Integration tests for frame recording and pacing on the headless device.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use cadence_core::EngineConfig;
use cadence_renderer::{
    FrameTargets, ObjectHandle, ObjectKind, ObjectRegistry, Orchestrator, PipelineStateTag,
    PipelineTable, RenderItem, RenderPass, RenderResult, Renderable, ResourceContext,
};
use cadence_rhi::{Command, CompletionMode, GpuDevice, HeadlessDevice, ResourceView};

/// Binds one texture and draws a cube.
struct Cube;

impl Renderable for Cube {
    fn render(&self, ctx: &mut ResourceContext<'_>, _: PipelineStateTag) -> RenderResult<()> {
        ctx.bind_views(1, &[ResourceView(500 + ctx.item().object().0)])?;
        ctx.draw(36, 1)
    }
}

fn setup(device: Arc<HeadlessDevice>, threads: usize) -> (Orchestrator, Vec<ObjectHandle>) {
    let registry = Arc::new(ObjectRegistry::new());
    let objects = (0..8).map(|_| registry.register(Arc::new(Cube))).collect();
    let orchestrator = Orchestrator::with_thread_count(
        device,
        &EngineConfig::default(),
        threads,
        PipelineTable::standard(),
        registry,
        FrameTargets::default(),
    )
    .expect("Failed to create orchestrator");
    (orchestrator, objects)
}

fn submit_scene(orchestrator: &mut Orchestrator, objects: &[ObjectHandle]) {
    let tags = [
        PipelineStateTag::ShadowStatic,
        PipelineStateTag::Opaque,
        PipelineStateTag::Sky,
        PipelineStateTag::MirrorStencil,
        PipelineStateTag::Reflected,
        PipelineStateTag::MirrorBlend,
        PipelineStateTag::PostProcess,
    ];
    for tag in tags {
        for &object in objects {
            let item = RenderItem::new(ObjectKind::StaticMesh, object, tag);
            orchestrator
                .submit_item(tag.pass(), item)
                .expect("Failed to submit item");
        }
    }
}

/// Pass a pipeline id from the standard table belongs to.
fn pass_of_pipeline(id: u32) -> RenderPass {
    match id {
        1 | 2 => RenderPass::Shadow,
        3..=5 => RenderPass::Object,
        6 => RenderPass::MirrorStencil,
        7 | 8 => RenderPass::MirrorBlend,
        9 => RenderPass::PostProcess,
        other => panic!("unexpected pipeline id {}", other),
    }
}

#[test]
fn test_passes_execute_in_order_with_transitions_between() {
    let device = HeadlessDevice::new(CompletionMode::Immediate);
    let (mut orchestrator, objects) = setup(device.clone(), 3);

    orchestrator.begin_frame();
    submit_scene(&mut orchestrator, &objects);
    let stats = orchestrator.render_frame().expect("Frame failed");
    assert_eq!(stats.total_items(), 7 * objects.len());

    let log = device.executed_commands();
    assert!(
        matches!(log[0].command, Command::Transition { .. }),
        "Frame should open with the shadow-pass transitions"
    );

    // Every worker list opens with its pipeline, so each draw belongs to the
    // pipeline set most recently in the log.
    let mut pipeline = None;
    let mut last_pass = RenderPass::Shadow;
    let mut transition_since_pass_change = false;
    let mut draws = 0usize;
    for executed in &log {
        match executed.command {
            Command::SetPipelineState(id) => pipeline = Some(id),
            Command::Transition { .. } => transition_since_pass_change = true,
            ref command if command.is_draw() => {
                let pass = pass_of_pipeline(pipeline.expect("Draw before any pipeline"));
                assert!(
                    pass >= last_pass,
                    "{} draw executed after {} draws",
                    pass,
                    last_pass
                );
                if pass != last_pass {
                    assert!(
                        transition_since_pass_change,
                        "No transition between {} and {}",
                        last_pass,
                        pass
                    );
                    last_pass = pass;
                }
                transition_since_pass_change = false;
                draws += 1;
            }
            _ => {}
        }
    }
    assert_eq!(draws, 7 * objects.len());
    assert!(
        matches!(
            log.last().map(|c| c.command),
            Some(Command::Transition { .. })
        ),
        "Frame should close with the present transitions"
    );
}

#[test]
fn test_cpu_waits_for_lagging_gpu_before_reusing_slot() {
    let device = HeadlessDevice::new(CompletionMode::Manual);
    let (mut orchestrator, objects) = setup(device.clone(), 2);

    // Frame 0 fills slot 0; nothing to wait for yet.
    orchestrator.begin_frame();
    submit_scene(&mut orchestrator, &objects);
    let first = orchestrator.render_frame().expect("Frame 0 failed");
    assert_eq!(first.fence_value, 1);
    assert_eq!(device.completed_value().unwrap(), 0);

    // Frame 1 must wait for fence 1 before slot 0 can be reset.
    let released = Arc::new(AtomicBool::new(false));
    let gpu = {
        let device = device.clone();
        let released = released.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            released.store(true, Ordering::SeqCst);
            device.complete_up_to(1);
        })
    };

    orchestrator.begin_frame();
    submit_scene(&mut orchestrator, &objects);
    let second = orchestrator.render_frame().expect("Frame 1 failed");
    assert!(
        released.load(Ordering::SeqCst),
        "Slot 0 was reused before the GPU reached its fence"
    );
    assert_eq!(second.fence_value, 2);
    assert_eq!(orchestrator.outstanding_lists(0), 0);
    gpu.join().expect("GPU thread panicked");

    device.complete_all();
}

#[test]
fn test_single_frame_in_flight_syncs_every_frame() {
    let device = HeadlessDevice::new(CompletionMode::Delayed(Duration::from_millis(1)));
    let registry = Arc::new(ObjectRegistry::new());
    let cube = registry.register(Arc::new(Cube));
    let config = EngineConfig {
        frames_in_flight: 1,
        ..EngineConfig::default()
    };
    let mut orchestrator = Orchestrator::with_thread_count(
        device.clone(),
        &config,
        2,
        PipelineTable::standard(),
        registry,
        FrameTargets::default(),
    )
    .expect("Failed to create orchestrator");

    for frame in 0..4u64 {
        orchestrator.begin_frame();
        orchestrator
            .submit_item(
                RenderPass::Object,
                RenderItem::new(ObjectKind::StaticMesh, cube, PipelineStateTag::Opaque),
            )
            .expect("Failed to submit item");
        let stats = orchestrator.render_frame().expect("Frame failed");
        assert_eq!(stats.frame_index, 0);
        assert_eq!(device.signaled_value(), frame + 1);
        assert_eq!(device.pending_operations(), 0, "GPU still busy after frame");
    }
}

#[test]
fn test_many_frames_with_delayed_gpu() {
    let device = HeadlessDevice::new(CompletionMode::Delayed(Duration::from_micros(200)));
    let (mut orchestrator, objects) = setup(device.clone(), 4);

    for _ in 0..20 {
        orchestrator.begin_frame();
        submit_scene(&mut orchestrator, &objects);
        orchestrator.render_frame().expect("Frame failed");
    }
    orchestrator.wait_for_gpu_idle().expect("Idle wait failed");
    assert_eq!(device.presented_count(), 20);
    assert_eq!(device.pending_operations(), 0);
}
