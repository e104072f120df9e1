mod common;

use std::path::{Path, PathBuf};

use image::{Rgba as Pixel, RgbaImage};
use preset::ParameterError;
use renderer::{
    FilterRuntime, FrameOutput, PipelineHandle, ResourceError, RuntimeError, RuntimeOptions,
    Size, SourceFrame, UniformValue, ORTHO_MVP,
};
use tempfile::{tempdir, TempDir};

use common::{
    broken_shader, copy_shader, gain_shader, invert_shader, write, MockBackend, BLUE, CYAN, RED,
};

const SOURCE_SIZE: Size = Size::new(64, 64);
const VIEWPORT: Size = Size::new(200, 150);

struct Fixture {
    dir: TempDir,
    runtime: FilterRuntime<MockBackend>,
    source: SourceFrame<u32>,
}

impl Fixture {
    fn new() -> Self {
        let mut backend = MockBackend::new();
        let texture = backend.solid(RED);
        Self {
            dir: tempdir().unwrap(),
            runtime: FilterRuntime::new(backend, RuntimeOptions::default()),
            source: SourceFrame::new(texture, SOURCE_SIZE),
        }
    }

    fn shader(&self, name: &str, text: &str) -> PathBuf {
        write(self.dir.path(), name, text)
    }

    fn preset(&self, text: &str) -> PathBuf {
        write(self.dir.path(), "chain.slangp", text)
    }

    fn load(&mut self, text: &str) -> PipelineHandle {
        let path = self.preset(text);
        self.runtime.load_preset(&path).unwrap()
    }

    fn render(&mut self, handle: PipelineHandle) -> Result<FrameOutput<u32>, RuntimeError> {
        self.runtime.render_frame(handle, &self.source, VIEWPORT)
    }

    fn backend(&mut self) -> &mut MockBackend {
        self.runtime.backend_mut()
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }
}

#[test]
fn inverting_red_gives_cyan_at_viewport_size() {
    let mut fx = Fixture::new();
    fx.shader("passthrough.slang", &copy_shader(&[]));
    fx.shader("invert.slang", &invert_shader());
    let handle = fx.load(
        "shaders = 2\nshader0 = passthrough.slang\nshader1 = invert.slang\nscale_type1 = viewport\n",
    );

    let output = fx.render(handle).unwrap();
    assert_eq!(output, FrameOutput::Screen { size: VIEWPORT });
    assert_eq!(fx.backend().screen, Some((CYAN, VIEWPORT)));
    let draws = fx.backend().take_draws();
    assert_eq!(draws.len(), 2);
    assert_eq!(draws[0].viewport, SOURCE_SIZE);
    assert_eq!(draws[1].viewport, VIEWPORT);
}

#[test]
fn passes_run_in_order_and_feed_each_other() {
    let mut fx = Fixture::new();
    fx.shader("a.slang", &copy_shader(&[]));
    fx.shader("b.slang", &copy_shader(&[]));
    fx.shader("c.slang", &copy_shader(&["PassOutput1", "First"]));
    let handle = fx.load(
        "shaders = 3\nshader0 = a.slang\nshader1 = b.slang\nshader2 = c.slang\nalias0 = First\n",
    );

    fx.render(handle).unwrap();
    let draws = fx.backend().take_draws();
    assert_eq!(draws.len(), 3);

    let a = draws[0].destination.unwrap();
    let b = draws[1].destination.unwrap();
    assert_ne!(a, b);
    assert_eq!(draws[0].texture("Source"), Some(fx.source.texture));
    assert_eq!(draws[1].texture("Source"), Some(a));
    assert_eq!(draws[2].texture("Source"), Some(b));
    assert_eq!(draws[2].texture("PassOutput1"), Some(b));
    assert_eq!(draws[2].texture("First"), Some(a));
    assert_eq!(draws[2].destination, None);

    // Identical sources share one program.
    assert_eq!(draws[0].program, draws[1].program);
    assert!(fx.runtime.cache().stats().hits >= 1);
}

#[test]
fn feedback_reads_the_previous_frame_never_the_current_write() {
    let mut fx = Fixture::new();
    fx.shader("trail.slang", &copy_shader(&["PassFeedback0"]));
    fx.shader("out.slang", &copy_shader(&[]));
    let handle = fx.load("shaders = 2\nshader0 = trail.slang\nshader1 = out.slang\n");
    assert!(fx.runtime.passes(handle).unwrap()[0].feedback);

    let mut written = Vec::new();
    for frame in 0..4 {
        fx.render(handle).unwrap();
        let draws = fx.backend().take_draws();
        let write = draws[0].destination.unwrap();
        let read = draws[0].texture("PassFeedback0").unwrap();
        assert_ne!(read, write, "frame {frame} sampled its own target");
        if let Some(previous) = written.last() {
            assert_eq!(read, *previous, "frame {frame} did not read frame {}", frame - 1);
        }
        written.push(write);
    }
}

#[test]
fn earlier_pass_reads_the_feedback_of_a_later_pass() {
    let mut fx = Fixture::new();
    fx.shader("reads.slang", &copy_shader(&["PassFeedback1"]));
    fx.shader("invert.slang", &invert_shader());
    let handle = fx.load("shaders = 2\nshader0 = reads.slang\nshader1 = invert.slang\n");
    assert!(fx.runtime.passes(handle).unwrap()[1].feedback);

    let mut written = None;
    for frame in 0..3 {
        let output = fx.render(handle).unwrap();
        assert_eq!(output, FrameOutput::Screen { size: VIEWPORT }, "frame {frame}");
        assert_eq!(fx.backend().screen, Some((CYAN, VIEWPORT)));

        let draws = fx.backend().take_draws();
        let read = draws[0].texture("PassFeedback1").unwrap();
        let write = draws[1].destination.unwrap();
        assert_ne!(read, write, "frame {frame} sampled the target being written");
        if let Some(previous) = written {
            assert_eq!(read, previous, "frame {frame} did not read frame {}", frame - 1);
            assert_eq!(fx.backend().color(read), Some(CYAN));
        }
        written = Some(write);
    }
}

#[test]
fn original_history_resolves_from_the_first_frame() {
    let mut fx = Fixture::new();
    fx.shader("history.slang", &copy_shader(&["OriginalHistory1"]));
    let handle = fx.load("shaders = 1\nshader0 = history.slang\n");

    assert_eq!(fx.render(handle).unwrap(), FrameOutput::Screen { size: VIEWPORT });
    fx.backend().take_draws();

    assert_eq!(fx.render(handle).unwrap(), FrameOutput::Screen { size: VIEWPORT });
    let draws = fx.backend().take_draws();
    let history = draws[0].texture("OriginalHistory1").unwrap();
    assert_eq!(fx.backend().color(history), Some(RED));
}

#[test]
fn broken_pass_degrades_to_passthrough_and_the_rest_still_run() {
    let mut fx = Fixture::new();
    fx.shader("invert.slang", &invert_shader());
    fx.shader("broken.slang", &broken_shader());
    let handle = fx.load(
        "shaders = 3\nshader0 = invert.slang\nshader1 = broken.slang\nshader2 = invert.slang\n",
    );

    let passes = fx.runtime.passes(handle).unwrap();
    assert!(!passes[0].status.is_degraded());
    assert!(passes[1].status.is_degraded());
    assert!(!passes[2].status.is_degraded());
    match &passes[1].status {
        renderer::PassStatus::Degraded { reason } => {
            assert!(reason.contains("compile failed"));
            assert!(reason.contains("undeclared_value"));
        }
        other => panic!("unexpected status {other:?}"),
    }

    for _ in 0..3 {
        let output = fx.render(handle).unwrap();
        assert_eq!(output, FrameOutput::Screen { size: VIEWPORT });
        assert_eq!(fx.backend().take_draws().len(), 3);
        // red -> cyan -> (copied) cyan -> red
        assert_eq!(fx.backend().screen, Some((RED, VIEWPORT)));
    }
}

#[test]
fn targets_are_reallocated_only_when_their_size_changes() {
    let mut fx = Fixture::new();
    fx.shader("a.slang", &copy_shader(&[]));
    let handle = fx.load("shaders = 2\nshader0 = a.slang\nshader1 = a.slang\nscale_type0 = viewport\n");

    fx.render(handle).unwrap();
    fx.render(handle).unwrap();
    assert_eq!(fx.backend().targets_created, 1);

    let wider = Size::new(320, 150);
    fx.runtime.render_frame(handle, &fx.source, wider).unwrap();
    assert_eq!(fx.backend().targets_created, 2);
    assert_eq!(fx.backend().targets_deleted, 1);
    assert_eq!(fx.runtime.passes(handle).unwrap()[0].size, Some(wider));
}

#[test]
fn generation_bump_aborts_the_frame_before_the_next_pass() {
    let mut fx = Fixture::new();
    fx.shader("a.slang", &copy_shader(&[]));
    let handle = fx.load("shaders = 3\nshader0 = a.slang\nshader1 = a.slang\nshader2 = a.slang\n");

    let token = fx.runtime.invalidation_token();
    fx.backend().invalidate_after = Some((1, token));
    assert_eq!(fx.render(handle).unwrap(), FrameOutput::Aborted { pass: 1 });
    assert_eq!(fx.backend().take_draws().len(), 1);
    assert_eq!(fx.runtime.pipeline(handle).unwrap().frame_count(), 0);

    fx.backend().invalidate_after = None;
    assert_eq!(fx.render(handle).unwrap(), FrameOutput::Screen { size: VIEWPORT });
    assert_eq!(fx.runtime.pipeline(handle).unwrap().frame_count(), 1);
}

#[test]
fn parameters_are_clamped_and_bound_as_uniforms() {
    let mut fx = Fixture::new();
    fx.shader("gain.slang", &gain_shader());
    let handle = fx.load("shaders = 1\nshader0 = gain.slang\nparameters = \"GAIN\"\nGAIN = 1.5\n");

    assert_eq!(fx.runtime.parameters(handle).unwrap().value("GAIN"), Some(1.5));
    fx.render(handle).unwrap();
    let draws = fx.backend().take_draws();
    assert_eq!(draws[0].uniform("GAIN"), Some(UniformValue::Float(1.5)));

    assert_eq!(fx.runtime.set_parameter(handle, "GAIN", 5.0).unwrap(), 2.0);
    fx.render(handle).unwrap();
    let draws = fx.backend().take_draws();
    assert_eq!(draws[0].uniform("GAIN"), Some(UniformValue::Float(2.0)));

    assert!(matches!(
        fx.runtime.set_parameter(handle, "NOPE", 1.0),
        Err(RuntimeError::Parameter(ParameterError::Unknown(name))) if name == "NOPE"
    ));
    assert!(matches!(
        fx.runtime.set_parameter(handle, "GAIN", f32::NAN),
        Err(RuntimeError::Parameter(ParameterError::NotFinite { .. }))
    ));
}

#[test]
fn builtin_uniforms_follow_pass_sizes_and_frame_count_mod() {
    let mut fx = Fixture::new();
    fx.shader("a.slang", &copy_shader(&[]));
    let handle = fx.load(
        "shaders = 2\nshader0 = a.slang\nshader1 = a.slang\nscale_type0 = source\nscale0 = 0.5\nframe_count_mod0 = 2\n",
    );

    let mut counts = Vec::new();
    for _ in 0..3 {
        fx.render(handle).unwrap();
        let draws = fx.backend().take_draws();
        let first = &draws[0];
        assert_eq!(first.uniform("MVP"), Some(UniformValue::Mat4(ORTHO_MVP)));
        assert_eq!(first.uniform("SourceSize"), Some(UniformValue::Vec4(SOURCE_SIZE.to_vec4())));
        assert_eq!(first.uniform("OutputSize"), Some(UniformValue::Vec4(Size::new(32, 32).to_vec4())));
        assert_eq!(draws[1].uniform("SourceSize"), Some(UniformValue::Vec4(Size::new(32, 32).to_vec4())));
        assert_eq!(draws[1].uniform("OriginalSize"), Some(UniformValue::Vec4(SOURCE_SIZE.to_vec4())));
        assert_eq!(draws[1].uniform("FinalViewportSize"), Some(UniformValue::Vec4(VIEWPORT.to_vec4())));
        counts.push(first.uniform("FrameCount"));
    }
    let expected = [0.0, 1.0, 0.0].map(|count| Some(UniformValue::Float(count)));
    assert_eq!(counts, expected);
}

#[test]
fn unresolved_texture_falls_back_to_the_last_good_output() {
    let mut fx = Fixture::new();
    fx.shader("invert.slang", &invert_shader());
    fx.shader("needs.slang", &copy_shader(&["Missing"]));
    let handle = fx.load("shaders = 2\nshader0 = invert.slang\nshader1 = needs.slang\n");

    for _ in 0..2 {
        let output = fx.render(handle).unwrap();
        let draws = fx.backend().take_draws();
        let produced = draws[0].destination.unwrap();
        assert_eq!(
            output,
            FrameOutput::Fallback {
                texture: produced,
                failed_pass: 1
            }
        );
        assert_eq!(fx.backend().screen, Some((CYAN, VIEWPORT)));
    }
}

#[test]
fn unresolved_texture_in_the_first_pass_presents_the_raw_source() {
    let mut fx = Fixture::new();
    fx.shader("needs.slang", &copy_shader(&["Missing"]));
    let handle = fx.load("shaders = 1\nshader0 = needs.slang\n");

    let output = fx.render(handle).unwrap();
    assert_eq!(output, FrameOutput::Passthrough { failed_pass: 0 });
    assert_eq!(fx.backend().screen, Some((RED, VIEWPORT)));
}

#[test]
fn lookup_textures_are_uploaded_and_bound_by_name() {
    let mut fx = Fixture::new();
    RgbaImage::from_pixel(4, 4, Pixel(BLUE))
        .save(fx.path().join("bezel.png"))
        .unwrap();
    fx.shader("bezel.slang", &copy_shader(&["Bezel"]));
    let handle = fx.load("shaders = 1\nshader0 = bezel.slang\ntextures = Bezel\nBezel = bezel.png\n");

    fx.render(handle).unwrap();
    let draws = fx.backend().take_draws();
    let bezel = draws[0].texture("Bezel").unwrap();
    assert_eq!(fx.backend().color(bezel), Some(BLUE));

    fx.runtime.dispose(handle).unwrap();
    assert_eq!(fx.backend().textures_deleted, 1);
}

#[test]
fn feedback_on_the_final_pass_renders_offscreen_then_presents() {
    let mut fx = Fixture::new();
    fx.shader("trail.slang", &copy_shader(&["PassFeedback0"]));
    let handle = fx.load("shaders = 1\nshader0 = trail.slang\n");

    fx.render(handle).unwrap();
    let draws = fx.backend().take_draws();
    assert_eq!(draws.len(), 2);
    assert!(draws[0].destination.is_some());
    assert_eq!(draws[1].destination, None);
    assert_eq!(draws[1].texture("Source"), draws[0].destination);
    assert_eq!(fx.backend().screen, Some((RED, VIEWPORT)));
}

#[test]
fn dispose_releases_programs_once_no_pipeline_uses_them() {
    let mut fx = Fixture::new();
    fx.shader("a.slang", &copy_shader(&[]));
    let first = fx.load("shaders = 2\nshader0 = a.slang\nshader1 = a.slang\n");
    let second = fx.runtime.load_preset(fx.path().join("chain.slangp")).unwrap();
    // The pass program and the passthrough program, shared by both pipelines.
    assert_eq!(fx.backend().live_programs(), 2);
    assert_eq!(fx.backend().compiles, 2);

    fx.render(first).unwrap();
    fx.runtime.dispose(first).unwrap();
    assert_eq!(fx.backend().live_programs(), 2);
    let backend = fx.backend();
    assert_eq!(backend.targets_deleted, backend.targets_created);
    assert!(matches!(fx.render(first), Err(RuntimeError::UnknownHandle)));
    assert!(matches!(fx.runtime.dispose(first), Err(RuntimeError::UnknownHandle)));

    fx.render(second).unwrap();
    fx.runtime.dispose(second).unwrap();
    assert_eq!(fx.backend().live_programs(), 0);
    assert!(fx.runtime.cache().is_empty());
}

#[test]
fn lost_context_invalidates_until_reload() {
    let mut fx = Fixture::new();
    fx.shader("a.slang", &copy_shader(&[]));
    let handle = fx.load("shaders = 1\nshader0 = a.slang\n");

    fx.backend().lose_context_at = Some(0);
    assert!(matches!(
        fx.render(handle),
        Err(RuntimeError::Resource(ResourceError::ContextLost))
    ));
    fx.backend().lose_context_at = None;
    assert!(matches!(fx.render(handle), Err(RuntimeError::Invalidated)));

    fx.runtime.reload(handle).unwrap();
    assert_eq!(fx.render(handle).unwrap(), FrameOutput::Screen { size: VIEWPORT });
}

#[test]
fn reload_keeps_parameter_values_and_bumps_the_generation() {
    let mut fx = Fixture::new();
    fx.shader("gain.slang", &gain_shader());
    let handle = fx.load("shaders = 1\nshader0 = gain.slang\n");
    fx.runtime.set_parameter(handle, "GAIN", 0.25).unwrap();

    let token = fx.runtime.invalidation_token();
    let before = token.current();
    fx.runtime.reload(handle).unwrap();
    assert!(token.current() > before);
    assert_eq!(fx.runtime.parameters(handle).unwrap().value("GAIN"), Some(0.25));
    assert_eq!(fx.runtime.pipeline(handle).unwrap().frame_count(), 0);
}

#[test]
fn reload_drops_values_of_parameters_the_shader_no_longer_declares() {
    let mut fx = Fixture::new();
    fx.shader("gain.slang", &gain_shader());
    let handle = fx.load("shaders = 1\nshader0 = gain.slang\n");
    fx.runtime.set_parameter(handle, "GAIN", 1.5).unwrap();

    fx.shader("gain.slang", &copy_shader(&[]));
    fx.runtime.reload(handle).unwrap();

    let parameters = fx.runtime.parameters(handle).unwrap();
    assert!(parameters.get("GAIN").is_none());
    assert!(matches!(
        fx.runtime.set_parameter(handle, "GAIN", 1.0),
        Err(RuntimeError::Parameter(ParameterError::Unknown(_)))
    ));
    assert_eq!(fx.render(handle).unwrap(), FrameOutput::Screen { size: VIEWPORT });
}

#[test]
fn missing_shader_fails_the_load() {
    let mut fx = Fixture::new();
    let path = fx.preset("shaders = 1\nshader0 = nowhere.slang\n");
    let err = fx.runtime.load_preset(&path).unwrap_err();
    assert!(matches!(err, renderer::LoadError::Preset(_)));
    assert_eq!(fx.backend().live_programs(), 0);
}
