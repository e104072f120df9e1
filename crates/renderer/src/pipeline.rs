//! Pipeline construction and the per-frame pass executor.
//!
//! A frame walks the passes in declared order:
//!
//! ```text
//!   generation check ─▶ size/target ─▶ samplers ─▶ uniforms ─▶ draw
//!          │                              │
//!          └─▶ Aborted                    └─▶ unresolved: fall back
//! ```
//!
//! After the last pass the feedback rings and original history rotate. A
//! frame that fails part way leaves every ring where it was, so the next
//! frame starts from the same state.
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use preset::{
    is_reserved_texture_name, FilterMode, FramebufferFormat, ParameterTable, ParameterValue,
    PassDescriptor, PipelineDescriptor, Sampling, Size,
};
use tracing::{debug, info, warn};
use transpiler::{
    transpile_file, BuiltinSemantic, FormatPragma, IncludePool, Manifest, ParameterPragma, ShaderUnit,
    TextureSemantic, TranspileError, TranspileOptions, UniformSemantic, UniformType,
};

use crate::backend::{Destination, DrawCall, GpuBackend, TextureBinding, UniformValue, ORTHO_MVP};
use crate::cache::{ProgramCache, ProgramKey};
use crate::error::{CompileError, LoadError, ResourceError};
use crate::lut;
use crate::options::RuntimeOptions;
use crate::passthrough;
use crate::runtime::InvalidationToken;
use crate::targets::TargetRing;

/// The host's frame for this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceFrame<T> {
    pub texture: T,
    pub size: Size,
    /// Output rotation in quarter turns, 0..3.
    pub rotation: u32,
}

impl<T> SourceFrame<T> {
    pub fn new(texture: T, size: Size) -> Self {
        Self {
            texture,
            size,
            rotation: 0,
        }
    }
}

/// What reached the screen this frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutput<T> {
    /// Every pass ran; the final pass covered the viewport.
    Screen { size: Size },
    /// `failed_pass` could not run; the last texture produced before it was presented.
    Fallback { texture: T, failed_pass: usize },
    /// The first pass could not run; the raw source was presented.
    Passthrough { failed_pass: usize },
    /// The pipeline generation changed before `pass` started.
    Aborted { pass: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassStatus {
    Ready,
    /// Transpile or compile failed at load; the pass copies its input.
    Degraded { reason: String },
}

impl PassStatus {
    pub fn is_degraded(&self) -> bool {
        matches!(self, PassStatus::Degraded { .. })
    }
}

/// Load-time summary of one pass, for hosts and tooling.
#[derive(Debug, Clone, PartialEq)]
pub struct PassInfo {
    pub index: usize,
    pub shader: PathBuf,
    pub alias: Option<String>,
    pub status: PassStatus,
    pub feedback: bool,
    pub format: FramebufferFormat,
    /// Allocated target size, once a frame has run.
    pub size: Option<Size>,
}

#[derive(Debug)]
enum PassFailure {
    Transpile(TranspileError),
    Compile(CompileError),
}

impl fmt::Display for PassFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PassFailure::Transpile(err) => write!(f, "transpile failed: {err}"),
            PassFailure::Compile(err) => write!(f, "compile failed: {err}"),
        }
    }
}

struct PassState<B: GpuBackend> {
    descriptor: PassDescriptor,
    alias: Option<String>,
    format: FramebufferFormat,
    program: B::Program,
    key: ProgramKey,
    manifest: Manifest,
    status: PassStatus,
    /// `None` when the pass draws straight to the screen.
    ring: Option<TargetRing<B::Target>>,
}

struct LutTexture<T> {
    name: String,
    texture: T,
    size: Size,
    sampling: Sampling,
}

/// A texture produced or consumed during a frame.
#[derive(Debug, Clone, Copy)]
struct Output<T> {
    texture: T,
    size: Size,
}

/// Per-draw inputs shared by sampler and uniform resolution.
struct PassContext<'a, T> {
    index: usize,
    source: &'a SourceFrame<T>,
    input: Output<T>,
    output_size: Size,
    viewport: Size,
    frame_count_mod: u32,
    sampling: Sampling,
    outputs: &'a [Option<Output<T>>],
}

struct Passthrough<P> {
    unit: ShaderUnit,
    manifest: Manifest,
    program: P,
    key: ProgramKey,
}

/// One loaded preset with every GPU resource it owns.
pub struct Pipeline<B: GpuBackend> {
    path: PathBuf,
    descriptor: PipelineDescriptor,
    passes: Vec<PassState<B>>,
    luts: Vec<LutTexture<B::Texture>>,
    history: Option<TargetRing<B::Target>>,
    passthrough: Passthrough<B::Program>,
    frame_count: u64,
    invalidated: bool,
    log_once: bool,
    reported: HashSet<(usize, String)>,
}

fn present_sampling() -> Sampling {
    Sampling {
        filter: FilterMode::Linear,
        ..Sampling::default()
    }
}

fn format_from_pragma(format: FormatPragma) -> FramebufferFormat {
    match format {
        FormatPragma::Rgba8Unorm => FramebufferFormat::Rgba8,
        FormatPragma::Rgba8Srgb => FramebufferFormat::Rgba8Srgb,
        FormatPragma::Rgba16Float => FramebufferFormat::Rgba16Float,
        FormatPragma::Rgba32Float => FramebufferFormat::Rgba32Float,
    }
}

/// Adds pragma-declared parameters to `table`; the first declaration of a
/// name wins.
pub fn declare_parameters(table: &mut ParameterTable, declared: &[ParameterPragma]) {
    for pragma in declared {
        let mut value = ParameterValue::new(pragma.name.clone(), pragma.default, pragma.min, pragma.max);
        value.label = pragma.label.clone();
        value.step = pragma.step;
        table.declare(value);
    }
}

fn scalar(ty: &UniformType, value: f32) -> UniformValue {
    match ty {
        UniformType::Int => UniformValue::Int(value as i32),
        _ => UniformValue::Float(value),
    }
}

impl<B: GpuBackend> Pipeline<B> {
    /// Transpiles and compiles every pass, loads lookup textures, and
    /// resolves parameters. A pass that fails to transpile or compile is
    /// degraded to the passthrough program; anything else that fails
    /// releases what was built and returns the error.
    pub(crate) fn build(
        backend: &mut B,
        cache: &mut ProgramCache<B::Program>,
        descriptor: PipelineDescriptor,
        path: &Path,
        options: &RuntimeOptions,
    ) -> Result<Self, LoadError> {
        let transpile_options = options.transpile_options();
        let mut pool = IncludePool::filesystem();
        let unit = passthrough::unit(&mut pool, &transpile_options).map_err(LoadError::Passthrough)?;
        let (key, program) = cache
            .compile(backend, &unit.vertex, &unit.fragment)
            .map_err(LoadError::PassthroughProgram)?;

        let mut pipeline = Pipeline {
            path: path.to_path_buf(),
            descriptor,
            passes: Vec::new(),
            luts: Vec::new(),
            history: None,
            passthrough: Passthrough {
                manifest: unit.manifest(),
                unit,
                program,
                key,
            },
            frame_count: 0,
            invalidated: false,
            log_once: options.log_once,
            reported: HashSet::new(),
        };
        match pipeline.populate(backend, cache, &mut pool, &transpile_options, options) {
            Ok(()) => {
                info!(
                    preset = %pipeline.path.display(),
                    passes = pipeline.passes.len(),
                    degraded = pipeline.passes.iter().filter(|p| p.status.is_degraded()).count(),
                    parameters = pipeline.descriptor.parameters.len(),
                    luts = pipeline.luts.len(),
                    "pipeline ready"
                );
                Ok(pipeline)
            }
            Err(err) => {
                pipeline.destroy(backend, cache);
                Err(err)
            }
        }
    }

    fn populate(
        &mut self,
        backend: &mut B,
        cache: &mut ProgramCache<B::Program>,
        pool: &mut IncludePool,
        transpile_options: &TranspileOptions,
        options: &RuntimeOptions,
    ) -> Result<(), LoadError> {
        let mut parameters = ParameterTable::new();
        for pass in self.descriptor.passes.clone() {
            let compiled = compile_pass(backend, cache, pool, &pass, transpile_options);
            let (unit, key, program, status) = match compiled {
                Ok((unit, key, program)) => (unit, key, program, PassStatus::Ready),
                Err(failure) => {
                    warn!(
                        pass = pass.index,
                        shader = %pass.shader.display(),
                        error = %failure,
                        "pass degraded to passthrough"
                    );
                    let fallback = &self.passthrough.unit;
                    let (key, program) = cache
                        .compile(backend, &fallback.vertex, &fallback.fragment)
                        .map_err(LoadError::PassthroughProgram)?;
                    let reason = failure.to_string();
                    (fallback.clone(), key, program, PassStatus::Degraded { reason })
                }
            };

            declare_parameters(&mut parameters, &unit.parameters);

            let alias = match (&pass.alias, &unit.name) {
                (Some(alias), _) => Some(alias.clone()),
                (None, Some(name)) if !status.is_degraded() => self.register_pragma_alias(name, pass.index),
                _ => None,
            };
            let format = pass
                .format
                .or_else(|| unit.format.map(format_from_pragma))
                .unwrap_or_default();

            self.passes.push(PassState {
                alias,
                format,
                program,
                key,
                manifest: unit.manifest(),
                status,
                ring: None,
                descriptor: pass,
            });
        }

        for (name, value) in &self.descriptor.overrides {
            if !parameters.apply_override(name, *value) {
                debug!(parameter = %name, "override names no declared parameter");
            }
        }
        self.descriptor.parameters = parameters;

        self.enable_feedback();
        self.allocate_rings(options);
        self.load_luts(backend)?;
        Ok(())
    }

    fn register_pragma_alias(&mut self, name: &str, index: usize) -> Option<String> {
        if is_reserved_texture_name(name) || self.descriptor.texture(name).is_some() {
            warn!(pass = index, alias = %name, "`#pragma name` collides with a reserved texture; ignored");
            return None;
        }
        match self.descriptor.aliases.register(name, index) {
            Ok(()) => Some(name.to_string()),
            Err(owner) => {
                warn!(pass = index, alias = %name, owner, "`#pragma name` already bound; ignored");
                None
            }
        }
    }

    /// Turns on feedback for every pass some sampler reads a previous frame of.
    fn enable_feedback(&mut self) {
        let mut wanted = Vec::new();
        for pass in &self.passes {
            for sampler in &pass.manifest.samplers {
                match &sampler.semantic {
                    TextureSemantic::PassFeedback(index) => wanted.push(*index as usize),
                    TextureSemantic::Named(name) => {
                        if let Some(index) = name
                            .strip_suffix("Feedback")
                            .and_then(|alias| self.descriptor.aliases.resolve(alias))
                        {
                            wanted.push(index);
                        }
                    }
                    _ => {}
                }
            }
        }
        for index in wanted {
            if let Some(pass) = self.passes.get_mut(index) {
                if !pass.descriptor.feedback {
                    debug!(pass = index, "feedback enabled by a sampler reference");
                    pass.descriptor.feedback = true;
                }
            }
        }
    }

    fn allocate_rings(&mut self, options: &RuntimeOptions) {
        let last = self.passes.len().saturating_sub(1);
        for (index, pass) in self.passes.iter_mut().enumerate() {
            let feedback = pass.descriptor.feedback;
            if index == last && !feedback && !options.blit_final_feedback {
                continue;
            }
            let len = if feedback {
                pass.descriptor.feedback_depth.max(1) as usize + 1
            } else {
                1
            };
            pass.ring = Some(TargetRing::new(len, pass.format));
        }

        let depth = self
            .passes
            .iter()
            .flat_map(|pass| pass.manifest.samplers.iter())
            .filter_map(|sampler| match sampler.semantic {
                TextureSemantic::OriginalHistory(n) => Some(n as usize),
                _ => None,
            })
            .max()
            .unwrap_or(0);
        if depth > 0 {
            self.history = Some(TargetRing::new(depth, FramebufferFormat::Rgba8));
        }
    }

    fn load_luts(&mut self, backend: &mut B) -> Result<(), LoadError> {
        for descriptor in &self.descriptor.textures {
            let image = lut::load(&descriptor.path).map_err(|source| LoadError::Lut {
                name: descriptor.name.clone(),
                path: descriptor.path.clone(),
                source,
            })?;
            let texture = backend.upload_texture(&image, descriptor.sampling)?;
            debug!(lut = %descriptor.name, size = %image.size, "uploaded lookup texture");
            self.luts.push(LutTexture {
                name: descriptor.name.clone(),
                texture,
                size: image.size,
                sampling: descriptor.sampling,
            });
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn descriptor(&self) -> &PipelineDescriptor {
        &self.descriptor
    }

    pub fn parameters(&self) -> &ParameterTable {
        &self.descriptor.parameters
    }

    pub(crate) fn parameters_mut(&mut self) -> &mut ParameterTable {
        &mut self.descriptor.parameters
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn is_invalidated(&self) -> bool {
        self.invalidated
    }

    pub(crate) fn invalidate(&mut self) {
        self.invalidated = true;
    }

    pub fn passes(&self) -> Vec<PassInfo> {
        self.passes
            .iter()
            .map(|pass| PassInfo {
                index: pass.descriptor.index,
                shader: pass.descriptor.shader.clone(),
                alias: pass.alias.clone(),
                status: pass.status.clone(),
                feedback: pass.descriptor.feedback,
                format: pass.format,
                size: pass.ring.as_ref().and_then(TargetRing::size),
            })
            .collect()
    }

    /// Runs every pass for one frame.
    pub(crate) fn execute(
        &mut self,
        backend: &mut B,
        source: &SourceFrame<B::Texture>,
        viewport: Size,
        token: &InvalidationToken,
    ) -> Result<FrameOutput<B::Texture>, ResourceError> {
        let generation = token.current();
        let original = Output {
            texture: source.texture,
            size: source.size,
        };
        let sizes = self.allocate_targets(backend, source.size, viewport)?;
        let mut outputs: Vec<Option<Output<B::Texture>>> = Vec::with_capacity(self.passes.len());
        let mut input = original;

        for index in 0..self.passes.len() {
            if token.current() != generation {
                debug!(pass = index, generation, "pipeline generation changed; frame aborted");
                return Ok(FrameOutput::Aborted { pass: index });
            }

            let size = sizes[index];
            let pass = &self.passes[index];
            let ctx = PassContext {
                index,
                source,
                input,
                output_size: size,
                viewport,
                frame_count_mod: pass.descriptor.frame_count_mod,
                sampling: pass.descriptor.sampling,
                outputs: &outputs,
            };
            let textures = match self.bind_textures(backend, &pass.manifest, &ctx) {
                Ok(textures) => textures,
                Err(name) => {
                    self.report(index, &name, "unresolved texture; pass skipped this frame");
                    return self.fall_back(backend, index, source, &outputs, viewport);
                }
            };
            let (uniforms, missing) = self.bind_uniforms(backend, &pass.manifest, &ctx);

            let pass = &self.passes[index];
            let destination = match pass.ring.as_ref() {
                Some(ring) => match ring.current() {
                    Some(target) => Destination::Target(target),
                    None => return Err(ResourceError::Backend(format!("pass {index} has no render target"))),
                },
                None => Destination::Screen,
            };
            backend.draw(&DrawCall {
                program: pass.program,
                destination,
                viewport: size,
                uniforms: &uniforms,
                textures: &textures,
            })?;
            let output = pass
                .ring
                .as_ref()
                .and_then(TargetRing::current)
                .map(|target| Output {
                    texture: backend.target_texture(target),
                    size,
                });

            for name in missing {
                self.report(index, &name, "unresolved uniform left unbound");
            }
            outputs.push(output);
            if let Some(output) = output {
                input = output;
            }
        }

        if self.passes.last().is_some_and(|pass| pass.ring.is_some()) {
            self.present(backend, input, source, &outputs, viewport)?;
        }
        self.finish_frame(backend, source, &outputs)?;
        Ok(FrameOutput::Screen { size: viewport })
    }

    /// Resolves every pass's target size for this frame and allocates all
    /// rings up front. A pass may sample the feedback of a later pass, or
    /// the original history, before that ring would otherwise be touched.
    fn allocate_targets(
        &mut self,
        backend: &mut B,
        source: Size,
        viewport: Size,
    ) -> Result<Vec<Size>, ResourceError> {
        let mut input = source;
        let mut sizes = Vec::with_capacity(self.passes.len());
        for pass in &mut self.passes {
            match pass.ring.as_mut() {
                Some(ring) => {
                    let size = pass.descriptor.scale.resolve(input, viewport);
                    ring.ensure(backend, size)?;
                    input = size;
                    sizes.push(size);
                }
                None => sizes.push(viewport),
            }
        }
        if let Some(history) = self.history.as_mut() {
            history.ensure(backend, source)?;
        }
        Ok(sizes)
    }

    fn fall_back(
        &mut self,
        backend: &mut B,
        failed_pass: usize,
        source: &SourceFrame<B::Texture>,
        outputs: &[Option<Output<B::Texture>>],
        viewport: Size,
    ) -> Result<FrameOutput<B::Texture>, ResourceError> {
        self.frame_count += 1;
        match outputs.iter().rev().find_map(|output| *output) {
            Some(last) => {
                self.present(backend, last, source, outputs, viewport)?;
                Ok(FrameOutput::Fallback {
                    texture: last.texture,
                    failed_pass,
                })
            }
            None => {
                let raw = Output {
                    texture: source.texture,
                    size: source.size,
                };
                self.present(backend, raw, source, outputs, viewport)?;
                Ok(FrameOutput::Passthrough { failed_pass })
            }
        }
    }

    /// Copies `texture` to the screen through the passthrough program.
    fn present(
        &self,
        backend: &mut B,
        texture: Output<B::Texture>,
        source: &SourceFrame<B::Texture>,
        outputs: &[Option<Output<B::Texture>>],
        viewport: Size,
    ) -> Result<(), ResourceError> {
        self.copy(backend, texture, Destination::Screen, viewport, source, outputs)
    }

    fn copy(
        &self,
        backend: &mut B,
        texture: Output<B::Texture>,
        destination: Destination<'_, B::Target>,
        size: Size,
        source: &SourceFrame<B::Texture>,
        outputs: &[Option<Output<B::Texture>>],
    ) -> Result<(), ResourceError> {
        let ctx = PassContext {
            index: self.passes.len(),
            source,
            input: texture,
            output_size: size,
            viewport: size,
            frame_count_mod: 0,
            sampling: present_sampling(),
            outputs,
        };
        let textures = vec![TextureBinding {
            name: "Source".to_string(),
            texture: texture.texture,
            sampling: ctx.sampling,
        }];
        let (uniforms, _) = self.bind_uniforms(backend, &self.passthrough.manifest, &ctx);
        backend.draw(&DrawCall {
            program: self.passthrough.program,
            destination,
            viewport: size,
            uniforms: &uniforms,
            textures: &textures,
        })
    }

    fn finish_frame(
        &mut self,
        backend: &mut B,
        source: &SourceFrame<B::Texture>,
        outputs: &[Option<Output<B::Texture>>],
    ) -> Result<(), ResourceError> {
        if let Some(target) = self.history.as_ref().and_then(TargetRing::current) {
            let original = Output {
                texture: source.texture,
                size: source.size,
            };
            self.copy(backend, original, Destination::Target(target), source.size, source, outputs)?;
        }
        if let Some(history) = self.history.as_mut() {
            history.advance();
        }
        for pass in &mut self.passes {
            if let Some(ring) = pass.ring.as_mut() {
                ring.advance();
            }
        }
        self.frame_count += 1;
        Ok(())
    }

    fn bind_textures(
        &self,
        backend: &B,
        manifest: &Manifest,
        ctx: &PassContext<'_, B::Texture>,
    ) -> Result<Vec<TextureBinding<B::Texture>>, String> {
        manifest
            .samplers
            .iter()
            .map(|sampler| {
                let (output, sampling) = self
                    .resolve_texture(backend, &sampler.semantic, ctx)
                    .ok_or_else(|| sampler.name.clone())?;
                Ok(TextureBinding {
                    name: sampler.name.clone(),
                    texture: output.texture,
                    sampling,
                })
            })
            .collect()
    }

    fn bind_uniforms(
        &self,
        backend: &B,
        manifest: &Manifest,
        ctx: &PassContext<'_, B::Texture>,
    ) -> (Vec<(String, UniformValue)>, Vec<String>) {
        let mut values = Vec::with_capacity(manifest.uniforms.len());
        let mut missing = Vec::new();
        for entry in &manifest.uniforms {
            let value = match &entry.semantic {
                UniformSemantic::Builtin { builtin } => Some(self.builtin_value(*builtin, &entry.ty, ctx)),
                UniformSemantic::Parameter { name } => {
                    self.descriptor.parameters.value(name).map(|value| scalar(&entry.ty, value))
                }
                UniformSemantic::TextureSize { texture } => self
                    .resolve_texture(backend, texture, ctx)
                    .map(|(output, _)| UniformValue::Vec4(output.size.to_vec4())),
                UniformSemantic::Unknown => None,
            };
            match value {
                Some(value) => values.push((entry.name.clone(), value)),
                None => missing.push(entry.name.clone()),
            }
        }
        (values, missing)
    }

    fn builtin_value(
        &self,
        builtin: BuiltinSemantic,
        ty: &UniformType,
        ctx: &PassContext<'_, B::Texture>,
    ) -> UniformValue {
        match builtin {
            BuiltinSemantic::Mvp => UniformValue::Mat4(ORTHO_MVP),
            BuiltinSemantic::SourceSize => UniformValue::Vec4(ctx.input.size.to_vec4()),
            BuiltinSemantic::OriginalSize => UniformValue::Vec4(ctx.source.size.to_vec4()),
            BuiltinSemantic::OutputSize => UniformValue::Vec4(ctx.output_size.to_vec4()),
            BuiltinSemantic::FinalViewportSize => UniformValue::Vec4(ctx.viewport.to_vec4()),
            BuiltinSemantic::FrameCount => {
                let count = match ctx.frame_count_mod {
                    0 => self.frame_count,
                    modulus => self.frame_count % u64::from(modulus),
                };
                scalar(ty, count as f32)
            }
            BuiltinSemantic::FrameDirection => scalar(ty, 1.0),
            BuiltinSemantic::Rotation => scalar(ty, (ctx.source.rotation % 4) as f32),
        }
    }

    /// Finds the texture a sampler name denotes for the pass in `ctx`, with
    /// the sampling state it should be read with.
    fn resolve_texture(
        &self,
        backend: &B,
        semantic: &TextureSemantic,
        ctx: &PassContext<'_, B::Texture>,
    ) -> Option<(Output<B::Texture>, Sampling)> {
        let original = Output {
            texture: ctx.source.texture,
            size: ctx.source.size,
        };
        let output = match semantic {
            TextureSemantic::Original | TextureSemantic::OriginalHistory(0) => original,
            TextureSemantic::Source => ctx.input,
            TextureSemantic::OriginalHistory(age) => {
                let history = self.history.as_ref()?;
                Output {
                    texture: backend.target_texture(history.previous(*age as usize)?),
                    size: history.size()?,
                }
            }
            TextureSemantic::PassOutput(index) => self.pass_output(*index as usize, ctx)?,
            TextureSemantic::PassFeedback(index) => self.feedback_output(backend, *index as usize)?,
            TextureSemantic::Named(name) => {
                if let Some(index) = self.descriptor.aliases.resolve(name) {
                    self.pass_output(index, ctx)?
                } else if let Some(index) = name
                    .strip_suffix("Feedback")
                    .and_then(|alias| self.descriptor.aliases.resolve(alias))
                {
                    self.feedback_output(backend, index)?
                } else {
                    let lut = self.luts.iter().find(|lut| lut.name == *name)?;
                    let output = Output {
                        texture: lut.texture,
                        size: lut.size,
                    };
                    return Some((output, lut.sampling));
                }
            }
        };
        Some((output, ctx.sampling))
    }

    fn pass_output(&self, index: usize, ctx: &PassContext<'_, B::Texture>) -> Option<Output<B::Texture>> {
        if index >= ctx.index {
            return None;
        }
        ctx.outputs.get(index).copied().flatten()
    }

    fn feedback_output(&self, backend: &B, index: usize) -> Option<Output<B::Texture>> {
        let pass = self.passes.get(index)?;
        if !pass.descriptor.feedback {
            return None;
        }
        let ring = pass.ring.as_ref()?;
        Some(Output {
            texture: backend.target_texture(ring.previous(1)?),
            size: ring.size()?,
        })
    }

    fn report(&mut self, pass: usize, name: &str, what: &str) {
        if self.log_once && !self.reported.insert((pass, name.to_string())) {
            return;
        }
        warn!(pass, name, "{what}");
    }

    /// Releases every program reference and GPU resource the pipeline holds.
    pub(crate) fn destroy(&mut self, backend: &mut B, cache: &mut ProgramCache<B::Program>) {
        for mut pass in self.passes.drain(..) {
            cache.release(backend, pass.key);
            if let Some(ring) = pass.ring.as_mut() {
                ring.destroy(backend);
            }
        }
        cache.release(backend, self.passthrough.key);
        if let Some(history) = self.history.as_mut() {
            history.destroy(backend);
        }
        for lut in self.luts.drain(..) {
            backend.delete_texture(lut.texture);
        }
        debug!(preset = %self.path.display(), "pipeline destroyed");
    }
}

fn compile_pass<B: GpuBackend>(
    backend: &mut B,
    cache: &mut ProgramCache<B::Program>,
    pool: &mut IncludePool,
    pass: &PassDescriptor,
    options: &TranspileOptions,
) -> Result<(ShaderUnit, ProgramKey, B::Program), PassFailure> {
    let unit = transpile_file(&pass.shader, pool, options).map_err(PassFailure::Transpile)?;
    for report in &unit.rules {
        debug!(pass = pass.index, rule = report.rule, outcome = ?report.outcome, "rewrite rule");
    }
    let (key, program) = cache
        .compile(backend, &unit.vertex, &unit.fragment)
        .map_err(PassFailure::Compile)?;
    Ok((unit, key, program))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_counter_and_int_uniforms_use_the_declared_type() {
        assert_eq!(scalar(&UniformType::Int, 3.0), UniformValue::Int(3));
        assert_eq!(scalar(&UniformType::Float, 3.0), UniformValue::Float(3.0));
    }

    #[test]
    fn pragma_formats_map_to_framebuffer_formats() {
        assert_eq!(format_from_pragma(FormatPragma::Rgba16Float), FramebufferFormat::Rgba16Float);
        assert_eq!(format_from_pragma(FormatPragma::Rgba8Unorm), FramebufferFormat::Rgba8);
    }
}
