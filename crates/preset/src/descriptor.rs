//! Structured form of a parsed preset, consumed by the transpiler front-end
//! and the pass executor.
//!
//! Types:
//!
//! - `PipelineDescriptor` owns the ordered pass list, lookup textures, the
//!   parameter table, preset overrides, and the alias registry.
//! - `PassDescriptor` stores one pass's shader path, alias, scale rule,
//!   sampling state, framebuffer format hints, and feedback settings.
//! - `ScaleRule`/`AxisScale` encode `scale_type*`/`scale*` and resolve target
//!   dimensions against the current source and viewport sizes.
//! - `AliasRegistry` maps symbolic names to pass indices and rejects
//!   duplicates.
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::parameters::ParameterTable;

/// Texture names the executor binds itself; aliases may not shadow them.
pub const RESERVED_TEXTURE_NAMES: [&str; 2] = ["Original", "Source"];

/// Prefixes of indexed texture names owned by the executor.
pub const RESERVED_TEXTURE_PREFIXES: [&str; 3] = ["OriginalHistory", "PassOutput", "PassFeedback"];

/// Width/height pair in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Packs the size the way shaders expect it: `(w, h, 1/w, 1/h)`.
    pub fn to_vec4(self) -> [f32; 4] {
        let width = self.width.max(1) as f32;
        let height = self.height.max(1) as f32;
        [width, height, 1.0 / width, 1.0 / height]
    }

    pub fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Scale rule for a single axis of a pass's render target.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum AxisScale {
    /// Multiplier relative to the pass's input (previous output or source frame).
    Source(f32),
    /// Multiplier relative to the final viewport.
    Viewport(f32),
    /// Fixed size in pixels.
    Absolute(u32),
}

impl AxisScale {
    fn resolve(self, source: u32, viewport: u32) -> u32 {
        let value = match self {
            AxisScale::Source(factor) => (source as f32 * factor).round(),
            AxisScale::Viewport(factor) => (viewport as f32 * factor).round(),
            AxisScale::Absolute(pixels) => pixels as f32,
        };
        (value as u32).max(1)
    }
}

/// Per-axis scale rule for a pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScaleRule {
    pub x: AxisScale,
    pub y: AxisScale,
}

impl ScaleRule {
    pub const fn uniform(axis: AxisScale) -> Self {
        Self { x: axis, y: axis }
    }

    /// Default for intermediate passes: same size as the input.
    pub const fn source() -> Self {
        Self::uniform(AxisScale::Source(1.0))
    }

    /// Default for the final pass: fill the viewport.
    pub const fn viewport() -> Self {
        Self::uniform(AxisScale::Viewport(1.0))
    }

    /// Resolves the target dimensions for the given input and viewport sizes.
    ///
    /// Every axis is clamped to at least one pixel.
    pub fn resolve(&self, source: Size, viewport: Size) -> Size {
        Size {
            width: self.x.resolve(source.width, viewport.width),
            height: self.y.resolve(source.height, viewport.height),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    #[default]
    Nearest,
    Linear,
}

impl FilterMode {
    pub fn from_linear_flag(linear: bool) -> Self {
        if linear {
            FilterMode::Linear
        } else {
            FilterMode::Nearest
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WrapMode {
    #[default]
    ClampToBorder,
    ClampToEdge,
    Repeat,
    MirroredRepeat,
}

impl WrapMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "clamp_to_border" => Some(WrapMode::ClampToBorder),
            "clamp_to_edge" => Some(WrapMode::ClampToEdge),
            "repeat" => Some(WrapMode::Repeat),
            "mirrored_repeat" => Some(WrapMode::MirroredRepeat),
            _ => None,
        }
    }
}

/// Sampling state applied when a texture is bound as a pass input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Sampling {
    pub filter: FilterMode,
    pub wrap: WrapMode,
    pub mipmap: bool,
}

/// Storage format hint for a pass's render target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FramebufferFormat {
    #[default]
    Rgba8,
    Rgba8Srgb,
    Rgba16Float,
    Rgba32Float,
}

/// One shader invocation in the chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassDescriptor {
    pub index: usize,
    /// Shader source path, already resolved against the preset directory.
    pub shader: PathBuf,
    pub alias: Option<String>,
    pub scale: ScaleRule,
    /// Whether the preset spelled out a scale rule (shader pragmas never override it).
    pub scale_explicit: bool,
    /// Sampling applied to this pass's input textures.
    pub sampling: Sampling,
    /// `None` lets the shader's `#pragma format` decide.
    pub format: Option<FramebufferFormat>,
    /// Wraps `FrameCount` when non-zero.
    pub frame_count_mod: u32,
    pub feedback: bool,
    /// How many prior frames of this pass's output must stay addressable.
    pub feedback_depth: u32,
}

impl PassDescriptor {
    pub fn new(index: usize, shader: PathBuf) -> Self {
        Self {
            index,
            shader,
            alias: None,
            scale: ScaleRule::source(),
            scale_explicit: false,
            sampling: Sampling::default(),
            format: None,
            frame_count_mod: 0,
            feedback: false,
            feedback_depth: 1,
        }
    }
}

/// A lookup texture (bezel art, masks, LUTs) declared by `textures = "…"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LutDescriptor {
    pub name: String,
    pub path: PathBuf,
    pub sampling: Sampling,
}

/// Maps alias names to the pass whose output they denote.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AliasRegistry {
    entries: BTreeMap<String, usize>,
}

impl AliasRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `alias` for pass `index`, returning the owning pass if the
    /// name is already taken.
    pub fn register(&mut self, alias: &str, index: usize) -> Result<(), usize> {
        if let Some(existing) = self.entries.get(alias) {
            return Err(*existing);
        }
        self.entries.insert(alias.to_string(), index);
        Ok(())
    }

    pub fn resolve(&self, alias: &str) -> Option<usize> {
        self.entries.get(alias).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.entries.iter().map(|(name, index)| (name.as_str(), *index))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Returns true when `name` is a texture name the executor binds itself.
pub fn is_reserved_texture_name(name: &str) -> bool {
    if RESERVED_TEXTURE_NAMES.contains(&name) {
        return true;
    }
    RESERVED_TEXTURE_PREFIXES.iter().any(|prefix| {
        name.strip_prefix(prefix)
            .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
    })
}

/// Parsed preset: ordered passes plus everything they share.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDescriptor {
    /// Directory of the top-level preset file.
    pub base_dir: PathBuf,
    pub passes: Vec<PassDescriptor>,
    pub textures: Vec<LutDescriptor>,
    /// Filled in from shader pragmas once passes are transpiled.
    pub parameters: ParameterTable,
    /// Values from the preset's `parameters = "…"` section.
    pub overrides: BTreeMap<String, f32>,
    pub aliases: AliasRegistry,
}

impl PipelineDescriptor {
    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    pub fn texture(&self, name: &str) -> Option<&LutDescriptor> {
        self.textures.iter().find(|texture| texture.name == name)
    }
}
