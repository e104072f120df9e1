//! Multi-pass shader preset parsing.
//!
//! A preset declares an ordered chain of shader passes, how each pass's
//! render target is scaled, how its inputs are sampled, which passes keep
//! feedback history, the lookup textures shared by every pass, and
//! overrides for the tunable parameters the shaders declare.
pub mod descriptor;
pub mod parameters;
pub mod parser;

pub use descriptor::{
    is_reserved_texture_name, AliasRegistry, AxisScale, FilterMode, FramebufferFormat,
    LutDescriptor, PassDescriptor, PipelineDescriptor, Sampling, ScaleRule, Size, WrapMode,
};
pub use parameters::{ParameterError, ParameterTable, ParameterValue};
pub use parser::{load, parse, PresetError, MAX_REFERENCE_DEPTH};
