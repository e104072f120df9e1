//! Multi-pass filter runtime for CRT and bezel presets.
//!
//! The host owns the graphics context and the per-frame source texture. It
//! hands this crate a [`GpuBackend`] for its context, loads presets into a
//! [`FilterRuntime`], and calls [`FilterRuntime::render_frame`] once per
//! tick:
//!
//! ```text
//!   preset file ──▶ preset::load ──▶ PipelineDescriptor
//!                                        │ per pass
//!                                        ▼
//!                    transpiler ──▶ ShaderUnit ──▶ ProgramCache ──▶ Pipeline
//!                                                                      │
//!   host frame ──▶ render_frame ──▶ pass 0 ──▶ … ──▶ pass N-1 ──▶ screen
//! ```
//!
//! A pass that fails to transpile or compile is replaced by a passthrough
//! copy so one broken shader never blanks the output. Backend resource
//! failures invalidate the whole pipeline and the host is expected to
//! reload it.
pub mod backend;
pub mod cache;
pub mod error;
#[cfg(feature = "glow")]
pub mod gl;
pub mod lut;
pub mod options;
pub mod passthrough;
pub mod pipeline;
pub mod runtime;
pub mod targets;

pub use backend::{
    Destination, DrawCall, GpuBackend, TextureBinding, UniformValue, ORTHO_MVP, POSITION_ATTRIBUTE,
    TEXCOORD_ATTRIBUTE,
};
pub use cache::{CacheStats, ProgramCache, ProgramKey};
pub use error::{CompileError, LoadError, ResourceError, RuntimeError};
#[cfg(feature = "glow")]
pub use gl::{GlCaps, GlTarget, GlowBackend};
pub use lut::LutImage;
pub use options::RuntimeOptions;
pub use pipeline::{declare_parameters, FrameOutput, PassInfo, PassStatus, Pipeline, SourceFrame};
pub use runtime::{FilterRuntime, InvalidationToken, PipelineHandle};

pub use preset::{ParameterTable, ParameterValue, Size};
pub use transpiler::Dialect;
