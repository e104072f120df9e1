//! Source-to-source translation of slang pass shaders into GLSL ES.
//!
//! A pass source is Vulkan-flavoured GLSL 4.50 with both stages in one file,
//! separated by `#pragma stage` markers. [`transpile`] runs it through a fixed
//! pipeline:
//!
//! 1. `#include` expansion through a pipeline-wide [`IncludePool`]
//! 2. metadata pragma extraction
//! 3. redundant self-initializer elision
//! 4. parameter-block flattening
//! 5. function and struct deduplication
//! 6. the dialect rule battery ([`rules::RuleBattery`])
//! 7. the vertex/fragment split
//! 8. builtin uniform injection
//!
//! Every step works on a lossless token stream, so code no step touches is
//! emitted byte for byte.
pub mod builtins;
pub mod dedup;
pub mod dialect;
pub mod elide;
pub mod error;
pub mod flatten;
pub mod include;
pub mod lexer;
pub mod manifest;
pub mod pragmas;
pub mod rules;
pub mod stage;
pub mod syntax;
pub mod unit;

pub use dialect::{Dialect, TranspileOptions};
pub use error::TranspileError;
pub use include::{FsProvider, IncludePool, IncludeProvider, MemoryProvider};
pub use manifest::{
    BuiltinSemantic, Manifest, SamplerEntry, TextureSemantic, UniformEntry, UniformSemantic,
    UniformType,
};
pub use pragmas::{FormatPragma, ParameterPragma};
pub use rules::{RuleOutcome, RuleReport};
pub use syntax::{Signature, Stage};
pub use unit::{transpile, transpile_file, ShaderUnit};
