use std::path::PathBuf;

use preset::{ParameterError, PresetError};
use thiserror::Error;
use transpiler::TranspileError;

/// The driver rejected a generated program.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CompileError {
    #[error("vertex shader failed to compile: {log}\n{source_listing}")]
    Vertex { log: String, source_listing: String },
    #[error("fragment shader failed to compile: {log}\n{source_listing}")]
    Fragment { log: String, source_listing: String },
    #[error("program failed to link: {log}")]
    Link { log: String },
    #[error("failed to create GL object: {0}")]
    Create(String),
}

impl CompileError {
    pub fn vertex(log: impl Into<String>, source: &str) -> Self {
        CompileError::Vertex {
            log: log.into(),
            source_listing: numbered(source),
        }
    }

    pub fn fragment(log: impl Into<String>, source: &str) -> Self {
        CompileError::Fragment {
            log: log.into(),
            source_listing: numbered(source),
        }
    }
}

/// Prefixes each line with its 1-based number, matching driver diagnostics.
pub fn numbered(source: &str) -> String {
    let width = source.lines().count().max(1).to_string().len();
    source
        .lines()
        .enumerate()
        .map(|(index, line)| format!("{:>width$} | {line}\n", index + 1))
        .collect()
}

/// The graphics context can no longer hold the pipeline's resources.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ResourceError {
    #[error("graphics context lost")]
    ContextLost,
    #[error("out of GPU memory allocating {what}")]
    OutOfMemory { what: String },
    #[error("render target {width}x{height} is incomplete: {reason}")]
    IncompleteTarget {
        width: u32,
        height: u32,
        reason: String,
    },
    #[error("backend error: {0}")]
    Backend(String),
}

/// Pipeline construction failed; nothing was kept.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Preset(#[from] PresetError),
    #[error("lookup texture `{name}` at {} could not be decoded: {source}", .path.display())]
    Lut {
        name: String,
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("passthrough shader failed to transpile: {0}")]
    Passthrough(#[source] TranspileError),
    #[error("passthrough program failed to compile: {0}")]
    PassthroughProgram(#[source] CompileError),
    #[error(transparent)]
    Resource(#[from] ResourceError),
}

/// Host API failures after a pipeline exists.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("unknown or disposed pipeline handle")]
    UnknownHandle,
    #[error(transparent)]
    Parameter(#[from] ParameterError),
    #[error("pipeline resources were lost: {0}")]
    Resource(#[from] ResourceError),
    #[error("pipeline was invalidated by an earlier resource failure; reload it")]
    Invalidated,
    #[error("reload failed: {0}")]
    Reload(#[source] Box<LoadError>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listings_are_line_numbered() {
        let listing = numbered("a\nb\n");
        assert_eq!(listing, "1 | a\n2 | b\n");
        let err = CompileError::fragment("0:2: error", "void main() {\n  x;\n}\n");
        let text = err.to_string();
        assert!(text.contains("0:2: error"));
        assert!(text.contains("2 |   x;"));
    }
}
