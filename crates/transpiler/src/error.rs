use std::path::PathBuf;

use thiserror::Error;

use crate::include::MAX_INCLUDE_DEPTH;
use crate::syntax::Stage;

/// A pass that cannot be transpiled; the renderer substitutes a passthrough.
#[derive(Debug, Error)]
pub enum TranspileError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("include cycle through {}", .0.display())]
    IncludeCycle(PathBuf),
    #[error("includes nest deeper than {} levels", MAX_INCLUDE_DEPTH)]
    IncludeDepth,
    #[error("malformed include directive `{0}`")]
    MalformedInclude(String),
    #[error("malformed stage pragma `{0}`")]
    MalformedStage(String),
    #[error("{0} stage is declared more than once")]
    DuplicateStage(Stage),
    #[error("source has no `#pragma stage {0}` section")]
    MissingStage(Stage),
    #[error("{0} stage has no `main` entry point")]
    MissingEntryPoint(Stage),
}
