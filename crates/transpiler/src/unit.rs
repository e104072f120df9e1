//! The per-pass transpilation entry point.
use std::path::Path;

use serde::Serialize;
use tracing::{debug, info_span};

use crate::builtins;
use crate::dedup;
use crate::dialect::TranspileOptions;
use crate::elide;
use crate::error::TranspileError;
use crate::flatten;
use crate::include::IncludePool;
use crate::manifest::{Manifest, SamplerEntry, UniformEntry};
use crate::pragmas::{self, FormatPragma, ParameterPragma};
use crate::rules::{RuleBattery, RuleContext, RuleReport};
use crate::stage;
use crate::syntax::{Signature, SourceTree, Stage};

/// One pass's translated program plus everything the renderer needs to
/// bind it. Immutable once built.
#[derive(Debug, Clone, Serialize)]
pub struct ShaderUnit {
    #[serde(skip)]
    pub vertex: String,
    #[serde(skip)]
    pub fragment: String,
    pub uniforms: Vec<UniformEntry>,
    pub samplers: Vec<SamplerEntry>,
    pub parameters: Vec<ParameterPragma>,
    /// Alias from `#pragma name`.
    pub name: Option<String>,
    pub format: Option<FormatPragma>,
    pub rules: Vec<RuleReport>,
    /// Shared functions left after deduplication.
    pub functions: Vec<Signature>,
    pub elided: Vec<String>,
    /// Parameters bound through a `PARAM_` uniform.
    pub dual: Vec<String>,
    #[serde(skip)]
    prelude: [usize; 2],
}

impl ShaderUnit {
    pub fn source(&self, stage: Stage) -> &str {
        match stage {
            Stage::Vertex => &self.vertex,
            Stage::Fragment => &self.fragment,
        }
    }

    /// Stage source without the injected version, precision and builtin
    /// uniform header.
    pub fn body(&self, stage: Stage) -> &str {
        let source = self.source(stage);
        let skip = self.prelude[stage_slot(stage)].min(source.len());
        &source[skip..]
    }

    pub fn manifest(&self) -> Manifest {
        Manifest {
            uniforms: self.uniforms.clone(),
            samplers: self.samplers.clone(),
        }
    }
}

fn stage_slot(stage: Stage) -> usize {
    match stage {
        Stage::Vertex => 0,
        Stage::Fragment => 1,
    }
}

/// Reads `path` through the pool and transpiles it.
pub fn transpile_file(
    path: &Path,
    pool: &mut IncludePool,
    options: &TranspileOptions,
) -> Result<ShaderUnit, TranspileError> {
    let source = pool.read(path)?;
    transpile(&source, path, pool, options)
}

/// Translates one pass source, which lives at `origin`, into the target
/// dialect.
pub fn transpile(
    source: &str,
    origin: &Path,
    pool: &mut IncludePool,
    options: &TranspileOptions,
) -> Result<ShaderUnit, TranspileError> {
    let span = info_span!("transpile", shader = %origin.display(), dialect = %options.dialect);
    let _guard = span.enter();

    let expanded = pool.expand(source, origin)?;
    let mut tree = SourceTree::parse(&expanded);
    stage::validate(&tree)?;

    let pragmas = pragmas::extract(&mut tree);
    let elided = elide::run(&mut tree);
    let flattened = flatten::run(&mut tree, &pragmas);
    let deduped = dedup::run(&mut tree, pool);
    let rules = RuleBattery::standard().run(&mut tree, &RuleContext::from(options));

    let mut manifest = Manifest::default();
    let mut sources = [String::new(), String::new()];
    let mut prelude = [0usize; 2];
    for stage in Stage::ALL {
        let split = stage::split(&tree, stage)?;
        let declared = stage::declared_names(&split);
        let header = builtins::prelude(options.dialect, stage, &declared);
        manifest.add_stage(stage, &split, &builtins::injected(&declared), &pragmas.parameters);
        let slot = stage_slot(stage);
        prelude[slot] = header.len();
        sources[slot] = header + &split.render();
    }

    debug!(
        elided = elided.elided.len(),
        dual = flattened.dual.len(),
        dropped = deduped.dropped.len(),
        uniforms = manifest.uniforms.len(),
        samplers = manifest.samplers.len(),
        "transpiled pass"
    );

    let [vertex, fragment] = sources;
    Ok(ShaderUnit {
        vertex,
        fragment,
        uniforms: manifest.uniforms,
        samplers: manifest.samplers,
        parameters: pragmas.parameters,
        name: pragmas.name,
        format: pragmas.format,
        rules,
        functions: deduped.pool,
        elided: elided.elided,
        dual: flattened.dual,
        prelude,
    })
}
