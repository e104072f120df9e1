//! `#include` resolution backed by a pipeline-wide pool.
//!
//! Types:
//!
//! - `IncludeProvider` abstracts where include files come from; the
//!   filesystem and an in-memory map are provided.
//! - `IncludePool` caches every file it has read, so a shared library
//!   included by ten passes is read and scanned once per pipeline, and keeps
//!   the pipeline-wide table of function signatures those files define.
//!
//! Each file is inlined at most once per pass, counting `#if`/`#else` arms
//! separately; `#pragma once` lines are dropped since that behaviour is the
//! default. Directives inside block comments are left as they are.
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, trace};

use crate::error::TranspileError;
use crate::syntax::{split_directive, Signature, SourceTree};

/// Deepest include chain followed before giving up.
pub const MAX_INCLUDE_DEPTH: usize = 32;

pub trait IncludeProvider {
    fn read(&self, path: &Path) -> io::Result<String>;
}

/// Reads includes from disk.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsProvider;

impl IncludeProvider for FsProvider {
    fn read(&self, path: &Path) -> io::Result<String> {
        fs::read_to_string(path)
    }
}

/// Serves includes from memory, keyed by normalised path.
#[derive(Debug, Default, Clone)]
pub struct MemoryProvider {
    files: HashMap<PathBuf, String>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl AsRef<Path>, text: impl Into<String>) -> &mut Self {
        self.files.insert(normalize(path.as_ref()), text.into());
        self
    }
}

impl IncludeProvider for MemoryProvider {
    fn read(&self, path: &Path) -> io::Result<String> {
        self.files.get(&normalize(path)).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} is not in the include set", path.display()),
            )
        })
    }
}

pub struct IncludePool {
    provider: Box<dyn IncludeProvider>,
    files: HashMap<PathBuf, String>,
    symbols: BTreeMap<Signature, PathBuf>,
    reads: usize,
}

impl std::fmt::Debug for IncludePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncludePool")
            .field("files", &self.files.len())
            .field("symbols", &self.symbols.len())
            .field("reads", &self.reads)
            .finish()
    }
}

impl Default for IncludePool {
    fn default() -> Self {
        Self::filesystem()
    }
}

impl IncludePool {
    pub fn new(provider: impl IncludeProvider + 'static) -> Self {
        Self {
            provider: Box::new(provider),
            files: HashMap::new(),
            symbols: BTreeMap::new(),
            reads: 0,
        }
    }

    pub fn filesystem() -> Self {
        Self::new(FsProvider)
    }

    /// Reads a file through the pool's cache.
    pub fn read(&mut self, path: &Path) -> Result<String, TranspileError> {
        let key = normalize(path);
        if let Some(text) = self.files.get(&key) {
            return Ok(text.clone());
        }
        let text = self
            .provider
            .read(&key)
            .map_err(|source| TranspileError::Read {
                path: key.clone(),
                source,
            })?;
        self.reads += 1;
        trace!(path = %key.display(), "read shader source");
        self.files.insert(key, text.clone());
        Ok(text)
    }

    /// Inlines every `#include` reachable from `source`, which lives at
    /// `origin`.
    pub fn expand(&mut self, source: &str, origin: &Path) -> Result<String, TranspileError> {
        let mut expansion = Expansion {
            stack: vec![normalize(origin)],
            ..Expansion::default()
        };
        self.expand_into(source, origin, &mut expansion)?;
        Ok(expansion.out)
    }

    /// Function signatures defined by include files, with the first file
    /// that defined each.
    pub fn symbols(&self) -> &BTreeMap<Signature, PathBuf> {
        &self.symbols
    }

    /// Number of distinct files fetched from the provider.
    pub fn reads(&self) -> usize {
        self.reads
    }

    fn expand_into(&mut self, text: &str, origin: &Path, ex: &mut Expansion) -> Result<(), TranspileError> {
        let mut in_comment = false;
        for line in text.split_inclusive('\n') {
            let commented = in_comment;
            in_comment = block_comment_after(line, in_comment);
            let trimmed = line.trim();
            if commented || !trimmed.starts_with('#') {
                ex.out.push_str(line);
                continue;
            }
            let Some((name, rest)) = split_directive(trimmed) else {
                ex.out.push_str(line);
                continue;
            };
            match name.as_str() {
                "pragma" if rest == "once" => continue,
                "include" => {}
                "if" | "ifdef" | "ifndef" => {
                    let branch = ex.next_branch();
                    ex.branches.push(branch);
                    ex.out.push_str(line);
                    continue;
                }
                "elif" | "else" => {
                    let branch = ex.next_branch();
                    if let Some(top) = ex.branches.last_mut() {
                        *top = branch;
                    }
                    ex.out.push_str(line);
                    continue;
                }
                "endif" => {
                    ex.branches.pop();
                    ex.out.push_str(line);
                    continue;
                }
                _ => {
                    ex.out.push_str(line);
                    continue;
                }
            }

            let target = include_target(&rest)
                .ok_or_else(|| TranspileError::MalformedInclude(trimmed.to_string()))?;
            let dir = origin.parent().unwrap_or_else(|| Path::new(""));
            let resolved = normalize(&dir.join(target));
            if ex.stack.contains(&resolved) {
                return Err(TranspileError::IncludeCycle(resolved));
            }
            if !ex.mark_inlined(&resolved) {
                trace!(include = %resolved.display(), "include already inlined in this pass");
                continue;
            }
            if ex.stack.len() > MAX_INCLUDE_DEPTH {
                return Err(TranspileError::IncludeDepth);
            }

            let first_read = !self.files.contains_key(&resolved);
            let included = self.read(&resolved)?;
            if first_read {
                self.register_symbols(&included, &resolved);
            }

            ex.stack.push(resolved.clone());
            self.expand_into(&included, &resolved, ex)?;
            ex.stack.pop();
            if !ex.out.ends_with('\n') {
                ex.out.push('\n');
            }
        }
        Ok(())
    }

    fn register_symbols(&mut self, text: &str, path: &Path) {
        let tree = SourceTree::parse(text);
        let mut added = 0;
        for (_, shape) in tree.functions() {
            if shape.body.is_none() {
                continue;
            }
            self.symbols.entry(shape.signature).or_insert_with(|| {
                added += 1;
                path.to_path_buf()
            });
        }
        debug!(include = %path.display(), functions = added, "pooled include file");
    }
}

/// State of one pass's include expansion.
#[derive(Default)]
struct Expansion {
    out: String,
    /// Files currently being expanded, outermost first.
    stack: Vec<PathBuf>,
    /// Conditional branch ids enclosing the current line.
    branches: Vec<usize>,
    branch_count: usize,
    /// Branch paths each file was inlined under.
    inlined: HashMap<PathBuf, Vec<Vec<usize>>>,
}

impl Expansion {
    fn next_branch(&mut self) -> usize {
        self.branch_count += 1;
        self.branch_count
    }

    /// Records an inclusion of `path` under the current branch path.
    /// Returns false when it is already visible here, i.e. inlined under
    /// this branch or one enclosing it. Sibling `#if`/`#else` arms each get
    /// their own copy.
    fn mark_inlined(&mut self, path: &Path) -> bool {
        let current = &self.branches;
        let paths = self.inlined.entry(path.to_path_buf()).or_default();
        if paths.iter().any(|seen| current.starts_with(seen)) {
            return false;
        }
        paths.push(current.clone());
        true
    }
}

/// Whether a `/* */` comment is still open at the end of `line`.
fn block_comment_after(line: &str, mut in_comment: bool) -> bool {
    let bytes = line.as_bytes();
    let mut in_string = false;
    let mut i = 0;
    while i < bytes.len() {
        let pair = (bytes[i], bytes.get(i + 1).copied());
        if in_comment {
            if pair == (b'*', Some(b'/')) {
                in_comment = false;
                i += 1;
            }
        } else if in_string {
            in_string = bytes[i] != b'"';
        } else {
            match pair {
                (b'"', _) => in_string = true,
                (b'/', Some(b'/')) => break,
                (b'/', Some(b'*')) => {
                    in_comment = true;
                    i += 1;
                }
                _ => {}
            }
        }
        i += 1;
    }
    in_comment
}

fn include_target(rest: &str) -> Option<&str> {
    let rest = rest.trim();
    let (open, close) = match rest.chars().next()? {
        '"' => ('"', '"'),
        '<' => ('<', '>'),
        _ => return None,
    };
    let inner = rest.strip_prefix(open)?;
    let end = inner.find(close)?;
    let target = &inner[..end];
    (!target.is_empty()).then_some(target)
}

/// Lexically normalises `.` and `..` components.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
