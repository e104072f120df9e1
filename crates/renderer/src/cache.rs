//! Compiled-program cache keyed by source content.
//!
//! Every runtime instance owns its own cache, so two pipelines built from
//! presets that share unchanged passes share one program, while separate
//! runtimes (a live view and a preview, say) never see each other's
//! entries. Entries are reference counted; nothing is deleted until the last
//! pipeline holding it releases it.
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use tracing::{debug, trace};

use crate::backend::GpuBackend;
use crate::error::CompileError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramKey(u64);

impl ProgramKey {
    pub fn of(vertex: &str, fragment: &str) -> Self {
        let mut hasher = DefaultHasher::new();
        vertex.hash(&mut hasher);
        fragment.hash(&mut hasher);
        ProgramKey(hasher.finish())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub failures: u64,
    pub deleted: u64,
}

#[derive(Debug)]
struct CacheEntry<P> {
    program: P,
    refs: usize,
}

#[derive(Debug)]
pub struct ProgramCache<P> {
    entries: HashMap<ProgramKey, CacheEntry<P>>,
    stats: CacheStats,
}

impl<P> Default for ProgramCache<P> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            stats: CacheStats::default(),
        }
    }
}

impl<P: Copy> ProgramCache<P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached program for this source pair, compiling it on a
    /// miss. Each successful call takes one reference that must be given
    /// back through [`ProgramCache::release`].
    ///
    /// Failed compiles are not cached; the next request tries again.
    pub fn compile<B>(
        &mut self,
        backend: &mut B,
        vertex: &str,
        fragment: &str,
    ) -> Result<(ProgramKey, P), CompileError>
    where
        B: GpuBackend<Program = P>,
    {
        let key = ProgramKey::of(vertex, fragment);
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.refs += 1;
            self.stats.hits += 1;
            trace!(?key, refs = entry.refs, "program cache hit");
            return Ok((key, entry.program));
        }
        self.stats.misses += 1;
        let program = match backend.compile_program(vertex, fragment) {
            Ok(program) => program,
            Err(err) => {
                self.stats.failures += 1;
                return Err(err);
            }
        };
        self.entries.insert(key, CacheEntry { program, refs: 1 });
        debug!(?key, live = self.entries.len(), "compiled program");
        Ok((key, program))
    }

    /// Drops one reference, deleting the program when none remain.
    pub fn release<B>(&mut self, backend: &mut B, key: ProgramKey)
    where
        B: GpuBackend<Program = P>,
    {
        let Some(entry) = self.entries.get_mut(&key) else {
            return;
        };
        entry.refs = entry.refs.saturating_sub(1);
        if entry.refs == 0 {
            if let Some(entry) = self.entries.remove(&key) {
                backend.delete_program(entry.program);
                self.stats.deleted += 1;
                debug!(?key, live = self.entries.len(), "deleted program");
            }
        }
    }

    /// Deletes every program regardless of outstanding references.
    pub fn clear<B>(&mut self, backend: &mut B)
    where
        B: GpuBackend<Program = P>,
    {
        for (_, entry) in self.entries.drain() {
            backend.delete_program(entry.program);
            self.stats.deleted += 1;
        }
    }

    pub fn refs(&self, key: ProgramKey) -> usize {
        self.entries.get(&key).map_or(0, |entry| entry.refs)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }
}
