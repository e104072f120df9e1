//! The host-facing runtime.
//!
//! The host owns the graphics context and hands this runtime a backend for
//! it. Pipelines are addressed through slot-map handles, so a handle that
//! outlives `dispose` is rejected instead of aliasing a newer pipeline.
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use preset::{ParameterTable, Size};
use slotmap::{new_key_type, SlotMap};
use tracing::{debug, info, warn};

use crate::backend::GpuBackend;
use crate::cache::ProgramCache;
use crate::error::{LoadError, RuntimeError};
use crate::options::RuntimeOptions;
use crate::pipeline::{FrameOutput, PassInfo, Pipeline, SourceFrame};

new_key_type! {
    /// Identifies one loaded preset inside a [`FilterRuntime`].
    pub struct PipelineHandle;
}

/// Shared pipeline generation counter.
///
/// Bumping it makes any frame in flight stop before its next pass. Clones
/// share the same counter, so a host can keep one in its resize callback.
#[derive(Debug, Clone, Default)]
pub struct InvalidationToken {
    generation: Arc<AtomicU64>,
}

impl InvalidationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn invalidate(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    pub fn current(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

pub struct FilterRuntime<B: GpuBackend> {
    backend: B,
    options: RuntimeOptions,
    cache: ProgramCache<B::Program>,
    pipelines: SlotMap<PipelineHandle, Pipeline<B>>,
    token: InvalidationToken,
}

impl<B: GpuBackend> FilterRuntime<B> {
    pub fn new(backend: B, options: RuntimeOptions) -> Self {
        Self {
            backend,
            options,
            cache: ProgramCache::new(),
            pipelines: SlotMap::with_key(),
            token: InvalidationToken::new(),
        }
    }

    pub fn options(&self) -> &RuntimeOptions {
        &self.options
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn cache(&self) -> &ProgramCache<B::Program> {
        &self.cache
    }

    /// Parses the preset at `path` and builds its pipeline.
    pub fn load_preset(&mut self, path: impl AsRef<Path>) -> Result<PipelineHandle, LoadError> {
        let path = path.as_ref();
        let pipeline = self.build(path)?;
        let handle = self.pipelines.insert(pipeline);
        debug!(?handle, preset = %path.display(), "pipeline loaded");
        Ok(handle)
    }

    fn build(&mut self, path: &Path) -> Result<Pipeline<B>, LoadError> {
        let descriptor = preset::load(path)?;
        Pipeline::build(&mut self.backend, &mut self.cache, descriptor, path, &self.options)
    }

    /// Runs every pass of `handle` over `source` and draws the result to
    /// the screen at `viewport`.
    ///
    /// Per-pass failures degrade the frame and are reported through the
    /// returned [`FrameOutput`]. A backend resource failure invalidates the
    /// pipeline; later frames fail with [`RuntimeError::Invalidated`] until
    /// it is reloaded.
    pub fn render_frame(
        &mut self,
        handle: PipelineHandle,
        source: &SourceFrame<B::Texture>,
        viewport: Size,
    ) -> Result<FrameOutput<B::Texture>, RuntimeError> {
        let pipeline = self
            .pipelines
            .get_mut(handle)
            .ok_or(RuntimeError::UnknownHandle)?;
        if pipeline.is_invalidated() {
            return Err(RuntimeError::Invalidated);
        }
        match pipeline.execute(&mut self.backend, source, viewport, &self.token) {
            Ok(output) => Ok(output),
            Err(err) => {
                warn!(?handle, error = %err, "pipeline invalidated; host should reload");
                pipeline.invalidate();
                self.token.invalidate();
                Err(err.into())
            }
        }
    }

    /// Sets a parameter, clamped to its declared bounds. Returns the value
    /// actually stored.
    pub fn set_parameter(&mut self, handle: PipelineHandle, name: &str, value: f32) -> Result<f32, RuntimeError> {
        let pipeline = self
            .pipelines
            .get_mut(handle)
            .ok_or(RuntimeError::UnknownHandle)?;
        let stored = pipeline.parameters_mut().set(name, value)?;
        debug!(?handle, parameter = name, requested = value, stored, "parameter set");
        Ok(stored)
    }

    pub fn parameters(&self, handle: PipelineHandle) -> Result<&ParameterTable, RuntimeError> {
        self.pipeline(handle).map(Pipeline::parameters)
    }

    pub fn passes(&self, handle: PipelineHandle) -> Result<Vec<PassInfo>, RuntimeError> {
        self.pipeline(handle).map(Pipeline::passes)
    }

    pub fn pipeline(&self, handle: PipelineHandle) -> Result<&Pipeline<B>, RuntimeError> {
        self.pipelines.get(handle).ok_or(RuntimeError::UnknownHandle)
    }

    /// Releases every resource `handle` owns. The handle is dead afterwards.
    pub fn dispose(&mut self, handle: PipelineHandle) -> Result<(), RuntimeError> {
        let mut pipeline = self
            .pipelines
            .remove(handle)
            .ok_or(RuntimeError::UnknownHandle)?;
        pipeline.destroy(&mut self.backend, &mut self.cache);
        debug!(?handle, live = self.pipelines.len(), "pipeline disposed");
        Ok(())
    }

    /// Re-reads the preset behind `handle` and swaps the rebuilt pipeline in.
    ///
    /// Current parameter values carry over where the new pipeline still
    /// declares them. On failure the old pipeline stays in place.
    pub fn reload(&mut self, handle: PipelineHandle) -> Result<(), RuntimeError> {
        let path = self.pipeline(handle)?.path().to_path_buf();
        let mut rebuilt = self
            .build(&path)
            .map_err(|err| RuntimeError::Reload(Box::new(err)))?;

        let Some(slot) = self.pipelines.get_mut(handle) else {
            rebuilt.destroy(&mut self.backend, &mut self.cache);
            return Err(RuntimeError::UnknownHandle);
        };
        for value in slot.parameters().iter() {
            // Values were clamped against the old bounds; clamp again against the new ones.
            if let Err(err) = rebuilt.parameters_mut().set(&value.name, value.current) {
                debug!(?handle, parameter = %value.name, value = value.current, error = %err, "parameter value dropped on reload");
            }
        }
        let mut old = std::mem::replace(slot, rebuilt);
        self.token.invalidate();
        old.destroy(&mut self.backend, &mut self.cache);
        info!(?handle, preset = %path.display(), generation = self.token.current(), "pipeline reloaded");
        Ok(())
    }

    /// The generation counter every in-flight frame checks between passes.
    pub fn invalidation_token(&self) -> InvalidationToken {
        self.token.clone()
    }

    /// Disposes every pipeline and deletes every cached program.
    pub fn shutdown(&mut self) {
        let handles: Vec<PipelineHandle> = self.pipelines.keys().collect();
        for handle in handles {
            let _ = self.dispose(handle);
        }
        self.cache.clear(&mut self.backend);
    }
}
