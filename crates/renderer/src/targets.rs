//! Render-target rings.
//!
//! A plain pass owns a ring of one target. A feedback pass owns `depth + 1`
//! so the frame being written never aliases a frame still being sampled.
//! Original-history rings reuse the same structure for copies of the source
//! frame.
use preset::{FramebufferFormat, Size};
use tracing::debug;

use crate::backend::GpuBackend;
use crate::error::ResourceError;

#[derive(Debug)]
pub struct TargetRing<R> {
    slots: Vec<Option<R>>,
    head: usize,
    size: Option<Size>,
    format: FramebufferFormat,
}

impl<R> TargetRing<R> {
    pub fn new(len: usize, format: FramebufferFormat) -> Self {
        let mut slots = Vec::new();
        slots.resize_with(len.max(1), || None);
        Self {
            slots,
            head: 0,
            size: None,
            format,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Size of the current allocation, if any.
    pub fn size(&self) -> Option<Size> {
        self.size
    }

    pub fn format(&self) -> FramebufferFormat {
        self.format
    }

    /// Makes sure every slot exists at `size`, reallocating all of them when
    /// the size changed. Returns true when anything was allocated.
    pub fn ensure<B>(&mut self, backend: &mut B, size: Size) -> Result<bool, ResourceError>
    where
        B: GpuBackend<Target = R>,
    {
        if self.size == Some(size) && self.slots.iter().all(Option::is_some) {
            return Ok(false);
        }
        self.release(backend);
        for slot in &mut self.slots {
            *slot = Some(backend.create_target(size, self.format)?);
        }
        self.size = Some(size);
        debug!(%size, slots = self.slots.len(), format = ?self.format, "allocated render targets");
        Ok(true)
    }

    /// The slot written this frame.
    pub fn current(&self) -> Option<&R> {
        self.slots.get(self.head)?.as_ref()
    }

    /// The slot written `age` successful frames ago; `age` ranges over
    /// `1..=len`, where `len` names the slot about to be overwritten.
    pub fn previous(&self, age: usize) -> Option<&R> {
        let len = self.slots.len();
        if age == 0 || age > len {
            return None;
        }
        self.slots.get((self.head + len - age) % len)?.as_ref()
    }

    /// Rotates the ring after a frame completed.
    pub fn advance(&mut self) {
        self.head = (self.head + 1) % self.slots.len();
    }

    pub fn destroy<B>(&mut self, backend: &mut B)
    where
        B: GpuBackend<Target = R>,
    {
        self.release(backend);
        self.head = 0;
    }

    fn release<B>(&mut self, backend: &mut B)
    where
        B: GpuBackend<Target = R>,
    {
        for slot in &mut self.slots {
            if let Some(target) = slot.take() {
                backend.delete_target(target);
            }
        }
        self.size = None;
    }
}
