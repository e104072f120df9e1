//! The seam between the pass executor and the host's graphics context.
//!
//! The executor only ever talks to a [`GpuBackend`]: it compiles programs,
//! allocates render targets, uploads lookup textures, and issues one
//! full-screen draw per pass. [`crate::gl::GlowBackend`] implements it over a
//! host-owned `glow::Context`; tests implement it on the CPU.
use std::fmt;

use preset::{FramebufferFormat, Sampling, Size};

use crate::error::{CompileError, ResourceError};
use crate::lut::LutImage;

/// Vertex attribute locations bound before linking.
pub const POSITION_ATTRIBUTE: (u32, &str) = (0, "Position");
pub const TEXCOORD_ATTRIBUTE: (u32, &str) = (1, "TexCoord");

/// Column-major orthographic projection mapping the unit quad to clip space.
pub const ORTHO_MVP: [f32; 16] = [
    2.0, 0.0, 0.0, 0.0, //
    0.0, 2.0, 0.0, 0.0, //
    0.0, 0.0, -1.0, 0.0, //
    -1.0, -1.0, 0.0, 1.0,
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Int(i32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    Mat4([f32; 16]),
}

/// A sampler binding for one draw.
#[derive(Debug, Clone, PartialEq)]
pub struct TextureBinding<T> {
    pub name: String,
    pub texture: T,
    pub sampling: Sampling,
}

pub enum Destination<'a, R> {
    Target(&'a R),
    /// The host's default framebuffer.
    Screen,
}

/// Everything one full-screen pass draw needs.
pub struct DrawCall<'a, P, T, R> {
    pub program: P,
    pub destination: Destination<'a, R>,
    pub viewport: Size,
    pub uniforms: &'a [(String, UniformValue)],
    pub textures: &'a [TextureBinding<T>],
}

impl<P: fmt::Debug, T, R> fmt::Debug for DrawCall<'_, P, T, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DrawCall")
            .field("program", &self.program)
            .field("screen", &matches!(self.destination, Destination::Screen))
            .field("viewport", &self.viewport)
            .field("uniforms", &self.uniforms.len())
            .field("textures", &self.textures.len())
            .finish()
    }
}

pub trait GpuBackend {
    type Program: Copy + Eq + fmt::Debug;
    type Texture: Copy + Eq + fmt::Debug;
    type Target: fmt::Debug;

    fn compile_program(&mut self, vertex: &str, fragment: &str) -> Result<Self::Program, CompileError>;

    fn delete_program(&mut self, program: Self::Program);

    fn create_target(&mut self, size: Size, format: FramebufferFormat) -> Result<Self::Target, ResourceError>;

    /// Texture a target renders into, for binding as a later input.
    fn target_texture(&self, target: &Self::Target) -> Self::Texture;

    fn delete_target(&mut self, target: Self::Target);

    fn upload_texture(&mut self, image: &LutImage, sampling: Sampling) -> Result<Self::Texture, ResourceError>;

    fn delete_texture(&mut self, texture: Self::Texture);

    fn draw(
        &mut self,
        call: &DrawCall<'_, Self::Program, Self::Texture, Self::Target>,
    ) -> Result<(), ResourceError>;
}
