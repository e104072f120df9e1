//! [`GpuBackend`] over a host-owned `glow::Context`.
//!
//! The host keeps ownership of the context and the default framebuffer; this
//! backend only creates the objects the pipeline asks for and deletes them
//! when told to.
//!
//! The context must be desktop GL 3.3+, GLES 3.0+ or WebGL2: the backend
//! relies on vertex array objects and sized float render targets. Hosts on
//! GLES2/WebGL1 pair the `Gles100` dialect with their own [`GpuBackend`].
use std::collections::HashMap;
use std::sync::Arc;

use glow::HasContext;
use preset::{FilterMode, FramebufferFormat, Sampling, Size, WrapMode};
use tracing::{debug, warn};

use crate::backend::{Destination, DrawCall, GpuBackend, UniformValue, POSITION_ATTRIBUTE, TEXCOORD_ATTRIBUTE};
use crate::error::{CompileError, ResourceError};
use crate::lut::LutImage;

/// Unit quad as a triangle strip: `Position` (x, y, z, w) then `TexCoord` (u, v).
const QUAD: [f32; 24] = [
    0.0, 0.0, 0.0, 1.0, 0.0, 0.0, //
    1.0, 0.0, 0.0, 1.0, 1.0, 0.0, //
    0.0, 1.0, 0.0, 1.0, 0.0, 1.0, //
    1.0, 1.0, 0.0, 1.0, 1.0, 1.0,
];
const STRIDE: i32 = 6 * std::mem::size_of::<f32>() as i32;

#[derive(Debug)]
pub struct GlTarget {
    pub fbo: glow::NativeFramebuffer,
    pub texture: glow::NativeTexture,
    pub size: Size,
}

pub struct GlowBackend {
    gl: Arc<glow::Context>,
    caps: GlCaps,
    vao: glow::NativeVertexArray,
    vbo: glow::NativeBuffer,
    locations: HashMap<(glow::NativeProgram, String), Option<glow::NativeUniformLocation>>,
}

fn texel_format(format: FramebufferFormat) -> (u32, u32, u32) {
    match format {
        FramebufferFormat::Rgba8 => (glow::RGBA8, glow::RGBA, glow::UNSIGNED_BYTE),
        FramebufferFormat::Rgba8Srgb => (glow::SRGB8_ALPHA8, glow::RGBA, glow::UNSIGNED_BYTE),
        FramebufferFormat::Rgba16Float => (glow::RGBA16F, glow::RGBA, glow::HALF_FLOAT),
        FramebufferFormat::Rgba32Float => (glow::RGBA32F, glow::RGBA, glow::FLOAT),
    }
}

/// Context capabilities that change how sampling state is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlCaps {
    pub embedded: bool,
    pub major: u32,
    /// `CLAMP_TO_BORDER` is core on desktop GL but an extension on ES.
    pub border_clamp: bool,
}

impl GlCaps {
    fn detect(gl: &glow::Context) -> Self {
        let version = gl.version();
        let extensions = gl.supported_extensions();
        Self::from_parts(version.major, version.is_embedded, |name| extensions.contains(name))
    }

    pub fn from_parts(major: u32, embedded: bool, has_extension: impl Fn(&str) -> bool) -> Self {
        let border_clamp = !embedded
            || has_extension("GL_EXT_texture_border_clamp")
            || has_extension("GL_OES_texture_border_clamp");
        Self {
            embedded,
            major,
            border_clamp,
        }
    }

    /// Whether the context lacks VAOs and sized render-target formats.
    pub fn is_legacy(&self) -> bool {
        self.embedded && self.major < 3
    }

    pub fn wrap(&self, mode: WrapMode) -> i32 {
        let mode = match mode {
            WrapMode::ClampToBorder if self.border_clamp => glow::CLAMP_TO_BORDER,
            WrapMode::ClampToBorder | WrapMode::ClampToEdge => glow::CLAMP_TO_EDGE,
            WrapMode::Repeat => glow::REPEAT,
            WrapMode::MirroredRepeat => glow::MIRRORED_REPEAT,
        };
        mode as i32
    }
}

fn filters(sampling: Sampling) -> (i32, i32) {
    let (min, mag) = match (sampling.filter, sampling.mipmap) {
        (FilterMode::Linear, true) => (glow::LINEAR_MIPMAP_LINEAR, glow::LINEAR),
        (FilterMode::Linear, false) => (glow::LINEAR, glow::LINEAR),
        (FilterMode::Nearest, true) => (glow::NEAREST_MIPMAP_NEAREST, glow::NEAREST),
        (FilterMode::Nearest, false) => (glow::NEAREST, glow::NEAREST),
    };
    (min as i32, mag as i32)
}

unsafe fn apply_sampling(gl: &glow::Context, caps: GlCaps, sampling: Sampling) {
    let (min, mag) = filters(sampling);
    let wrap = caps.wrap(sampling.wrap);
    gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MIN_FILTER, min);
    gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MAG_FILTER, mag);
    gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_WRAP_S, wrap);
    gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_WRAP_T, wrap);
}

fn check(gl: &glow::Context, what: &str) -> Result<(), ResourceError> {
    match unsafe { gl.get_error() } {
        glow::OUT_OF_MEMORY => Err(ResourceError::OutOfMemory { what: what.to_string() }),
        glow::CONTEXT_LOST => Err(ResourceError::ContextLost),
        glow::NO_ERROR => Ok(()),
        code => {
            debug!(code, what, "GL error");
            Ok(())
        }
    }
}

impl GlowBackend {
    /// Creates the full-screen quad on `gl`. The context must be current.
    pub fn new(gl: Arc<glow::Context>) -> Result<Self, ResourceError> {
        let caps = GlCaps::detect(&gl);
        if caps.is_legacy() {
            return Err(ResourceError::Backend(format!(
                "GLES {} context lacks vertex array objects; GlowBackend needs GLES 3.0 or WebGL2",
                caps.major
            )));
        }
        debug!(?caps, "GL context capabilities");
        unsafe {
            let vao = gl.create_vertex_array().map_err(ResourceError::Backend)?;
            let vbo = gl.create_buffer().map_err(ResourceError::Backend)?;
            gl.bind_vertex_array(Some(vao));
            gl.bind_buffer(glow::ARRAY_BUFFER, Some(vbo));
            gl.buffer_data_u8_slice(glow::ARRAY_BUFFER, bytemuck::cast_slice(&QUAD), glow::STATIC_DRAW);
            gl.enable_vertex_attrib_array(POSITION_ATTRIBUTE.0);
            gl.vertex_attrib_pointer_f32(POSITION_ATTRIBUTE.0, 4, glow::FLOAT, false, STRIDE, 0);
            gl.enable_vertex_attrib_array(TEXCOORD_ATTRIBUTE.0);
            gl.vertex_attrib_pointer_f32(TEXCOORD_ATTRIBUTE.0, 2, glow::FLOAT, false, STRIDE, 4 * 4);
            gl.bind_vertex_array(None);
            gl.bind_buffer(glow::ARRAY_BUFFER, None);
            check(&gl, "quad buffer")?;
            Ok(Self {
                gl,
                caps,
                vao,
                vbo,
                locations: HashMap::new(),
            })
        }
    }

    pub fn context(&self) -> &Arc<glow::Context> {
        &self.gl
    }

    /// Deletes the quad; call before the host drops the context.
    pub fn destroy(&mut self) {
        unsafe {
            self.gl.delete_vertex_array(self.vao);
            self.gl.delete_buffer(self.vbo);
        }
        self.locations.clear();
    }

    fn location(&mut self, program: glow::NativeProgram, name: &str) -> Option<glow::NativeUniformLocation> {
        let gl = &self.gl;
        self.locations
            .entry((program, name.to_string()))
            .or_insert_with(|| unsafe { gl.get_uniform_location(program, name) })
            .clone()
    }
}

unsafe fn compile_stage(
    gl: &glow::Context,
    kind: u32,
    source: &str,
) -> Result<glow::NativeShader, CompileError> {
    let shader = gl.create_shader(kind).map_err(CompileError::Create)?;
    gl.shader_source(shader, source);
    gl.compile_shader(shader);
    if !gl.get_shader_compile_status(shader) {
        let log = gl.get_shader_info_log(shader);
        gl.delete_shader(shader);
        return Err(match kind {
            glow::VERTEX_SHADER => CompileError::vertex(log, source),
            _ => CompileError::fragment(log, source),
        });
    }
    Ok(shader)
}

impl GpuBackend for GlowBackend {
    type Program = glow::NativeProgram;
    type Texture = glow::NativeTexture;
    type Target = GlTarget;

    fn compile_program(&mut self, vertex: &str, fragment: &str) -> Result<Self::Program, CompileError> {
        let gl = &self.gl;
        unsafe {
            let vs = compile_stage(gl, glow::VERTEX_SHADER, vertex)?;
            let fs = match compile_stage(gl, glow::FRAGMENT_SHADER, fragment) {
                Ok(fs) => fs,
                Err(err) => {
                    gl.delete_shader(vs);
                    return Err(err);
                }
            };
            let program = match gl.create_program() {
                Ok(program) => program,
                Err(err) => {
                    gl.delete_shader(vs);
                    gl.delete_shader(fs);
                    return Err(CompileError::Create(err));
                }
            };
            gl.attach_shader(program, vs);
            gl.attach_shader(program, fs);
            gl.bind_attrib_location(program, POSITION_ATTRIBUTE.0, POSITION_ATTRIBUTE.1);
            gl.bind_attrib_location(program, TEXCOORD_ATTRIBUTE.0, TEXCOORD_ATTRIBUTE.1);
            gl.link_program(program);

            gl.detach_shader(program, vs);
            gl.detach_shader(program, fs);
            gl.delete_shader(vs);
            gl.delete_shader(fs);

            if !gl.get_program_link_status(program) {
                let log = gl.get_program_info_log(program);
                gl.delete_program(program);
                return Err(CompileError::Link { log });
            }
            Ok(program)
        }
    }

    fn delete_program(&mut self, program: Self::Program) {
        self.locations.retain(|(owner, _), _| *owner != program);
        unsafe { self.gl.delete_program(program) };
    }

    fn create_target(&mut self, size: Size, format: FramebufferFormat) -> Result<Self::Target, ResourceError> {
        let gl = &self.gl;
        let (internal, layout, ty) = texel_format(format);
        unsafe {
            let texture = gl.create_texture().map_err(ResourceError::Backend)?;
            gl.bind_texture(glow::TEXTURE_2D, Some(texture));
            apply_sampling(gl, self.caps, Sampling::default());
            gl.tex_image_2d(
                glow::TEXTURE_2D,
                0,
                internal as i32,
                size.width.max(1) as i32,
                size.height.max(1) as i32,
                0,
                layout,
                ty,
                None,
            );
            let fbo = match gl.create_framebuffer() {
                Ok(fbo) => fbo,
                Err(err) => {
                    gl.delete_texture(texture);
                    return Err(ResourceError::Backend(err));
                }
            };
            gl.bind_framebuffer(glow::FRAMEBUFFER, Some(fbo));
            gl.framebuffer_texture_2d(
                glow::FRAMEBUFFER,
                glow::COLOR_ATTACHMENT0,
                glow::TEXTURE_2D,
                Some(texture),
                0,
            );
            let status = gl.check_framebuffer_status(glow::FRAMEBUFFER);
            gl.bind_framebuffer(glow::FRAMEBUFFER, None);
            gl.bind_texture(glow::TEXTURE_2D, None);
            if status != glow::FRAMEBUFFER_COMPLETE {
                gl.delete_framebuffer(fbo);
                gl.delete_texture(texture);
                return Err(ResourceError::IncompleteTarget {
                    width: size.width,
                    height: size.height,
                    reason: format!("status 0x{status:x} for {format:?}"),
                });
            }
            check(gl, "render target")?;
            Ok(GlTarget { fbo, texture, size })
        }
    }

    fn target_texture(&self, target: &Self::Target) -> Self::Texture {
        target.texture
    }

    fn delete_target(&mut self, target: Self::Target) {
        unsafe {
            self.gl.delete_framebuffer(target.fbo);
            self.gl.delete_texture(target.texture);
        }
    }

    fn upload_texture(&mut self, image: &LutImage, sampling: Sampling) -> Result<Self::Texture, ResourceError> {
        let gl = &self.gl;
        unsafe {
            let texture = gl.create_texture().map_err(ResourceError::Backend)?;
            gl.bind_texture(glow::TEXTURE_2D, Some(texture));
            gl.pixel_store_i32(glow::UNPACK_ALIGNMENT, 1);
            gl.tex_image_2d(
                glow::TEXTURE_2D,
                0,
                glow::RGBA8 as i32,
                image.size.width as i32,
                image.size.height as i32,
                0,
                glow::RGBA,
                glow::UNSIGNED_BYTE,
                Some(image.pixels.as_slice()),
            );
            if sampling.mipmap {
                gl.generate_mipmap(glow::TEXTURE_2D);
            }
            apply_sampling(gl, self.caps, sampling);
            gl.bind_texture(glow::TEXTURE_2D, None);
            check(gl, "lookup texture")?;
            Ok(texture)
        }
    }

    fn delete_texture(&mut self, texture: Self::Texture) {
        unsafe { self.gl.delete_texture(texture) };
    }

    fn draw(&mut self, call: &DrawCall<'_, Self::Program, Self::Texture, Self::Target>) -> Result<(), ResourceError> {
        let locations: Vec<Option<glow::NativeUniformLocation>> = call
            .uniforms
            .iter()
            .map(|(name, _)| self.location(call.program, name))
            .collect();
        let samplers: Vec<Option<glow::NativeUniformLocation>> = call
            .textures
            .iter()
            .map(|binding| self.location(call.program, &binding.name))
            .collect();

        let gl = &self.gl;
        unsafe {
            let fbo = match call.destination {
                Destination::Target(target) => Some(target.fbo),
                Destination::Screen => None,
            };
            gl.bind_framebuffer(glow::FRAMEBUFFER, fbo);
            gl.viewport(0, 0, call.viewport.width as i32, call.viewport.height as i32);
            gl.disable(glow::BLEND);
            gl.use_program(Some(call.program));

            for (unit, (binding, location)) in call.textures.iter().zip(&samplers).enumerate() {
                gl.active_texture(glow::TEXTURE0 + unit as u32);
                gl.bind_texture(glow::TEXTURE_2D, Some(binding.texture));
                apply_sampling(gl, self.caps, binding.sampling);
                gl.uniform_1_i32(location.as_ref(), unit as i32);
            }
            for ((_, value), location) in call.uniforms.iter().zip(&locations) {
                let location = location.as_ref();
                match *value {
                    UniformValue::Float(v) => gl.uniform_1_f32(location, v),
                    UniformValue::Int(v) => gl.uniform_1_i32(location, v),
                    UniformValue::Vec2([x, y]) => gl.uniform_2_f32(location, x, y),
                    UniformValue::Vec3([x, y, z]) => gl.uniform_3_f32(location, x, y, z),
                    UniformValue::Vec4([x, y, z, w]) => gl.uniform_4_f32(location, x, y, z, w),
                    UniformValue::Mat4(m) => gl.uniform_matrix_4_f32_slice(location, false, &m),
                }
            }

            gl.bind_vertex_array(Some(self.vao));
            gl.draw_arrays(glow::TRIANGLE_STRIP, 0, 4);
            gl.bind_vertex_array(None);

            for unit in 0..call.textures.len() {
                gl.active_texture(glow::TEXTURE0 + unit as u32);
                gl.bind_texture(glow::TEXTURE_2D, None);
            }
            gl.active_texture(glow::TEXTURE0);
            gl.use_program(None);
            gl.bind_framebuffer(glow::FRAMEBUFFER, None);
        }
        check(gl, "draw").map_err(|err| {
            warn!(error = %err, "draw failed");
            err
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn border_clamp_falls_back_to_edge_on_es_without_the_extension() {
        let es = GlCaps::from_parts(3, true, |_| false);
        assert!(!es.border_clamp);
        assert_eq!(es.wrap(WrapMode::ClampToBorder), glow::CLAMP_TO_EDGE as i32);
        assert_eq!(es.wrap(WrapMode::Repeat), glow::REPEAT as i32);

        let es_ext = GlCaps::from_parts(3, true, |name| name == "GL_EXT_texture_border_clamp");
        assert_eq!(es_ext.wrap(WrapMode::ClampToBorder), glow::CLAMP_TO_BORDER as i32);

        let desktop = GlCaps::from_parts(3, false, |_| false);
        assert_eq!(desktop.wrap(WrapMode::ClampToBorder), glow::CLAMP_TO_BORDER as i32);
    }

    #[test]
    fn es2_contexts_are_legacy() {
        assert!(GlCaps::from_parts(2, true, |_| false).is_legacy());
        assert!(!GlCaps::from_parts(3, true, |_| false).is_legacy());
        assert!(!GlCaps::from_parts(2, false, |_| false).is_legacy());
    }
}
