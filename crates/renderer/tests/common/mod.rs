//! CPU backend and fixtures for pipeline tests.
//!
//! Every texture is a single solid colour. A program's effect is picked from
//! its fragment source: one that defines `invert(` inverts the colour bound
//! as `Source`, anything else copies it.
#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use preset::{FramebufferFormat, Sampling, Size};
use renderer::{
    CompileError, Destination, DrawCall, GpuBackend, InvalidationToken, LutImage, ResourceError,
    UniformValue,
};

pub type Rgba = [u8; 4];

pub const RED: Rgba = [255, 0, 0, 255];
pub const CYAN: Rgba = [0, 255, 255, 255];
pub const BLUE: Rgba = [0, 0, 255, 255];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Effect {
    Copy,
    Invert,
}

#[derive(Debug)]
pub struct MockTarget {
    pub texture: u32,
    pub size: Size,
}

#[derive(Debug, Clone)]
pub struct DrawRecord {
    pub program: u32,
    /// Texture written, or `None` for the screen.
    pub destination: Option<u32>,
    pub viewport: Size,
    pub textures: Vec<(String, u32)>,
    pub uniforms: Vec<(String, UniformValue)>,
}

impl DrawRecord {
    pub fn texture(&self, name: &str) -> Option<u32> {
        self.textures
            .iter()
            .find(|(bound, _)| bound == name)
            .map(|(_, texture)| *texture)
    }

    pub fn uniform(&self, name: &str) -> Option<UniformValue> {
        self.uniforms
            .iter()
            .find(|(bound, _)| bound == name)
            .map(|(_, value)| *value)
    }
}

#[derive(Default)]
pub struct MockBackend {
    next_id: u32,
    programs: HashMap<u32, Effect>,
    pub sources: HashMap<u32, String>,
    pub colors: HashMap<u32, Rgba>,
    pub draws: Vec<DrawRecord>,
    pub screen: Option<(Rgba, Size)>,
    pub compiles: usize,
    pub targets_created: usize,
    pub targets_deleted: usize,
    pub textures_deleted: usize,
    /// Bumps the token once this many draws have happened.
    pub invalidate_after: Option<(usize, InvalidationToken)>,
    /// Fails the draw with this index as if the context were lost.
    pub lose_context_at: Option<usize>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    /// A host-owned source texture of one colour.
    pub fn solid(&mut self, rgba: Rgba) -> u32 {
        let id = self.allocate();
        self.colors.insert(id, rgba);
        id
    }

    pub fn live_programs(&self) -> usize {
        self.programs.len()
    }

    pub fn color(&self, texture: u32) -> Option<Rgba> {
        self.colors.get(&texture).copied()
    }

    pub fn take_draws(&mut self) -> Vec<DrawRecord> {
        std::mem::take(&mut self.draws)
    }
}

fn balanced(source: &str) -> bool {
    let mut depth = 0i32;
    for c in source.chars() {
        match c {
            '{' => depth += 1,
            '}' => depth -= 1,
            _ => {}
        }
        if depth < 0 {
            return false;
        }
    }
    depth == 0
}

impl GpuBackend for MockBackend {
    type Program = u32;
    type Texture = u32;
    type Target = MockTarget;

    fn compile_program(&mut self, vertex: &str, fragment: &str) -> Result<u32, CompileError> {
        self.compiles += 1;
        if !balanced(vertex) {
            return Err(CompileError::vertex("unbalanced braces", vertex));
        }
        if !balanced(fragment) || fragment.contains("undeclared_value") {
            return Err(CompileError::fragment("'undeclared_value' : undeclared identifier", fragment));
        }
        let effect = if fragment.contains("invert(") {
            Effect::Invert
        } else {
            Effect::Copy
        };
        let id = self.allocate();
        self.programs.insert(id, effect);
        self.sources.insert(id, fragment.to_string());
        Ok(id)
    }

    fn delete_program(&mut self, program: u32) {
        self.programs.remove(&program);
        self.sources.remove(&program);
    }

    fn create_target(&mut self, size: Size, _format: FramebufferFormat) -> Result<MockTarget, ResourceError> {
        self.targets_created += 1;
        let texture = self.allocate();
        self.colors.insert(texture, [0, 0, 0, 0]);
        Ok(MockTarget { texture, size })
    }

    fn target_texture(&self, target: &MockTarget) -> u32 {
        target.texture
    }

    fn delete_target(&mut self, target: MockTarget) {
        self.targets_deleted += 1;
        self.colors.remove(&target.texture);
    }

    fn upload_texture(&mut self, image: &LutImage, _sampling: Sampling) -> Result<u32, ResourceError> {
        let id = self.allocate();
        self.colors.insert(id, image.texel(0).unwrap_or_default());
        Ok(id)
    }

    fn delete_texture(&mut self, texture: u32) {
        self.textures_deleted += 1;
        self.colors.remove(&texture);
    }

    fn draw(&mut self, call: &DrawCall<'_, u32, u32, MockTarget>) -> Result<(), ResourceError> {
        if self.lose_context_at == Some(self.draws.len()) {
            return Err(ResourceError::ContextLost);
        }
        let effect = *self
            .programs
            .get(&call.program)
            .ok_or_else(|| ResourceError::Backend(format!("program {} is not live", call.program)))?;
        let input = call
            .textures
            .iter()
            .find(|binding| binding.name == "Source")
            .and_then(|binding| self.colors.get(&binding.texture).copied())
            .unwrap_or_default();
        let output = match effect {
            Effect::Copy => input,
            Effect::Invert => [255 - input[0], 255 - input[1], 255 - input[2], input[3]],
        };
        let destination = match call.destination {
            Destination::Target(target) => {
                self.colors.insert(target.texture, output);
                Some(target.texture)
            }
            Destination::Screen => {
                self.screen = Some((output, call.viewport));
                None
            }
        };
        self.draws.push(DrawRecord {
            program: call.program,
            destination,
            viewport: call.viewport,
            textures: call
                .textures
                .iter()
                .map(|binding| (binding.name.clone(), binding.texture))
                .collect(),
            uniforms: call.uniforms.to_vec(),
        });
        if let Some((after, token)) = &self.invalidate_after {
            if self.draws.len() == *after {
                token.invalidate();
            }
        }
        Ok(())
    }
}

const VERTEX: &str = r#"#version 450
layout(push_constant) uniform Push {
    vec4 SourceSize;
    vec4 OutputSize;
} params;
layout(std140, set = 0, binding = 0) uniform UBO {
    mat4 MVP;
} global;

#pragma stage vertex
layout(location = 0) in vec4 Position;
layout(location = 1) in vec2 TexCoord;
layout(location = 0) out vec2 vTexCoord;
void main() {
    gl_Position = global.MVP * Position;
    vTexCoord = TexCoord;
}

#pragma stage fragment
layout(location = 0) in vec2 vTexCoord;
layout(location = 0) out vec4 FragColor;
layout(set = 0, binding = 2) uniform sampler2D Source;
"#;

/// A pass that copies `Source`, optionally declaring extra samplers it reads.
pub fn copy_shader(extra_samplers: &[&str]) -> String {
    let mut text = VERTEX.to_string();
    let mut body = String::from("    vec4 color = texture(Source, vTexCoord);\n");
    for (binding, name) in extra_samplers.iter().enumerate() {
        text.push_str(&format!(
            "layout(set = 0, binding = {}) uniform sampler2D {name};\n",
            binding + 3
        ));
        body.push_str(&format!("    color = mix(color, texture({name}, vTexCoord), 0.0);\n"));
    }
    text.push_str("void main() {\n");
    text.push_str(&body);
    text.push_str("    FragColor = color;\n}\n");
    text
}

pub fn invert_shader() -> String {
    format!(
        "{VERTEX}vec3 invert(vec3 c) {{ return vec3(1.0) - c; }}\n\
         void main() {{\n    FragColor = vec4(invert(texture(Source, vTexCoord).rgb), 1.0);\n}}\n"
    )
}

/// Transpiles cleanly but the driver rejects it.
pub fn broken_shader() -> String {
    format!("{VERTEX}void main() {{\n    FragColor = undeclared_value;\n}}\n")
}

/// Declares `GAIN` through a pragma and the push block.
pub fn gain_shader() -> String {
    r#"#version 450
#pragma parameter GAIN "Gain" 1.0 0.0 2.0
layout(push_constant) uniform Push {
    vec4 SourceSize;
    float GAIN;
} params;
layout(std140, set = 0, binding = 0) uniform UBO {
    mat4 MVP;
} global;

#pragma stage vertex
layout(location = 0) in vec4 Position;
layout(location = 1) in vec2 TexCoord;
layout(location = 0) out vec2 vTexCoord;
void main() {
    gl_Position = global.MVP * Position;
    vTexCoord = TexCoord;
}

#pragma stage fragment
layout(location = 0) in vec2 vTexCoord;
layout(location = 0) out vec4 FragColor;
layout(set = 0, binding = 2) uniform sampler2D Source;
void main() {
    FragColor = texture(Source, vTexCoord) * params.GAIN;
}
"#
    .to_string()
}

pub fn write(dir: &Path, name: &str, text: &str) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, text).unwrap();
    path
}
