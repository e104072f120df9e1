//! The copy shader used for degraded passes and for presenting offscreen
//! output. It is written in the source dialect and goes through the same
//! transpiler as preset passes.
use std::path::Path;

use transpiler::{transpile, IncludePool, ShaderUnit, TranspileError, TranspileOptions};

pub const PASSTHROUGH_PATH: &str = "builtin/passthrough.slang";

pub const PASSTHROUGH_SOURCE: &str = r#"#version 450

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
    FragColor = vec4(texture(Source, vTexCoord).rgb, 1.0);
}
"#;

pub fn unit(pool: &mut IncludePool, options: &TranspileOptions) -> Result<ShaderUnit, TranspileError> {
    transpile(PASSTHROUGH_SOURCE, Path::new(PASSTHROUGH_PATH), pool, options)
}
