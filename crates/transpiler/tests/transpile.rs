use std::fs;
use std::path::Path;

use transpiler::{
    transpile, transpile_file, BuiltinSemantic, Dialect, IncludePool, MemoryProvider, RuleOutcome,
    Stage, TextureSemantic, TranspileError, TranspileOptions, UniformSemantic,
};

fn es3() -> TranspileOptions {
    TranspileOptions::new(Dialect::Gles300)
}

fn es2() -> TranspileOptions {
    TranspileOptions::new(Dialect::Gles100)
}

fn memory_pool(files: &[(&str, &str)]) -> IncludePool {
    let mut provider = MemoryProvider::new();
    for (path, text) in files {
        provider.insert(path, *text);
    }
    IncludePool::new(provider)
}

const SELF_INIT: &str = r#"#version 450
#pragma parameter GAIN "Gain" 1.0 0.0 2.0
layout(push_constant) uniform Push { vec4 SourceSize; float GAIN; } params;
#pragma stage vertex
layout(location = 0) in vec4 Position;
layout(location = 1) in vec2 TexCoord;
layout(location = 0) out vec2 vTexCoord;
void main() { gl_Position = Position; vTexCoord = TexCoord; }
#pragma stage fragment
layout(location = 0) in vec2 vTexCoord;
layout(location = 0) out vec4 FragColor;
layout(set = 0, binding = 2) uniform sampler2D Source;
void main() {
    float GAIN = params.GAIN;
    float Y = params.GAIN * 2.0;
    FragColor = texture(Source, vTexCoord) * GAIN * Y;
}
"#;

#[test]
fn self_initializer_becomes_the_uniform() {
    let mut pool = memory_pool(&[]);
    let unit = transpile(SELF_INIT, Path::new("pass.slang"), &mut pool, &es3()).unwrap();

    assert_eq!(unit.fragment.matches("float GAIN").count(), 1);
    assert!(unit.fragment.contains("uniform float GAIN;"));
    assert!(!unit.fragment.contains("float GAIN ="));
    assert!(unit.fragment.contains("float Y = GAIN * 2.0;"));
    assert!(!unit.fragment.contains("params"));
    assert_eq!(unit.elided, ["GAIN"]);
    assert!(unit.dual.is_empty());

    assert!(unit.fragment.starts_with("#version 300 es\n"));
    assert!(unit.fragment.contains("\nuniform sampler2D Source;"));
    assert!(!unit.fragment.contains("layout("));
}

#[test]
fn overloads_survive_and_repeats_are_removed() {
    let library = "float luma(vec3 c) { return dot(c, vec3(0.299, 0.587, 0.114)); }\n\
                   float luma(vec4 c) { return luma(c.rgb); }\n";
    let source = "#version 450\n#include \"lib/common.inc\"\n\
                  float luma(vec3 c) { return c.g; }\n\
                  #pragma stage vertex\nvoid main() { gl_Position = vec4(0.0); }\n\
                  #pragma stage fragment\nout vec4 FragColor;\n\
                  void main() { FragColor = vec4(luma(vec3(1.0)) + luma(vec4(1.0))); }\n";
    let mut pool = memory_pool(&[("shaders/lib/common.inc", library)]);
    let unit = transpile(source, Path::new("shaders/pass.slang"), &mut pool, &es3()).unwrap();

    assert!(unit.fragment.contains("float luma(vec3 c) { return dot("));
    assert!(unit.fragment.contains("float luma(vec4 c) { return luma(c.rgb); }"));
    assert!(!unit.fragment.contains("return c.g;"));
    let names: Vec<String> = unit.functions.iter().map(ToString::to_string).collect();
    assert_eq!(names, ["luma(vec3)", "luma(vec4)"]);
    assert_eq!(pool.symbols().len(), 2);
}

const COMPATIBLE: &str = "#version 450
#pragma stage vertex
in vec4 Position;
in vec2 TexCoord;
out vec2 vTexCoord;
uniform mat4 MVP;
void main() {
    gl_Position = MVP * Position;
    vTexCoord = TexCoord;
}
#pragma stage fragment
precision highp float;
in vec2 vTexCoord;
out vec4 FragColor;
uniform sampler2D Source;
void main() {
    FragColor = texture(Source, vTexCoord);
}
";

#[test]
fn compatible_source_is_left_alone() {
    let mut pool = memory_pool(&[]);
    let unit = transpile(COMPATIBLE, Path::new("stock.slang"), &mut pool, &es3()).unwrap();

    let vertex_start = COMPATIBLE.find("in vec4 Position;").unwrap();
    let fragment_marker = COMPATIBLE.find("#pragma stage fragment").unwrap();
    let fragment_start = COMPATIBLE.find("precision highp float;").unwrap();
    assert_eq!(
        unit.body(Stage::Vertex).trim(),
        COMPATIBLE[vertex_start..fragment_marker].trim()
    );
    assert_eq!(unit.body(Stage::Fragment).trim(), COMPATIBLE[fragment_start..].trim());
    assert!(unit
        .rules
        .iter()
        .all(|report| report.outcome == RuleOutcome::NotApplicable));

    // MVP is declared by the vertex stage only; the fragment stage gets it
    // from the builtin header.
    let header = &unit.fragment[..unit.fragment.len() - unit.body(Stage::Fragment).len()];
    assert!(header.contains("uniform mat4 MVP;"));
    let vertex_header = &unit.vertex[..unit.vertex.len() - unit.body(Stage::Vertex).len()];
    assert!(!vertex_header.contains("MVP"));
}

#[test]
fn parameter_list_qualifiers_survive_the_legacy_dialect() {
    let source = "#version 450
#pragma stage vertex
layout(location = 0) in vec4 Position;
layout(location = 0) out vec2 vTexCoord;
void main() { gl_Position = Position; vTexCoord = Position.xy; }
#pragma stage fragment
layout(location = 0) in vec2 vTexCoord;
layout(location = 0) out vec4 FragColor;
void shade(in vec2 uv, out vec4 color) { color = vec4(uv, 0.0, 1.0); }
void main() { vec4 c; shade(vTexCoord, c); FragColor = c; }
";
    let mut pool = memory_pool(&[]);
    let unit = transpile(source, Path::new("legacy.slang"), &mut pool, &es2()).unwrap();

    assert!(unit.vertex.starts_with("#version 100\n"));
    assert!(unit.vertex.contains("attribute vec4 Position;"));
    assert!(unit.vertex.contains("varying vec2 vTexCoord;"));
    assert!(unit.fragment.contains("varying vec2 vTexCoord;"));
    assert!(unit.fragment.contains("void shade(in vec2 uv, out vec4 color)"));
    assert!(unit.fragment.contains("gl_FragColor = c;"));
    assert!(!unit.fragment.contains("out vec4 FragColor"));
}

#[test]
fn legacy_dialect_rewrites_the_whole_battery() {
    let source = "#version 450
layout(std140, set = 0, binding = 0) uniform UBO { mat4 MVP; uint FrameCount; } global;
#pragma stage vertex
layout(location = 0) in vec4 Position;
void main() { gl_Position = global.MVP * Position; }
#pragma stage fragment
layout(location = 0) out vec4 FragColor;
layout(set = 0, binding = 2) uniform sampler2D Source;
void main() {
    mat3x3 m = transpose(mat3(1.0));
    float phase = global.FrameCount % 2u;
    int i = 0;
    do { i++; } while (i < 3);
    FragColor = textureLod(Source, vec2(0.5), 0.0) * phase * m[0][0];
}
";
    let mut pool = memory_pool(&[]);
    let unit = transpile(source, Path::new("crt.slang"), &mut pool, &es2()).unwrap();
    let fragment = &unit.fragment;

    assert!(fragment.contains("uniform float FrameCount;"));
    assert!(fragment.contains("mat3 m = transpose(mat3(1.0));"));
    assert!(fragment.contains("float phase = mod(FrameCount, 2.0);"));
    assert!(fragment.contains("while (_dw0 || (i < 3))"));
    assert!(fragment.contains("texture2D(Source, vec2(0.5))"));
    assert!(fragment.contains("#ifndef CRT_POLYFILL_TRANSPOSE"));
    assert!(fragment.contains("gl_FragColor = "));
    assert!(!fragment.contains("do {"));

    let applied: Vec<&str> = unit
        .rules
        .iter()
        .filter(|report| report.outcome.is_applied())
        .map(|report| report.rule)
        .collect();
    assert_eq!(
        applied,
        [
            "layout-qualifiers",
            "scalar-matrix-types",
            "texture-sampling",
            "do-while-loops",
            "storage-qualifiers",
            "builtin-polyfills",
        ]
    );
}

#[test]
fn written_parameters_are_dual_declared() {
    let source = "#version 450
#pragma parameter MASK \"Mask Type\" 1.0 0.0 3.0
layout(push_constant) uniform Push { float MASK; } params;
#pragma stage vertex
void main() { gl_Position = vec4(0.0); }
#pragma stage fragment
out vec4 FragColor;
void main() {
    MASK = floor(MASK);
    FragColor = vec4(MASK);
}
";
    let mut pool = memory_pool(&[]);
    let unit = transpile(source, Path::new("mask.slang"), &mut pool, &es3()).unwrap();

    assert_eq!(unit.dual, ["MASK"]);
    assert!(unit.fragment.contains("uniform float PARAM_MASK;\nfloat MASK;\n"));
    assert!(unit.fragment.contains("MASK = PARAM_MASK;"));
    assert_eq!(
        unit.uniforms.iter().find(|u| u.name == "PARAM_MASK").map(|u| &u.semantic),
        Some(&UniformSemantic::Parameter { name: "MASK".into() })
    );
    assert_eq!(unit.parameters.len(), 1);
    assert_eq!(unit.parameters[0].label, "Mask Type");
}

#[test]
fn manifest_describes_builtins_samplers_and_metadata() {
    let source = "#version 450
#pragma name Scanlines
#pragma format R16G16B16A16_SFLOAT
layout(push_constant) uniform Push { vec4 SourceSize; vec4 PassOutputSize0; } params;
#pragma stage vertex
void main() { gl_Position = vec4(0.0); }
#pragma stage fragment
layout(set = 0, binding = 3) uniform sampler2D PassOutput0;
layout(set = 0, binding = 4) uniform sampler2D Bezel;
out vec4 FragColor;
void main() { FragColor = texture(PassOutput0, vec2(0.0)) + texture(Bezel, vec2(0.0)); }
";
    let mut pool = memory_pool(&[]);
    let unit = transpile(source, Path::new("scan.slang"), &mut pool, &es3()).unwrap();

    assert_eq!(unit.name.as_deref(), Some("Scanlines"));
    assert!(unit.format.is_some());
    assert_eq!(unit.fragment.matches("uniform vec4 SourceSize;").count(), 1);

    let semantic = |name: &str| {
        unit.uniforms
            .iter()
            .find(|u| u.name == name)
            .map(|u| u.semantic.clone())
    };
    assert_eq!(
        semantic("SourceSize"),
        Some(UniformSemantic::Builtin {
            builtin: BuiltinSemantic::SourceSize
        })
    );
    assert_eq!(
        semantic("PassOutputSize0"),
        Some(UniformSemantic::TextureSize {
            texture: TextureSemantic::PassOutput(0)
        })
    );
    assert_eq!(
        semantic("FrameCount"),
        Some(UniformSemantic::Builtin {
            builtin: BuiltinSemantic::FrameCount
        })
    );
    let samplers: Vec<_> = unit.samplers.iter().map(|s| s.semantic.clone()).collect();
    assert_eq!(
        samplers,
        [TextureSemantic::PassOutput(0), TextureSemantic::Named("Bezel".into())]
    );

    let json = serde_json::to_value(&unit).unwrap();
    assert_eq!(json["name"], "Scanlines");
    assert_eq!(json["rules"][0]["rule"], "layout-qualifiers");
    assert_eq!(json["rules"][0]["status"], "applied");
    assert!(json.get("vertex").is_none());
}

#[test]
fn malformed_stage_pragma_is_fatal() {
    let mut pool = memory_pool(&[]);
    let err = transpile(
        "#pragma stage vertex\nvoid main() { }\n#pragma stage pixel\nvoid main() { }\n",
        Path::new("bad.slang"),
        &mut pool,
        &es3(),
    )
    .unwrap_err();
    assert!(matches!(err, TranspileError::MalformedStage(_)));
}

#[test]
fn missing_include_is_reported() {
    let mut pool = memory_pool(&[]);
    let err = transpile(
        "#include \"nowhere.inc\"\n#pragma stage vertex\nvoid main() { }\n#pragma stage fragment\nvoid main() { }\n",
        Path::new("pass.slang"),
        &mut pool,
        &es3(),
    )
    .unwrap_err();
    assert!(matches!(err, TranspileError::Read { .. }));
}

#[test]
fn files_and_includes_are_read_from_disk_once() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("shaders/include")).unwrap();
    fs::write(
        dir.path().join("shaders/include/lib.inc"),
        "#pragma once\nfloat boost(float x) { return x * 2.0; }\n",
    )
    .unwrap();
    let pass = "#version 450\n#include \"include/lib.inc\"\n\
                #pragma stage vertex\nvoid main() { gl_Position = vec4(boost(1.0)); }\n\
                #pragma stage fragment\nout vec4 FragColor;\nvoid main() { FragColor = vec4(boost(0.5)); }\n";
    fs::write(dir.path().join("shaders/a.slang"), pass).unwrap();
    fs::write(dir.path().join("shaders/b.slang"), pass).unwrap();

    let mut pool = IncludePool::filesystem();
    let a = transpile_file(&dir.path().join("shaders/a.slang"), &mut pool, &es3()).unwrap();
    let b = transpile_file(&dir.path().join("shaders/b.slang"), &mut pool, &es3()).unwrap();

    assert_eq!(a.fragment, b.fragment);
    assert_eq!(a.vertex.matches("float boost(float x)").count(), 1);
    assert!(!a.vertex.contains("#pragma once"));
    // Two pass files plus one shared include.
    assert_eq!(pool.reads(), 3);
}
