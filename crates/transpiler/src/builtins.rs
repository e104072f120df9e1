//! The uniform set every pass may reference without declaring it.
use crate::dialect::Dialect;
use crate::syntax::Stage;

/// Builtin uniforms with their declared types, in injection order.
pub const BUILTIN_UNIFORMS: [(&str, &str); 8] = [
    ("MVP", "mat4"),
    ("SourceSize", "vec4"),
    ("OriginalSize", "vec4"),
    ("OutputSize", "vec4"),
    ("FinalViewportSize", "vec4"),
    ("FrameCount", "float"),
    ("FrameDirection", "float"),
    ("Rotation", "float"),
];

pub fn is_builtin_uniform(name: &str) -> bool {
    BUILTIN_UNIFORMS.iter().any(|(builtin, _)| *builtin == name)
}

/// Version line, precision header, and declarations for every builtin
/// uniform not already in `declared`.
pub fn prelude(dialect: Dialect, stage: Stage, declared: &[String]) -> String {
    let mut out = String::new();
    out.push_str(dialect.version_directive());
    out.push('\n');
    match (dialect, stage) {
        (Dialect::Gles100, Stage::Fragment) => out.push_str(
            "#ifdef GL_FRAGMENT_PRECISION_HIGH\nprecision highp float;\n#else\nprecision mediump float;\n#endif\n",
        ),
        _ => out.push_str("precision highp float;\nprecision highp int;\n"),
    }
    for (name, ty) in BUILTIN_UNIFORMS {
        if !declared.iter().any(|d| d == name) {
            out.push_str(&format!("uniform {ty} {name};\n"));
        }
    }
    out
}

/// Builtin names `prelude` would inject for this set of declarations.
pub fn injected(declared: &[String]) -> Vec<(&'static str, &'static str)> {
    BUILTIN_UNIFORMS
        .into_iter()
        .filter(|(name, _)| !declared.iter().any(|d| d == name))
        .collect()
}
