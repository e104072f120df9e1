use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// GLSL dialect accepted by the host's graphics context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// GLSL ES 3.00 (WebGL2 / GLES3).
    #[default]
    Gles300,
    /// GLSL ES 1.00 (WebGL1 / GLES2): attribute/varying, `texture2D`, `gl_FragColor`.
    Gles100,
}

impl Dialect {
    pub fn version_directive(self) -> &'static str {
        match self {
            Dialect::Gles300 => "#version 300 es",
            Dialect::Gles100 => "#version 100",
        }
    }

    pub fn is_legacy(self) -> bool {
        self == Dialect::Gles100
    }

    /// Whether the dialect ships the named builtin function.
    pub fn has_builtin(self, name: &str) -> bool {
        match self {
            Dialect::Gles300 => true,
            Dialect::Gles100 => !matches!(
                name,
                "transpose" | "determinant" | "round" | "trunc" | "tanh" | "sinh" | "cosh"
            ),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::Gles300 => f.write_str("gles300"),
            Dialect::Gles100 => f.write_str("gles100"),
        }
    }
}

impl FromStr for Dialect {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "gles300" | "es3" | "webgl2" => Ok(Dialect::Gles300),
            "gles100" | "es2" | "webgl1" => Ok(Dialect::Gles100),
            other => Err(format!("unknown dialect `{other}` (expected gles300 or gles100)")),
        }
    }
}

/// Knobs for a transpilation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TranspileOptions {
    pub dialect: Dialect,
    /// Keep `textureLod`/bias arguments instead of collapsing them.
    pub preserve_lod: bool,
}

impl TranspileOptions {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            preserve_lod: false,
        }
    }
}
