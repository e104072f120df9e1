use serde::{Deserialize, Serialize};
use transpiler::{Dialect, TranspileOptions};

/// Behaviour knobs for a [`crate::FilterRuntime`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeOptions {
    /// GLSL dialect the host context accepts.
    pub dialect: Dialect,
    /// Keep LOD-qualified sampling instead of collapsing it.
    pub preserve_lod: bool,
    /// Render the final pass offscreen and present it, even without feedback.
    pub blit_final_feedback: bool,
    /// Log each unresolved texture or uniform once per pass instead of every frame.
    pub log_once: bool,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            dialect: Dialect::default(),
            preserve_lod: false,
            blit_final_feedback: false,
            log_once: true,
        }
    }
}

impl RuntimeOptions {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            ..Self::default()
        }
    }

    pub fn transpile_options(&self) -> TranspileOptions {
        TranspileOptions {
            dialect: self.dialect,
            preserve_lod: self.preserve_lod,
        }
    }
}
