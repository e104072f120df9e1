//! Uniform and sampler manifests.
//!
//! The renderer binds values by name; the manifest tells it what each name
//! means so it does not have to guess from the GLSL again every frame.
use std::collections::BTreeSet;

use serde::Serialize;

use crate::flatten::PARAM_PREFIX;
use crate::pragmas::ParameterPragma;
use crate::syntax::{SourceTree, Stage};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UniformType {
    Float,
    Vec2,
    Vec3,
    Vec4,
    Int,
    Mat2,
    Mat3,
    Mat4,
    Other(String),
}

impl UniformType {
    pub fn parse(ty: &str) -> Self {
        match ty {
            "float" => UniformType::Float,
            "vec2" => UniformType::Vec2,
            "vec3" => UniformType::Vec3,
            "vec4" => UniformType::Vec4,
            "int" | "bool" => UniformType::Int,
            "mat2" => UniformType::Mat2,
            "mat3" => UniformType::Mat3,
            "mat4" => UniformType::Mat4,
            other => UniformType::Other(other.to_string()),
        }
    }
}

/// Where a sampler's texture comes from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(tag = "kind", content = "index", rename_all = "snake_case")]
pub enum TextureSemantic {
    Original,
    Source,
    OriginalHistory(u32),
    PassOutput(u32),
    PassFeedback(u32),
    /// A pass alias, `<alias>Feedback`, or a lookup texture; resolved at bind time.
    Named(String),
}

impl TextureSemantic {
    pub fn classify(name: &str) -> Self {
        let indexed = |prefix: &str| -> Option<u32> { name.strip_prefix(prefix)?.parse().ok() };
        match name {
            "Original" => TextureSemantic::Original,
            "Source" => TextureSemantic::Source,
            _ => {
                if let Some(index) = indexed("OriginalHistory") {
                    TextureSemantic::OriginalHistory(index)
                } else if let Some(index) = indexed("PassOutput") {
                    TextureSemantic::PassOutput(index)
                } else if let Some(index) = indexed("PassFeedback") {
                    TextureSemantic::PassFeedback(index)
                } else {
                    TextureSemantic::Named(name.to_string())
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinSemantic {
    Mvp,
    SourceSize,
    OriginalSize,
    OutputSize,
    FinalViewportSize,
    FrameCount,
    FrameDirection,
    Rotation,
}

impl BuiltinSemantic {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "MVP" => BuiltinSemantic::Mvp,
            "SourceSize" => BuiltinSemantic::SourceSize,
            "OriginalSize" => BuiltinSemantic::OriginalSize,
            "OutputSize" => BuiltinSemantic::OutputSize,
            "FinalViewportSize" => BuiltinSemantic::FinalViewportSize,
            "FrameCount" => BuiltinSemantic::FrameCount,
            "FrameDirection" => BuiltinSemantic::FrameDirection,
            "Rotation" => BuiltinSemantic::Rotation,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UniformSemantic {
    Builtin { builtin: BuiltinSemantic },
    /// A tunable parameter; `name` has any `PARAM_` prefix removed.
    Parameter { name: String },
    /// `vec4` size of a texture, such as `PassOutputSize1` or `<alias>Size`.
    TextureSize { texture: TextureSemantic },
    Unknown,
}

impl UniformSemantic {
    pub fn classify(name: &str, ty: &UniformType, parameters: &[ParameterPragma]) -> Self {
        if let Some(builtin) = BuiltinSemantic::from_name(name) {
            return UniformSemantic::Builtin { builtin };
        }
        let is_parameter = |n: &str| parameters.iter().any(|p| p.name == n);
        if let Some(stripped) = name.strip_prefix(PARAM_PREFIX) {
            if is_parameter(stripped) {
                return UniformSemantic::Parameter {
                    name: stripped.to_string(),
                };
            }
        }
        if is_parameter(name) {
            return UniformSemantic::Parameter {
                name: name.to_string(),
            };
        }
        if *ty == UniformType::Vec4 {
            if let Some(texture) = size_semantic(name) {
                return UniformSemantic::TextureSize { texture };
            }
        }
        if *ty == UniformType::Float {
            // Block members without a pragma still bind to a same-named
            // preset parameter when one exists.
            return UniformSemantic::Parameter {
                name: name.to_string(),
            };
        }
        UniformSemantic::Unknown
    }
}

/// `OriginalHistorySize2` → `OriginalHistory(2)`, `BezelSize` → `Named("Bezel")`.
fn size_semantic(name: &str) -> Option<TextureSemantic> {
    for prefix in ["OriginalHistory", "PassOutput", "PassFeedback"] {
        if let Some(index) = name
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_prefix("Size"))
            .and_then(|index| index.parse::<u32>().ok())
        {
            return Some(TextureSemantic::classify(&format!("{prefix}{index}")));
        }
    }
    let base = name.strip_suffix("Size")?;
    (!base.is_empty()).then(|| TextureSemantic::classify(base))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UniformEntry {
    pub name: String,
    pub ty: UniformType,
    pub semantic: UniformSemantic,
    pub stages: BTreeSet<Stage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SamplerEntry {
    pub name: String,
    pub semantic: TextureSemantic,
    pub stages: BTreeSet<Stage>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Manifest {
    pub uniforms: Vec<UniformEntry>,
    pub samplers: Vec<SamplerEntry>,
}

impl Manifest {
    /// Records the uniforms declared by one stage, merging with entries
    /// already seen in the other stage.
    pub fn add_stage(
        &mut self,
        stage: Stage,
        tree: &SourceTree,
        injected: &[(&str, &str)],
        parameters: &[ParameterPragma],
    ) {
        let declared = tree
            .items
            .iter()
            .filter_map(|item| item.parse_declaration())
            .filter(|decl| decl.qualifiers.iter().any(|q| q == "uniform"))
            .flat_map(|decl| {
                let ty = decl.ty;
                decl.names.into_iter().map(move |d| (d.name, ty.clone()))
            });
        let builtins = injected
            .iter()
            .map(|(name, ty)| (name.to_string(), ty.to_string()));

        for (name, ty) in declared.chain(builtins) {
            if ty.starts_with("sampler") {
                match self.samplers.iter_mut().find(|s| s.name == name) {
                    Some(entry) => {
                        entry.stages.insert(stage);
                    }
                    None => self.samplers.push(SamplerEntry {
                        semantic: TextureSemantic::classify(&name),
                        name,
                        stages: BTreeSet::from([stage]),
                    }),
                }
                continue;
            }
            match self.uniforms.iter_mut().find(|u| u.name == name) {
                Some(entry) => {
                    entry.stages.insert(stage);
                }
                None => {
                    let ty = UniformType::parse(&ty);
                    self.uniforms.push(UniformEntry {
                        semantic: UniformSemantic::classify(&name, &ty, parameters),
                        name,
                        ty,
                        stages: BTreeSet::from([stage]),
                    });
                }
            }
        }
    }

    pub fn uniform(&self, name: &str) -> Option<&UniformEntry> {
        self.uniforms.iter().find(|u| u.name == name)
    }

    pub fn sampler(&self, name: &str) -> Option<&SamplerEntry> {
        self.samplers.iter().find(|s| s.name == name)
    }
}
