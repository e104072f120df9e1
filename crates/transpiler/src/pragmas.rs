//! Metadata pragmas carried by pass sources.
//!
//! `#pragma parameter`, `#pragma name` and `#pragma format` are collected
//! and removed from the tree along with the source dialect's `#version` and
//! `#extension` lines. Stage pragmas are left for the stage split.
use serde::Serialize;
use tracing::warn;

use crate::syntax::{ItemKind, SourceTree};

/// A `#pragma parameter NAME "Label" default min max [step]` declaration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterPragma {
    pub name: String,
    pub label: String,
    pub default: f32,
    pub min: f32,
    pub max: f32,
    pub step: f32,
}

/// Render-target storage requested by `#pragma format`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FormatPragma {
    Rgba8Unorm,
    Rgba8Srgb,
    Rgba16Float,
    Rgba32Float,
}

impl FormatPragma {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "R8G8B8A8_UNORM" => Some(FormatPragma::Rgba8Unorm),
            "R8G8B8A8_SRGB" => Some(FormatPragma::Rgba8Srgb),
            "R16G16B16A16_SFLOAT" => Some(FormatPragma::Rgba16Float),
            "R32G32B32A32_SFLOAT" => Some(FormatPragma::Rgba32Float),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Pragmas {
    pub parameters: Vec<ParameterPragma>,
    pub name: Option<String>,
    pub format: Option<FormatPragma>,
}

impl Pragmas {
    pub fn parameter(&self, name: &str) -> Option<&ParameterPragma> {
        self.parameters.iter().find(|param| param.name == name)
    }
}

/// Collects metadata pragmas and strips lines the target dialect rejects.
pub fn extract(tree: &mut SourceTree) -> Pragmas {
    let mut pragmas = Pragmas::default();
    tree.items.retain(|item| {
        if item.kind != ItemKind::Directive {
            return true;
        }
        let Some((name, rest)) = item.directive() else {
            return true;
        };
        match name.as_str() {
            "version" | "extension" => false,
            "pragma" => {
                let (kind, args) = rest
                    .split_once(char::is_whitespace)
                    .unwrap_or((rest.as_str(), ""));
                match kind {
                    "parameter" => {
                        match parse_parameter(args) {
                            Some(param) => {
                                if pragmas.parameter(&param.name).is_none() {
                                    pragmas.parameters.push(param);
                                }
                            }
                            None => warn!(pragma = %rest, "ignoring malformed parameter pragma"),
                        }
                        false
                    }
                    "name" => {
                        let alias = args.trim();
                        if !alias.is_empty() {
                            pragmas.name.get_or_insert_with(|| alias.to_string());
                        }
                        false
                    }
                    "format" => {
                        let format = args.trim();
                        match FormatPragma::parse(format) {
                            Some(parsed) => pragmas.format = Some(parsed),
                            None => {
                                warn!(format, "unsupported framebuffer format; using RGBA8");
                            }
                        }
                        false
                    }
                    _ => true,
                }
            }
            _ => true,
        }
    });
    pragmas
}

fn parse_parameter(args: &str) -> Option<ParameterPragma> {
    let args = args.trim();
    let name_end = args.find(char::is_whitespace).unwrap_or(args.len());
    let name = &args[..name_end];
    if name.is_empty() {
        return None;
    }
    let rest = args[name_end..].trim_start();
    let (label, numbers) = match rest.strip_prefix('"') {
        Some(quoted) => {
            let end = quoted.find('"')?;
            (quoted[..end].to_string(), &quoted[end + 1..])
        }
        None => (name.to_string(), rest),
    };
    let values: Vec<f32> = numbers
        .split_whitespace()
        .map(str::parse::<f32>)
        .collect::<Result<_, _>>()
        .ok()?;
    if values.len() < 3 {
        return None;
    }
    let (min, max) = if values[1] <= values[2] {
        (values[1], values[2])
    } else {
        (values[2], values[1])
    };
    Some(ParameterPragma {
        name: name.to_string(),
        label,
        default: values[0],
        min,
        max,
        step: values.get(3).copied().unwrap_or(0.0),
    })
}
