//! Preset text parsing.
//!
//! Functions:
//!
//! - `parse` turns preset text into a validated `PipelineDescriptor`,
//!   resolving shader and texture paths against a base directory.
//! - `load` reads a preset file from disk and parses it relative to its own
//!   directory.
//!
//! Keys are collected first (following `#reference` lines, with the
//! referencing file winning), then interpreted by pass index, so the order
//! of lines in the file never matters.
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

use crate::descriptor::{
    is_reserved_texture_name, AliasRegistry, AxisScale, FilterMode, FramebufferFormat,
    LutDescriptor, PassDescriptor, PipelineDescriptor, Sampling, ScaleRule, WrapMode,
};
use crate::parameters::ParameterTable;

/// Deepest `#reference` chain followed before giving up.
pub const MAX_REFERENCE_DEPTH: usize = 16;

const INLINE_ORIGIN: &str = "<inline preset>";

#[derive(Debug, Error)]
pub enum PresetError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{origin}:{line}: expected `key = value`, found `{text}`")]
    Syntax {
        origin: String,
        line: usize,
        text: String,
    },
    #[error("preset is missing required key `{0}`")]
    MissingKey(String),
    #[error("invalid value `{value}` for `{key}`: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: &'static str,
    },
    #[error("preset declares no passes")]
    Empty,
    #[error("pass {index} has no `shader{index}` entry")]
    MissingPass { index: usize },
    #[error("shader for pass {index} not found at {}", .path.display())]
    MissingShader { index: usize, path: PathBuf },
    #[error("lookup texture `{name}` not found at {}", .path.display())]
    MissingTexture { name: String, path: PathBuf },
    #[error("alias `{alias}` used by pass {second} is already bound to pass {first}")]
    DuplicateAlias {
        alias: String,
        first: usize,
        second: usize,
    },
    #[error("alias `{alias}` on pass {index} collides with a reserved texture name")]
    ReservedAlias { alias: String, index: usize },
    #[error("preset reference cycle through {}", .0.display())]
    ReferenceCycle(PathBuf),
    #[error("preset references nest deeper than {} levels", MAX_REFERENCE_DEPTH)]
    ReferenceDepth,
}

/// A raw value plus the directory of the file that defined it, so relative
/// paths resolve against the right preset in a `#reference` chain.
#[derive(Debug, Clone)]
struct Entry {
    value: String,
    dir: PathBuf,
}

#[derive(Debug, Default)]
struct Entries {
    map: HashMap<String, Entry>,
}

impl Entries {
    fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(|entry| entry.value.as_str())
    }

    fn entry(&self, key: &str) -> Option<&Entry> {
        self.map.get(key)
    }

    fn parsed<T: std::str::FromStr>(
        &self,
        key: &str,
        reason: &'static str,
    ) -> Result<Option<T>, PresetError> {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => raw.parse::<T>().map(Some).map_err(|_| PresetError::InvalidValue {
                key: key.to_string(),
                value: raw.to_string(),
                reason,
            }),
        }
    }

    fn flag(&self, key: &str) -> Result<Option<bool>, PresetError> {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => parse_bool(raw).map(Some).ok_or_else(|| PresetError::InvalidValue {
                key: key.to_string(),
                value: raw.to_string(),
                reason: "expected true/false",
            }),
        }
    }
}

/// Reads and parses the preset at `path`.
pub fn load(path: impl AsRef<Path>) -> Result<PipelineDescriptor, PresetError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|source| PresetError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
    let mut entries = Entries::default();
    let mut visiting = vec![canonical(path)];
    collect(
        &text,
        &path.display().to_string(),
        &base_dir,
        0,
        &mut visiting,
        &mut entries,
    )?;
    build(entries, base_dir)
}

/// Parses preset text whose relative paths resolve against `base_dir`.
pub fn parse(text: &str, base_dir: impl AsRef<Path>) -> Result<PipelineDescriptor, PresetError> {
    let base_dir = base_dir.as_ref().to_path_buf();
    let mut entries = Entries::default();
    let mut visiting = Vec::new();
    collect(text, INLINE_ORIGIN, &base_dir, 0, &mut visiting, &mut entries)?;
    build(entries, base_dir)
}

fn collect(
    text: &str,
    origin: &str,
    dir: &Path,
    depth: usize,
    visiting: &mut Vec<PathBuf>,
    entries: &mut Entries,
) -> Result<(), PresetError> {
    let mut own = Vec::new();
    for (number, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(rest) = line.strip_prefix("#reference") {
            let target = dir.join(strip_value(rest));
            follow_reference(&target, depth, visiting, entries)?;
            continue;
        }
        if line.starts_with('#') || line.starts_with("//") {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            return Err(PresetError::Syntax {
                origin: origin.to_string(),
                line: number + 1,
                text: line.to_string(),
            });
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(PresetError::Syntax {
                origin: origin.to_string(),
                line: number + 1,
                text: line.to_string(),
            });
        }
        own.push((key.to_string(), strip_value(value)));
    }

    // Keys of this file override whatever its references defined.
    for (key, value) in own {
        entries.map.insert(
            key,
            Entry {
                value,
                dir: dir.to_path_buf(),
            },
        );
    }
    Ok(())
}

fn follow_reference(
    target: &Path,
    depth: usize,
    visiting: &mut Vec<PathBuf>,
    entries: &mut Entries,
) -> Result<(), PresetError> {
    if depth + 1 > MAX_REFERENCE_DEPTH {
        return Err(PresetError::ReferenceDepth);
    }
    let key = canonical(target);
    if visiting.contains(&key) {
        return Err(PresetError::ReferenceCycle(target.to_path_buf()));
    }
    let text = fs::read_to_string(target).map_err(|source| PresetError::Read {
        path: target.to_path_buf(),
        source,
    })?;
    debug!(reference = %target.display(), depth = depth + 1, "following preset reference");
    let dir = target.parent().map(Path::to_path_buf).unwrap_or_default();
    visiting.push(key);
    let result = collect(
        &text,
        &target.display().to_string(),
        &dir,
        depth + 1,
        visiting,
        entries,
    );
    visiting.pop();
    result
}

fn build(entries: Entries, base_dir: PathBuf) -> Result<PipelineDescriptor, PresetError> {
    let count: usize = entries
        .parsed("shaders", "expected a pass count")?
        .ok_or_else(|| PresetError::MissingKey("shaders".to_string()))?;
    if count == 0 {
        return Err(PresetError::Empty);
    }

    let textures = build_textures(&entries)?;

    let mut passes = Vec::with_capacity(count);
    let mut aliases = AliasRegistry::new();
    for index in 0..count {
        let pass = build_pass(&entries, index, index + 1 == count)?;
        if let Some(alias) = &pass.alias {
            if is_reserved_texture_name(alias) || textures.iter().any(|lut| &lut.name == alias) {
                return Err(PresetError::ReservedAlias {
                    alias: alias.clone(),
                    index,
                });
            }
            aliases
                .register(alias, index)
                .map_err(|first| PresetError::DuplicateAlias {
                    alias: alias.clone(),
                    first,
                    second: index,
                })?;
        }
        passes.push(pass);
    }

    let overrides = build_overrides(&entries)?;

    debug!(
        passes = passes.len(),
        textures = textures.len(),
        overrides = overrides.len(),
        "parsed preset"
    );

    Ok(PipelineDescriptor {
        base_dir,
        passes,
        textures,
        parameters: ParameterTable::new(),
        overrides,
        aliases,
    })
}

fn build_pass(entries: &Entries, index: usize, is_final: bool) -> Result<PassDescriptor, PresetError> {
    let shader_key = format!("shader{index}");
    let entry = entries
        .entry(&shader_key)
        .ok_or(PresetError::MissingPass { index })?;
    let shader = entry.dir.join(&entry.value);
    if !shader.is_file() {
        return Err(PresetError::MissingShader {
            index,
            path: shader,
        });
    }

    let mut pass = PassDescriptor::new(index, shader);

    pass.alias = match entries.get(&format!("alias{index}")) {
        Some(alias) if !alias.is_empty() => {
            if !is_identifier(alias) {
                return Err(PresetError::InvalidValue {
                    key: format!("alias{index}"),
                    value: alias.to_string(),
                    reason: "alias must be a shader identifier",
                });
            }
            Some(alias.to_string())
        }
        _ => None,
    };

    let (scale, explicit) = build_scale(entries, index, is_final)?;
    pass.scale = scale;
    pass.scale_explicit = explicit;

    pass.sampling = Sampling {
        filter: FilterMode::from_linear_flag(
            entries.flag(&format!("filter_linear{index}"))?.unwrap_or(false),
        ),
        wrap: wrap_mode(entries, &format!("wrap_mode{index}"))?.unwrap_or_default(),
        mipmap: entries.flag(&format!("mipmap_input{index}"))?.unwrap_or(false),
    };

    let float = entries.flag(&format!("float_framebuffer{index}"))?.unwrap_or(false);
    let srgb = entries.flag(&format!("srgb_framebuffer{index}"))?.unwrap_or(false);
    pass.format = match (float, srgb) {
        (true, _) => Some(FramebufferFormat::Rgba16Float),
        (false, true) => Some(FramebufferFormat::Rgba8Srgb),
        (false, false) => None,
    };

    pass.frame_count_mod = entries
        .parsed(&format!("frame_count_mod{index}"), "expected an unsigned integer")?
        .unwrap_or(0);
    pass.feedback = entries.flag(&format!("feedback{index}"))?.unwrap_or(false);
    let depth: u32 = entries
        .parsed(&format!("feedback_depth{index}"), "expected an unsigned integer")?
        .unwrap_or(1);
    pass.feedback_depth = depth.max(1);

    Ok(pass)
}

#[derive(Clone, Copy)]
enum ScaleKind {
    Source,
    Viewport,
    Absolute,
}

fn build_scale(
    entries: &Entries,
    index: usize,
    is_final: bool,
) -> Result<(ScaleRule, bool), PresetError> {
    let both = scale_kind(entries, &format!("scale_type{index}"))?;
    let kind_x = scale_kind(entries, &format!("scale_type_x{index}"))?.or(both);
    let kind_y = scale_kind(entries, &format!("scale_type_y{index}"))?.or(both);

    if kind_x.is_none() && kind_y.is_none() {
        let rule = if is_final {
            ScaleRule::viewport()
        } else {
            ScaleRule::source()
        };
        return Ok((rule, false));
    }

    let factor_both: Option<f32> = entries.parsed(&format!("scale{index}"), "expected a number")?;
    let factor_x: Option<f32> = entries.parsed(&format!("scale_x{index}"), "expected a number")?;
    let factor_y: Option<f32> = entries.parsed(&format!("scale_y{index}"), "expected a number")?;

    let fallback = if is_final {
        AxisScale::Viewport(1.0)
    } else {
        AxisScale::Source(1.0)
    };
    let axis = |kind: Option<ScaleKind>, factor: Option<f32>| match kind {
        None => fallback,
        Some(ScaleKind::Source) => AxisScale::Source(factor.unwrap_or(1.0)),
        Some(ScaleKind::Viewport) => AxisScale::Viewport(factor.unwrap_or(1.0)),
        Some(ScaleKind::Absolute) => AxisScale::Absolute(factor.unwrap_or(1.0).round().max(1.0) as u32),
    };

    let rule = ScaleRule {
        x: axis(kind_x, factor_x.or(factor_both)),
        y: axis(kind_y, factor_y.or(factor_both)),
    };
    Ok((rule, true))
}

fn scale_kind(entries: &Entries, key: &str) -> Result<Option<ScaleKind>, PresetError> {
    let Some(raw) = entries.get(key) else {
        return Ok(None);
    };
    match raw {
        "source" => Ok(Some(ScaleKind::Source)),
        "viewport" => Ok(Some(ScaleKind::Viewport)),
        "absolute" => Ok(Some(ScaleKind::Absolute)),
        _ => Err(PresetError::InvalidValue {
            key: key.to_string(),
            value: raw.to_string(),
            reason: "expected source, viewport or absolute",
        }),
    }
}

fn wrap_mode(entries: &Entries, key: &str) -> Result<Option<WrapMode>, PresetError> {
    match entries.get(key) {
        None => Ok(None),
        Some(raw) => WrapMode::parse(raw).map(Some).ok_or_else(|| PresetError::InvalidValue {
            key: key.to_string(),
            value: raw.to_string(),
            reason: "expected clamp_to_border, clamp_to_edge, repeat or mirrored_repeat",
        }),
    }
}

fn build_textures(entries: &Entries) -> Result<Vec<LutDescriptor>, PresetError> {
    let mut textures = Vec::new();
    for name in split_list(entries.get("textures")) {
        let entry = entries
            .entry(name)
            .ok_or_else(|| PresetError::MissingKey(name.to_string()))?;
        let path = entry.dir.join(&entry.value);
        if !path.is_file() {
            return Err(PresetError::MissingTexture {
                name: name.to_string(),
                path,
            });
        }
        if is_reserved_texture_name(name) {
            return Err(PresetError::InvalidValue {
                key: "textures".to_string(),
                value: name.to_string(),
                reason: "lookup texture name collides with a reserved texture name",
            });
        }
        if textures.iter().any(|lut: &LutDescriptor| lut.name == name) {
            warn!(texture = name, "lookup texture listed twice; keeping the first entry");
            continue;
        }
        let sampling = Sampling {
            filter: FilterMode::from_linear_flag(
                entries.flag(&format!("{name}_linear"))?.unwrap_or(false),
            ),
            wrap: wrap_mode(entries, &format!("{name}_wrap_mode"))?.unwrap_or_default(),
            mipmap: entries.flag(&format!("{name}_mipmap"))?.unwrap_or(false),
        };
        textures.push(LutDescriptor {
            name: name.to_string(),
            path,
            sampling,
        });
    }
    Ok(textures)
}

fn build_overrides(entries: &Entries) -> Result<BTreeMap<String, f32>, PresetError> {
    let mut overrides = BTreeMap::new();
    for name in split_list(entries.get("parameters")) {
        match entries.parsed::<f32>(name, "expected a number")? {
            Some(value) => {
                overrides.insert(name.to_string(), value);
            }
            None => warn!(parameter = name, "parameter listed without a value; ignoring"),
        }
    }
    Ok(overrides)
}

fn split_list(raw: Option<&str>) -> impl Iterator<Item = &str> {
    raw.unwrap_or_default()
        .split(';')
        .map(str::trim)
        .filter(|item| !item.is_empty())
}

/// Strips surrounding quotes, or trailing comments from unquoted values.
fn strip_value(raw: &str) -> String {
    let raw = raw.trim();
    if let Some(rest) = raw.strip_prefix('"') {
        return match rest.find('"') {
            Some(end) => rest[..end].to_string(),
            None => rest.trim().to_string(),
        };
    }
    let mut end = raw.len();
    if let Some(pos) = raw.find('#') {
        end = end.min(pos);
    }
    if let Some(pos) = raw.find("//") {
        end = end.min(pos);
    }
    raw[..end].trim().to_string()
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn canonical(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
