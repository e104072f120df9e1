use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use preset::{AxisScale, FramebufferFormat, ParameterTable, PassDescriptor, PipelineDescriptor, Sampling};
use renderer::declare_parameters;
use serde::Serialize;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;
use transpiler::{
    transpile_file, IncludePool, RuleOutcome, ShaderUnit, Stage, TranspileError, TranspileOptions,
};

use crate::cli::{Cli, Command, InspectArgs, ParamsArgs, TranspileArgs};
use crate::config::FileConfig;
use crate::paths::AppPaths;

pub fn run(cli: Cli) -> Result<()> {
    initialise_tracing(cli.verbose);

    let paths = AppPaths::discover()?;
    let config_path = match cli.config {
        Some(path) => {
            if !path.exists() {
                bail!("config file {} does not exist", path.display());
            }
            path
        }
        None => paths.config_file(),
    };
    let config = FileConfig::load_or_default(&config_path)?;
    debug!(
        config = %config_path.display(),
        cache = %paths.cache_dir().display(),
        ?config,
        "resolved crtshade settings"
    );

    match cli.command {
        Command::Inspect(args) => inspect(&config, &args),
        Command::Transpile(args) => transpile(&config, &paths, &args),
        Command::Params(args) => params(&config, &args),
    }
}

fn initialise_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    // stdout carries listings and JSON.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_descriptor(config: &FileConfig, preset: &Path) -> Result<(PathBuf, PipelineDescriptor)> {
    let path = config.preset_path(preset);
    let descriptor =
        preset::load(&path).with_context(|| format!("failed to load preset {}", path.display()))?;
    Ok((path, descriptor))
}

/// Transpiles every pass through one include pool.
fn transpile_passes(
    descriptor: &PipelineDescriptor,
    options: &TranspileOptions,
) -> Vec<Result<ShaderUnit, TranspileError>> {
    let mut pool = IncludePool::filesystem();
    descriptor
        .passes
        .iter()
        .map(|pass| transpile_file(&pass.shader, &mut pool, options))
        .collect()
}

/// Declares pragma parameters in pass order and applies the preset overrides.
fn resolve_parameters(
    descriptor: &PipelineDescriptor,
    units: &[Result<ShaderUnit, TranspileError>],
) -> ParameterTable {
    let mut table = ParameterTable::new();
    for unit in units.iter().flatten() {
        declare_parameters(&mut table, &unit.parameters);
    }
    for (name, value) in &descriptor.overrides {
        if !table.apply_override(name, *value) {
            warn!(parameter = %name, "override names no declared parameter");
        }
    }
    table
}

fn inspect(config: &FileConfig, args: &InspectArgs) -> Result<()> {
    let (path, mut descriptor) = load_descriptor(config, &args.preset)?;
    let units = transpile_passes(&descriptor, &TranspileOptions::new(config.dialect(None)));
    descriptor.parameters = resolve_parameters(&descriptor, &units);

    if args.json {
        let json = serde_json::to_string_pretty(&descriptor).context("failed to serialise preset")?;
        println!("{json}");
        return Ok(());
    }

    println!("preset  {}", path.display());
    println!("passes  {}", descriptor.pass_count());
    println!(
        "  {:>2}  {:<32} {:<14} {:<24} {:<28} {:<12} {}",
        "#", "shader", "alias", "scale", "sampling", "format", "feedback"
    );
    for (pass, unit) in descriptor.passes.iter().zip(&units) {
        let alias = pass
            .alias
            .clone()
            .or_else(|| unit.as_ref().ok().and_then(|unit| unit.name.clone()))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {:>2}  {:<32} {:<14} {:<24} {:<28} {:<12} {}",
            pass.index,
            relative(&descriptor.base_dir, &pass.shader),
            alias,
            scale_label(pass),
            sampling_label(&pass.sampling),
            format_label(pass, unit.as_ref().ok()),
            feedback_label(pass),
        );
        if let Err(err) = unit {
            println!("      transpile failed: {err}");
        }
    }

    if !descriptor.textures.is_empty() {
        println!("textures");
        for lut in &descriptor.textures {
            println!(
                "  {:<16} {:<40} {}",
                lut.name,
                relative(&descriptor.base_dir, &lut.path),
                sampling_label(&lut.sampling)
            );
        }
    }
    if !descriptor.aliases.is_empty() {
        println!("aliases");
        for (alias, index) in descriptor.aliases.iter() {
            println!("  {alias:<16} pass {index}");
        }
    }
    if !descriptor.parameters.is_empty() {
        println!("parameters");
        for value in descriptor.parameters.iter() {
            println!("  {:<24} {}", value.name, value.current);
        }
    }
    Ok(())
}

fn transpile(config: &FileConfig, paths: &AppPaths, args: &TranspileArgs) -> Result<()> {
    let (path, descriptor) = load_descriptor(config, &args.preset)?;
    let options = TranspileOptions {
        dialect: config.dialect(args.dialect),
        preserve_lod: args.preserve_lod,
    };
    let out = config.output_dir(args.out.as_deref(), || paths.transpile_dir(&path));
    fs::create_dir_all(&out)
        .with_context(|| format!("failed to create output directory {}", out.display()))?;

    let units = transpile_passes(&descriptor, &options);
    let mut failed = 0;
    for (pass, unit) in descriptor.passes.iter().zip(&units) {
        let shader = relative(&descriptor.base_dir, &pass.shader);
        match unit {
            Ok(unit) => {
                write_unit(&out, pass.index, unit)?;
                println!("pass {}  {shader}  ->  pass{}.{{vert,frag,json}}", pass.index, pass.index);
                for report in &unit.rules {
                    println!("    {:<28} {}", report.rule, outcome_label(&report.outcome));
                }
            }
            Err(err) => {
                failed += 1;
                warn!(pass = pass.index, shader = %pass.shader.display(), error = %err, "pass failed to transpile");
                println!("pass {}  {shader}  FAILED: {err}", pass.index);
            }
        }
    }
    println!(
        "{} of {} passes transpiled ({}) into {}, {failed} failed",
        units.len() - failed,
        units.len(),
        options.dialect,
        out.display()
    );
    Ok(())
}

fn write_unit(out: &Path, index: usize, unit: &ShaderUnit) -> Result<()> {
    let manifest = serde_json::to_string_pretty(unit).context("failed to serialise manifest")?;
    let files = [
        (format!("pass{index}.vert"), unit.source(Stage::Vertex).to_string()),
        (format!("pass{index}.frag"), unit.source(Stage::Fragment).to_string()),
        (format!("pass{index}.json"), manifest),
    ];
    for (name, contents) in files {
        let path = out.join(name);
        fs::write(&path, contents).with_context(|| format!("failed to write {}", path.display()))?;
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct ParameterRow<'a> {
    name: &'a str,
    label: &'a str,
    current: f32,
    default: f32,
    min: f32,
    max: f32,
    step: f32,
    #[serde(rename = "override")]
    preset_override: Option<f32>,
}

fn params(config: &FileConfig, args: &ParamsArgs) -> Result<()> {
    let (_, descriptor) = load_descriptor(config, &args.preset)?;
    let units = transpile_passes(&descriptor, &TranspileOptions::new(config.dialect(None)));
    for (pass, unit) in descriptor.passes.iter().zip(&units) {
        if let Err(err) = unit {
            warn!(pass = pass.index, error = %err, "parameters of this pass are unavailable");
        }
    }
    let table = resolve_parameters(&descriptor, &units);
    let rows: Vec<ParameterRow<'_>> = table
        .iter()
        .map(|value| ParameterRow {
            name: &value.name,
            label: &value.label,
            current: value.current,
            default: value.default,
            min: value.min,
            max: value.max,
            step: value.step,
            preset_override: descriptor.overrides.get(&value.name).copied(),
        })
        .collect();

    if args.json {
        let json = serde_json::to_string_pretty(&rows).context("failed to serialise parameters")?;
        println!("{json}");
        return Ok(());
    }

    println!(
        "{:<24} {:>8} {:>8} {:>8} {:>8} {:>8}  {:<9} {}",
        "name", "current", "default", "min", "max", "step", "override", "label"
    );
    for row in &rows {
        let preset_override = row
            .preset_override
            .map(|value| value.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<24} {:>8} {:>8} {:>8} {:>8} {:>8}  {:<9} {}",
            row.name, row.current, row.default, row.min, row.max, row.step, preset_override, row.label
        );
    }
    Ok(())
}

fn relative(base: &Path, path: &Path) -> String {
    path.strip_prefix(base).unwrap_or(path).display().to_string()
}

fn axis_label(axis: AxisScale) -> String {
    match axis {
        AxisScale::Source(factor) => format!("source*{factor}"),
        AxisScale::Viewport(factor) => format!("viewport*{factor}"),
        AxisScale::Absolute(pixels) => format!("{pixels}px"),
    }
}

fn scale_label(pass: &PassDescriptor) -> String {
    let label = if pass.scale.x == pass.scale.y {
        axis_label(pass.scale.x)
    } else {
        format!("{} x {}", axis_label(pass.scale.x), axis_label(pass.scale.y))
    };
    if pass.scale_explicit {
        label
    } else {
        format!("{label} (default)")
    }
}

fn sampling_label(sampling: &Sampling) -> String {
    let filter = serde_plain(&sampling.filter);
    let wrap = serde_plain(&sampling.wrap);
    if sampling.mipmap {
        format!("{filter} {wrap} mipmap")
    } else {
        format!("{filter} {wrap}")
    }
}

fn format_label(pass: &PassDescriptor, unit: Option<&ShaderUnit>) -> String {
    match (pass.format, unit.and_then(|unit| unit.format)) {
        (Some(format), _) => serde_plain(&format),
        (None, Some(pragma)) => format!("{pragma:?} (pragma)"),
        (None, None) => serde_plain(&FramebufferFormat::default()),
    }
}

fn feedback_label(pass: &PassDescriptor) -> String {
    if pass.feedback {
        format!("yes ({})", pass.feedback_depth)
    } else {
        "no".to_string()
    }
}

fn outcome_label(outcome: &RuleOutcome) -> String {
    match outcome {
        RuleOutcome::Applied { rewrites } => format!("applied ({rewrites})"),
        RuleOutcome::NotApplicable => "not applicable".to_string(),
        RuleOutcome::Skipped { reason } => format!("skipped: {reason}"),
    }
}

/// The serde name of a unit enum variant, e.g. `clamp_to_edge`.
fn serde_plain<T: Serialize>(value: &T) -> String {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::String(name)) => name,
        _ => "?".to_string(),
    }
}
