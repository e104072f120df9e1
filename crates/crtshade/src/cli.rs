use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use transpiler::Dialect;

#[derive(Parser, Debug)]
#[command(
    name = "crtshade",
    author,
    version,
    about = "Developer tooling for multi-pass CRT shader presets"
)]
pub struct Cli {
    /// Log at debug level (RUST_LOG still wins when set).
    #[arg(long, short, global = true)]
    pub verbose: bool,

    /// Config file to read instead of the one in the user config directory.
    #[arg(long, value_name = "PATH", env = "CRTSHADE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the pass table, aliases, lookup textures and overrides of a preset.
    Inspect(InspectArgs),
    /// Transpile every pass of a preset and write the GLSL ES stages to disk.
    Transpile(TranspileArgs),
    /// List the parameters a preset resolves to.
    Params(ParamsArgs),
}

#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Preset file (`.slangp`); relative paths also resolve against `shader_root`.
    #[arg(value_name = "PRESET")]
    pub preset: PathBuf,

    /// Emit the parsed descriptor as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct TranspileArgs {
    #[arg(value_name = "PRESET")]
    pub preset: PathBuf,

    /// Target dialect: `gles300` or `gles100`.
    #[arg(long, value_name = "DIALECT", value_parser = parse_dialect)]
    pub dialect: Option<Dialect>,

    /// Directory receiving `passN.vert`, `passN.frag` and `passN.json`.
    #[arg(long, value_name = "DIR")]
    pub out: Option<PathBuf>,

    /// Keep explicit LOD and bias arguments on texture lookups.
    #[arg(long)]
    pub preserve_lod: bool,
}

#[derive(Args, Debug)]
pub struct ParamsArgs {
    #[arg(value_name = "PRESET")]
    pub preset: PathBuf,

    /// Emit the parameter table as JSON.
    #[arg(long)]
    pub json: bool,
}

pub fn parse() -> Cli {
    Cli::parse()
}

fn parse_dialect(value: &str) -> Result<Dialect, String> {
    value.parse()
}
