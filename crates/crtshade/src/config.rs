//! Optional `config.toml` and its merge with command-line flags.
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use transpiler::Dialect;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub dialect: Option<Dialect>,
    pub output_dir: Option<PathBuf>,
    /// Directory relative preset paths fall back to.
    pub shader_root: Option<PathBuf>,
}

impl FileConfig {
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("failed to read config file at {}", path.display()))?;
            let config: Self = toml::from_str(&contents)
                .with_context(|| format!("failed to parse config file at {}", path.display()))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Picks the dialect: flag, then file, then the default.
    pub fn dialect(&self, flag: Option<Dialect>) -> Dialect {
        flag.or(self.dialect).unwrap_or_default()
    }

    pub fn output_dir(&self, flag: Option<&Path>, fallback: impl FnOnce() -> PathBuf) -> PathBuf {
        flag.map(Path::to_path_buf)
            .or_else(|| self.output_dir.clone())
            .unwrap_or_else(fallback)
    }

    /// Resolves a preset argument. Paths that exist as given win; relative
    /// ones that don't are tried under `shader_root`.
    pub fn preset_path(&self, preset: &Path) -> PathBuf {
        if preset.is_relative() && !preset.exists() {
            if let Some(root) = &self.shader_root {
                let candidate = root.join(preset);
                if candidate.exists() {
                    return candidate;
                }
            }
        }
        preset.to_path_buf()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = FileConfig::load_or_default(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config, FileConfig::default());
        assert_eq!(config.dialect(None), Dialect::Gles300);
    }

    #[test]
    fn flags_win_over_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "dialect = \"gles100\"\noutput_dir = \"/tmp/passes\"\n").unwrap();
        let config = FileConfig::load_or_default(&path).unwrap();

        assert_eq!(config.dialect(None), Dialect::Gles100);
        assert_eq!(config.dialect(Some(Dialect::Gles300)), Dialect::Gles300);
        assert_eq!(
            config.output_dir(None, || PathBuf::from("unused")),
            PathBuf::from("/tmp/passes")
        );
        assert_eq!(
            config.output_dir(Some(Path::new("out")), || PathBuf::from("unused")),
            PathBuf::from("out")
        );
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "dialekt = \"gles100\"\n").unwrap();
        let err = FileConfig::load_or_default(&path).unwrap_err();
        assert!(format!("{err:#}").contains("failed to parse config file"));
    }

    #[test]
    fn relative_presets_fall_back_to_shader_root() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("crt")).unwrap();
        fs::write(dir.path().join("crt/zfast.slangp"), "shaders = 0\n").unwrap();
        let config = FileConfig {
            shader_root: Some(dir.path().to_path_buf()),
            ..FileConfig::default()
        };

        assert_eq!(
            config.preset_path(Path::new("crt/zfast.slangp")),
            dir.path().join("crt/zfast.slangp")
        );
        assert_eq!(
            config.preset_path(Path::new("crt/missing.slangp")),
            PathBuf::from("crt/missing.slangp")
        );
    }
}
