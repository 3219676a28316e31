//! Runtime configuration.
//!
//! Loads an optional `a68.toml` the way the source workspace's own
//! `core-config` discovers its own file: current working directory
//! first, then the platform config directory, both best-effort. Unknown
//! keys are ignored; a missing or unparsable file falls back to built-in
//! defaults rather than failing the run.

use std::{fs, path::PathBuf};

use anyhow::Result;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct StackConfig {
    #[serde(default = "StackConfig::default_eval_slots")]
    pub eval_slots: usize,
    #[serde(default = "StackConfig::default_frame_slots")]
    pub frame_slots: usize,
}

impl StackConfig {
    const fn default_eval_slots() -> usize {
        1 << 16
    }
    const fn default_frame_slots() -> usize {
        1 << 12
    }
}

impl Default for StackConfig {
    fn default() -> Self {
        Self { eval_slots: Self::default_eval_slots(), frame_slots: Self::default_frame_slots() }
    }
}

/// Default decimal-digit precision for `LONG`/`LONG LONG` multi-precision
/// values, rescaled into a digit count by `core_mp::digits_for_precision`.
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct PrecisionConfig {
    #[serde(default = "PrecisionConfig::default_long")]
    pub long_decimal_digits: usize,
    #[serde(default = "PrecisionConfig::default_long_long")]
    pub long_long_decimal_digits: usize,
}

impl PrecisionConfig {
    const fn default_long() -> usize {
        14
    }
    const fn default_long_long() -> usize {
        30
    }
}

impl Default for PrecisionConfig {
    fn default() -> Self {
        Self { long_decimal_digits: Self::default_long(), long_long_decimal_digits: Self::default_long_long() }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, Default)]
pub struct DiagnosticsConfig {
    /// `None` disables suppression; matches `core_diagnostics::Sink::new`.
    #[serde(default)]
    pub error_threshold: Option<u32>,
}

#[derive(Debug, Deserialize, Clone, Copy, Default)]
pub struct DispatchConfig {
    #[serde(default)]
    pub log_respecialization: bool,
}

#[derive(Debug, Deserialize, Default, Clone, Copy)]
pub struct ConfigFile {
    #[serde(default)]
    pub stack: StackConfig,
    #[serde(default)]
    pub precision: PrecisionConfig,
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub raw: Option<String>,
    pub file: ConfigFile,
}

/// Best-effort config path: `./a68.toml` first, else the platform config
/// directory, falling back to the bare relative filename if neither
/// resolves to an existing file.
pub fn discover() -> PathBuf {
    let local = PathBuf::from("a68.toml");
    if local.exists() {
        return local;
    }
    if let Some(dir) = dirs::config_dir() {
        return dir.join("a68").join("a68.toml");
    }
    PathBuf::from("a68.toml")
}

pub fn load_from(path: Option<PathBuf>) -> Result<Config> {
    let path = path.unwrap_or_else(discover);
    match fs::read_to_string(&path) {
        Ok(content) => match toml::from_str::<ConfigFile>(&content) {
            Ok(file) => Ok(Config { raw: Some(content), file }),
            Err(error) => {
                tracing::warn!(%error, path = %path.display(), "a68.toml failed to parse, using defaults");
                Ok(Config::default())
            }
        },
        Err(_) => Ok(Config::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_when_missing_file() {
        let cfg = load_from(Some(PathBuf::from("__nonexistent_a68_config__.toml"))).unwrap();
        assert_eq!(cfg.file.stack.eval_slots, StackConfig::default_eval_slots());
        assert_eq!(cfg.file.diagnostics.error_threshold, None);
    }

    #[test]
    fn parses_declared_sections() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(
            tmp.path(),
            "[stack]\neval_slots = 4096\n[precision]\nlong_decimal_digits = 20\n[diagnostics]\nerror_threshold = 10\n[dispatch]\nlog_respecialization = true\n",
        )
        .unwrap();
        let cfg = load_from(Some(tmp.path().to_path_buf())).unwrap();
        assert_eq!(cfg.file.stack.eval_slots, 4096);
        assert_eq!(cfg.file.stack.frame_slots, StackConfig::default_frame_slots());
        assert_eq!(cfg.file.precision.long_decimal_digits, 20);
        assert_eq!(cfg.file.diagnostics.error_threshold, Some(10));
        assert!(cfg.file.dispatch.log_respecialization);
    }

    #[test]
    fn unparsable_file_falls_back_to_defaults() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), "not valid toml {{{").unwrap();
        let cfg = load_from(Some(tmp.path().to_path_buf())).unwrap();
        assert_eq!(cfg.file.stack.eval_slots, StackConfig::default_eval_slots());
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), "[stack]\neval_slots = 99\nfuture_field = true\n").unwrap();
        let cfg = load_from(Some(tmp.path().to_path_buf())).unwrap();
        assert_eq!(cfg.file.stack.eval_slots, 99);
    }
}
