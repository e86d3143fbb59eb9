//! Optional TOML file supplying defaults for command-line flags.

use crate::CoreError;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const CONFIG_ENV: &str = "OCI_IMAGE_TOOL_CONFIG";
const CONFIG_DIR: &str = "oci-image-tool";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolSettings {
    /// Reference used when `--ref` is not given.
    pub default_ref: String,
    /// Bundle subdirectory receiving the root filesystem.
    pub rootfs: String,
    /// Log filter directive, overridden by the environment.
    pub log: Option<String>,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            default_ref: "v1.0".to_owned(),
            rootfs: "rootfs".to_owned(),
            log: None,
        }
    }
}

/// Load settings from `explicit`, then `$OCI_IMAGE_TOOL_CONFIG`, then the
/// per-user default location. Only a missing default file is tolerated.
pub fn load_settings(explicit: Option<&Path>) -> Result<ToolSettings, CoreError> {
    if let Some(path) = explicit {
        return load_settings_from(path, true);
    }
    if let Some(path) = std::env::var_os(CONFIG_ENV).filter(|v| !v.is_empty()) {
        return load_settings_from(Path::new(&path), true);
    }
    match default_path() {
        Some(path) => load_settings_from(&path, false),
        None => Ok(ToolSettings::default()),
    }
}

fn default_path() -> Option<PathBuf> {
    let base = std::env::var_os("XDG_CONFIG_HOME")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))?;
    Some(base.join(CONFIG_DIR).join(CONFIG_FILE))
}

pub fn load_settings_from(path: &Path, required: bool) -> Result<ToolSettings, CoreError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && !required => {
            debug!("no settings file at {}", path.display());
            return Ok(ToolSettings::default());
        }
        Err(e) => return Err(CoreError::Config(format!("{}: {e}", path.display()))),
    };
    let settings: ToolSettings = toml::from_str(&content)
        .map_err(|e| CoreError::Config(format!("{}: {e}", path.display())))?;
    if settings.default_ref.is_empty() || settings.rootfs.is_empty() {
        return Err(CoreError::Config(format!(
            "{}: default_ref and rootfs must not be empty",
            path.display()
        )));
    }
    debug!("loaded settings from {}", path.display());
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn missing_default_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings_from(&dir.path().join("config.toml"), false).unwrap();
        assert_eq!(settings, ToolSettings::default());
        assert_eq!(settings.default_ref, "v1.0");
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_settings(Some(&dir.path().join("nope.toml"))).unwrap_err();
        assert!(matches!(err, CoreError::Config(_)));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "default_ref = \"latest\"\nlog = \"debug\"\n").unwrap();
        let settings = load_settings(Some(&path)).unwrap();
        assert_eq!(settings.default_ref, "latest");
        assert_eq!(settings.rootfs, "rootfs");
        assert_eq!(settings.log.as_deref(), Some("debug"));
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "default_ref = [").unwrap();
        assert!(matches!(load_settings(Some(&path)), Err(CoreError::Config(_))));
        fs::write(&path, "unknown_key = 1").unwrap();
        assert!(matches!(load_settings(Some(&path)), Err(CoreError::Config(_))));
        fs::write(&path, "rootfs = \"\"").unwrap();
        assert!(matches!(load_settings(Some(&path)), Err(CoreError::Config(_))));
    }
}
