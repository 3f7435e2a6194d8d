use berth_core::CompileOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "berth.toml";
pub const DEFAULT_OUTPUT_DIR: &str = "manifests";

/// Contents of `berth.toml`. Every table is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BerthConfig {
    pub compile: CompileOptions,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    pub dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
        }
    }
}

impl BerthConfig {
    pub fn parse(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| format!("config error: invalid {CONFIG_FILE_NAME}: {e}"))
    }

    pub fn load(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("config error: failed to read {}: {e}", path.display()))?;
        Self::parse(&content)
    }

    /// Load the explicit `--config` file, or `berth.toml` from the working
    /// directory when it exists. No file means defaults.
    pub fn discover(explicit: Option<&Path>) -> Result<Self, String> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        let local = Path::new(CONFIG_FILE_NAME);
        if local.is_file() {
            tracing::debug!(path = %local.display(), "using local config");
            Self::load(local)
        } else {
            Ok(Self::default())
        }
    }
}
