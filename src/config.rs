//! Runtime configuration loaded from `shark.json`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;

/// File name searched for next to the script and in the working directory.
pub const CONFIG_FILE: &str = "shark.json";

pub const DEFAULT_STACK_SIZE: usize = 2048;
pub const DEFAULT_GLOBALS_SIZE: usize = 65536;
pub const DEFAULT_MAX_FRAMES: usize = 1024;
pub const DEFAULT_CACHE_SIZE: usize = 1024;
pub const DEFAULT_CACHE_TTL_MS: u64 = 60_000;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    pub vm: VmConfig,
}

/// Capacities of the virtual machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VmConfig {
    /// Operand stack slots.
    pub stack_size: usize,
    /// Global variable slots.
    pub globals_size: usize,
    /// Deepest call nesting allowed.
    pub max_frames: usize,
    /// Memoized call results kept; 0 turns memoization off.
    pub cache_size: usize,
    pub cache_ttl_ms: u64,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            stack_size: DEFAULT_STACK_SIZE,
            globals_size: DEFAULT_GLOBALS_SIZE,
            max_frames: DEFAULT_MAX_FRAMES,
            cache_size: DEFAULT_CACHE_SIZE,
            cache_ttl_ms: DEFAULT_CACHE_TTL_MS,
        }
    }
}

impl VmConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    /// Replace capacities that cannot be zero with their defaults.
    fn normalized(mut self) -> Self {
        if self.stack_size == 0 {
            self.stack_size = DEFAULT_STACK_SIZE;
        }
        if self.globals_size == 0 {
            self.globals_size = DEFAULT_GLOBALS_SIZE;
        }
        if self.max_frames == 0 {
            self.max_frames = DEFAULT_MAX_FRAMES;
        }
        self
    }
}

impl Config {
    pub fn from_json(path: &Path, text: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Config {
            vm: config.vm.normalized(),
        })
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_json(path, &text)?;
        debug!(target: "shark::config", path = %path.display(), ?config, "loaded config");
        Ok(config)
    }

    /// Resolve the configuration for a run: an explicit path wins, then a
    /// `shark.json` beside the script, then one in the working directory.
    pub fn locate(explicit: Option<&Path>, script: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        for candidate in candidates(script) {
            if candidate.is_file() {
                return Self::from_file(&candidate);
            }
        }

        debug!(target: "shark::config", "no config file, using defaults");
        Ok(Self::default())
    }
}

fn candidates(script: Option<&Path>) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(dir) = script.and_then(Path::parent) {
        paths.push(dir.join(CONFIG_FILE));
    }
    paths.push(PathBuf::from(CONFIG_FILE));
    paths
}
