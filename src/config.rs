//! Runtime configuration

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::driver::DISABLE_DEVICE_ID_CHECK_ENV;
use crate::util::Result;

/// Default number of primitives a build worker prepares per claimed chunk.
pub const DEFAULT_BUILD_CHUNK_SIZE: usize = 1024;

/// Settings read once when a [`crate::dispatch::BuilderContext`] is created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Skip the device id allow-list and report format V1 for any Intel device.
    /// Meant for bring-up of unreleased hardware only.
    pub disable_device_id_check: bool,

    // Internal builder
    pub build_chunk_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            disable_device_id_check: false,
            build_chunk_size: DEFAULT_BUILD_CHUNK_SIZE,
        }
    }
}

impl Config {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Defaults with overrides taken from `lookup` instead of the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();
        cfg.apply_lookup(lookup);
        cfg
    }

    /// Read a JSON settings file. Missing keys keep their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let mut cfg: Self = serde_json::from_str(&text)?;
        if cfg.build_chunk_size == 0 {
            cfg.build_chunk_size = DEFAULT_BUILD_CHUNK_SIZE;
        }
        Ok(cfg)
    }

    /// Write the settings as pretty JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Layer the process environment on top of these settings.
    pub fn with_env_overrides(mut self) -> Self {
        self.apply_lookup(|k| std::env::var(k).ok());
        self
    }

    fn apply_lookup(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        // only an exact "1" enables the override
        if lookup(DISABLE_DEVICE_ID_CHECK_ENV).as_deref() == Some("1") {
            self.disable_device_id_check = true;
        }
    }
}
