//! Configuration management.
//!
//! Sectioned TOML configuration covering the sensor parameters, output
//! storage and digital line assignments. Values mirror what the operator
//! layer exposes; the session reads them once at open time and the mutable
//! subset (mode, codec, recording flag, ROI) moves through the session API.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::TrialCamError;
use crate::types::{Codec, RecordingMode};

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialCamConfig {
    pub acquisition: AcquisitionConfig,
    pub storage: StorageConfig,
    pub lines: LineConfig,
}

/// Sensor and recording parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Frames per second requested from the sensor and written to containers.
    pub fps: f64,
    /// Analog gain in dB.
    pub gain_db: f64,
    /// Exposure time in milliseconds; clamped to the frame period at begin.
    pub exposure_ms: f64,
    /// Display rotation in degrees (0, 90, 180, 270).
    pub rotation_degrees: u32,
    pub mode: RecordingMode,
    pub codec: Codec,
}

/// Output file placement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Base directory for trial outputs.
    pub output_directory: String,
    /// Optional sub-folder created under the base directory.
    pub folder_name: Option<String>,
}

/// Digital input line assignments on the sensor head.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineConfig {
    pub trigger_line: u8,
    pub sync_line: u8,
}

impl Default for TrialCamConfig {
    fn default() -> Self {
        Self {
            acquisition: AcquisitionConfig {
                fps: 30.0,
                gain_db: 1.0,
                exposure_ms: 15.0,
                rotation_degrees: 270,
                mode: RecordingMode::Continuous,
                codec: Codec::Raw,
            },
            storage: StorageConfig {
                output_directory: ".".to_string(),
                folder_name: None,
            },
            lines: LineConfig {
                trigger_line: 0,
                sync_line: 2,
            },
        }
    }
}

impl TrialCamConfig {
    /// Load configuration from a TOML file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, TrialCamError> {
        let contents = fs::read_to_string(&path).map_err(|e| {
            TrialCamError::ConfigError(format!(
                "failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        let config: TrialCamConfig = toml::from_str(&contents).map_err(|e| {
            TrialCamError::ConfigError(format!("failed to parse config: {}", e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), TrialCamError> {
        let toml_string = toml::to_string_pretty(self).map_err(|e| {
            TrialCamError::ConfigError(format!("failed to serialize config: {}", e))
        })?;
        fs::write(&path, toml_string).map_err(|e| {
            TrialCamError::ConfigError(format!(
                "failed to write config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        PathBuf::from("trialcam.toml")
    }

    pub fn validate(&self) -> Result<(), TrialCamError> {
        if self.acquisition.fps <= 0.0 {
            return Err(TrialCamError::ConfigError(format!(
                "fps must be positive, got {}",
                self.acquisition.fps
            )));
        }
        if crate::types::Rotation::from_degrees(self.acquisition.rotation_degrees).is_none() {
            return Err(TrialCamError::ConfigError(format!(
                "rotation must be one of 0/90/180/270, got {}",
                self.acquisition.rotation_degrees
            )));
        }
        if self.lines.trigger_line == self.lines.sync_line {
            return Err(TrialCamError::ConfigError(
                "trigger and sync lines must differ".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve the output directory, appending the configured sub-folder and
    /// creating the path on demand.
    pub fn resolve_output_dir(&self) -> Result<PathBuf, TrialCamError> {
        let mut dir = PathBuf::from(&self.storage.output_directory);
        if let Some(folder) = self
            .storage
            .folder_name
            .as_deref()
            .map(str::trim)
            .filter(|f| !f.is_empty())
        {
            if !dir.ends_with(folder) {
                dir.push(folder);
            }
        }
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|e| {
                TrialCamError::ConfigError(format!(
                    "failed to create output directory {}: {}",
                    dir.display(),
                    e
                ))
            })?;
        }
        Ok(dir)
    }
}
