use std::fs;

use camino::Utf8Path;
use serde::{Deserialize, Serialize};

use crate::error::CuratorError;

pub const CONFIG_FILE_NAME: &str = "curator.json";

/// Layout conventions of a working root. Every field has a default so a
/// partial `curator.json` is valid.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CuratorConfig {
    pub converted_dir_name: String,
    pub manifest_file_name: String,
    pub structure_suffix: String,
    pub mapping_file_name: String,
    pub project_dir_name: String,
    /// Directory levels from a structure set up to its patient directory.
    pub patient_depth: usize,
    /// Directory levels from a structure set up to the working root.
    pub project_depth: usize,
}

impl Default for CuratorConfig {
    fn default() -> Self {
        Self {
            converted_dir_name: "converted".to_string(),
            manifest_file_name: "converted.csv".to_string(),
            structure_suffix: ".nii.gz".to_string(),
            mapping_file_name: "structures_map.json".to_string(),
            project_dir_name: ".curator".to_string(),
            patient_depth: 2,
            project_depth: 4,
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads an explicit config file, or `curator.json` from the working root
    /// when present. A missing default file yields the default config.
    pub fn resolve(
        working_root: &Utf8Path,
        path: Option<&Utf8Path>,
    ) -> Result<CuratorConfig, CuratorError> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => working_root.join(CONFIG_FILE_NAME),
        };

        if path.is_none() && !config_path.as_std_path().exists() {
            return Ok(CuratorConfig::default());
        }

        let content = fs::read_to_string(config_path.as_std_path())
            .map_err(|_| CuratorError::ConfigRead(config_path.clone()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<CuratorConfig, CuratorError> {
        let config: CuratorConfig = serde_json::from_str(content)
            .map_err(|err| CuratorError::ConfigParse(err.to_string()))?;
        Self::validate(config)
    }

    fn validate(config: CuratorConfig) -> Result<CuratorConfig, CuratorError> {
        if config.converted_dir_name.is_empty() || config.converted_dir_name.contains('/') {
            return Err(CuratorError::ConfigParse(format!(
                "converted_dir_name must be a single directory name, got {:?}",
                config.converted_dir_name
            )));
        }
        if config.manifest_file_name.is_empty() || config.mapping_file_name.is_empty() {
            return Err(CuratorError::ConfigParse(
                "manifest_file_name and mapping_file_name must not be empty".to_string(),
            ));
        }
        if config.patient_depth > config.project_depth {
            return Err(CuratorError::ConfigParse(format!(
                "patient_depth ({}) must not exceed project_depth ({})",
                config.patient_depth, config.project_depth
            )));
        }
        Ok(config)
    }
}
