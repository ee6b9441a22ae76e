use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use clap::ValueEnum;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::CuratorError;

pub const RTSTRUCT: &str = "RTSTRUCT";

static DATASET_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").expect("dataset name pattern"));

/// Name of a dataset directory living next to the converted pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetName(String);

impl DatasetName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DatasetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DatasetName {
    type Err = CuratorError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if !DATASET_NAME.is_match(trimmed) {
            return Err(CuratorError::InvalidDatasetName(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PatientId(String);

impl PatientId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PatientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PatientId {
    type Err = CuratorError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let is_valid = !value.is_empty()
            && value != "."
            && value != ".."
            && !value.contains(['/', '\\'])
            && !value.chars().any(char::is_control);
        if !is_valid {
            return Err(CuratorError::InvalidPatientId(value.to_string()));
        }
        Ok(Self(value.to_string()))
    }
}

/// Columns every manifest carries, in the order a fresh manifest lists them.
pub const CORE_COLUMNS: [&str; 4] = ["patient_id", "hashed_uid", "modality", "path"];

/// One converted imaging artifact as listed in a manifest.
///
/// Columns other than the four core ones are carried in `extra` untouched so
/// that a manifest survives a read/write cycle without losing information.
/// `columns` holds the header order of the manifest the record was read
/// from and is empty for records built in code.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DataObjectRecord {
    pub patient_id: String,
    pub hashed_uid: String,
    pub modality: String,
    pub path: String,
    #[serde(default)]
    pub extra: Vec<(String, String)>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<String>,
}

impl DataObjectRecord {
    pub fn new(
        patient_id: impl Into<String>,
        hashed_uid: impl Into<String>,
        modality: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            patient_id: patient_id.into(),
            hashed_uid: hashed_uid.into(),
            modality: modality.into(),
            path: path.into(),
            extra: Vec::new(),
            columns: Vec::new(),
        }
    }

    /// Sets an extra column, replacing its value if already present.
    pub fn with_extra(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        let column = column.into();
        let value = value.into();
        match self.extra.iter_mut().find(|(name, _)| *name == column) {
            Some((_, existing)) => *existing = value,
            None => self.extra.push((column, value)),
        }
        self
    }

    /// Value of any column, core or extra.
    pub fn column(&self, name: &str) -> Option<&str> {
        match name {
            "patient_id" => Some(&self.patient_id),
            "hashed_uid" => Some(&self.hashed_uid),
            "modality" => Some(&self.modality),
            "path" => Some(&self.path),
            other => self
                .extra
                .iter()
                .find(|(column, _)| column == other)
                .map(|(_, value)| value.as_str()),
        }
    }

    /// Every column this record has a value for, in source order. Records
    /// built in code list the core columns first, then extras as added.
    pub fn column_names(&self) -> Vec<String> {
        let mut names: Vec<String> = if self.columns.is_empty() {
            CORE_COLUMNS.iter().map(|c| c.to_string()).collect()
        } else {
            self.columns.clone()
        };
        for required in CORE_COLUMNS {
            if !names.iter().any(|c| c == required) {
                names.push(required.to_string());
            }
        }
        for (column, _) in &self.extra {
            if !names.contains(column) {
                names.push(column.clone());
            }
        }
        names
    }

    pub fn is_structure_set(&self) -> bool {
        self.modality == RTSTRUCT
    }
}

/// Directory scope a structure name mapping is written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum MappingLevel {
    #[value(name = "current_structure_set")]
    CurrentStructureSet,
    Patient,
    Project,
}

impl fmt::Display for MappingLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MappingLevel::CurrentStructureSet => write!(f, "current_structure_set"),
            MappingLevel::Patient => write!(f, "patient"),
            MappingLevel::Project => write!(f, "project"),
        }
    }
}

impl FromStr for MappingLevel {
    type Err = CuratorError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "current_structure_set" => Ok(MappingLevel::CurrentStructureSet),
            "patient" => Ok(MappingLevel::Patient),
            "project" => Ok(MappingLevel::Project),
            _ => Err(CuratorError::InvalidMappingLevel(value.to_string())),
        }
    }
}
