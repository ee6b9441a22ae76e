use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::domain::{DataObjectRecord, RTSTRUCT};
use crate::error::CuratorError;

/// Free-form options passed through to a preparation function.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepareOptions(BTreeMap<String, String>);

impl PrepareOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn require(&self, key: &str, function: &str) -> Result<&str, CuratorError> {
        self.get(key).ok_or_else(|| CuratorError::InvalidOption {
            name: key.to_string(),
            message: format!("missing for preparation function {function}"),
        })
    }

    /// Parses `key=value` pairs as given on the command line.
    pub fn from_pairs<I, S>(pairs: I) -> Result<Self, CuratorError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut options = Self::new();
        for pair in pairs {
            let pair = pair.as_ref();
            let (key, value) = pair.split_once('=').ok_or_else(|| CuratorError::InvalidOption {
                name: pair.to_string(),
                message: "expected key=value".to_string(),
            })?;
            options.0.insert(key.trim().to_string(), value.trim().to_string());
        }
        Ok(options)
    }
}

/// Selects the records a dataset is built from.
pub trait Preparation {
    fn prepare(
        &self,
        records: Vec<DataObjectRecord>,
        options: &PrepareOptions,
    ) -> Result<Vec<DataObjectRecord>, CuratorError>;
}

impl<F> Preparation for F
where
    F: Fn(Vec<DataObjectRecord>, &PrepareOptions) -> Result<Vec<DataObjectRecord>, CuratorError>,
{
    fn prepare(
        &self,
        records: Vec<DataObjectRecord>,
        options: &PrepareOptions,
    ) -> Result<Vec<DataObjectRecord>, CuratorError> {
        self(records, options)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinPreparation {
    /// Every record of the pool.
    All,
    /// Records whose modality is listed in the `modality` option.
    Modality,
    /// Structure sets together with the images they reference.
    #[value(name = "structures_with_images")]
    StructuresWithImages,
}

impl fmt::Display for BuiltinPreparation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuiltinPreparation::All => write!(f, "all"),
            BuiltinPreparation::Modality => write!(f, "modality"),
            BuiltinPreparation::StructuresWithImages => write!(f, "structures_with_images"),
        }
    }
}

impl FromStr for BuiltinPreparation {
    type Err = CuratorError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "all" => Ok(BuiltinPreparation::All),
            "modality" => Ok(BuiltinPreparation::Modality),
            "structures_with_images" => Ok(BuiltinPreparation::StructuresWithImages),
            _ => Err(CuratorError::UnknownPreparation(value.to_string())),
        }
    }
}

impl Preparation for BuiltinPreparation {
    fn prepare(
        &self,
        records: Vec<DataObjectRecord>,
        options: &PrepareOptions,
    ) -> Result<Vec<DataObjectRecord>, CuratorError> {
        match self {
            BuiltinPreparation::All => Ok(records),
            BuiltinPreparation::Modality => {
                let wanted: HashSet<&str> = options
                    .require("modality", "modality")?
                    .split(',')
                    .map(str::trim)
                    .filter(|m| !m.is_empty())
                    .collect();
                if wanted.is_empty() {
                    return Err(CuratorError::InvalidOption {
                        name: "modality".to_string(),
                        message: "no modality listed".to_string(),
                    });
                }
                Ok(records
                    .into_iter()
                    .filter(|r| wanted.contains(r.modality.as_str()))
                    .collect())
            }
            BuiltinPreparation::StructuresWithImages => {
                let referenced: HashSet<String> = records
                    .iter()
                    .filter(|r| r.modality == RTSTRUCT)
                    .filter_map(|r| r.column("referenced_sop_instance_uid"))
                    .filter(|uid| !uid.is_empty())
                    .map(str::to_string)
                    .collect();
                Ok(records
                    .into_iter()
                    .filter(|r| {
                        r.modality == RTSTRUCT
                            || r
                                .column("sop_instance_uid")
                                .is_some_and(|uid| referenced.contains(uid))
                    })
                    .collect())
            }
        }
    }
}

/// A preparation function chosen by name from the built-in registry or
/// supplied directly by the caller.
#[derive(Clone, Copy)]
pub enum PreparationSource<'a> {
    Builtin(BuiltinPreparation),
    Custom(&'a dyn Preparation),
}

impl fmt::Debug for PreparationSource<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreparationSource::Builtin(builtin) => f.debug_tuple("Builtin").field(builtin).finish(),
            PreparationSource::Custom(_) => f.debug_tuple("Custom").finish_non_exhaustive(),
        }
    }
}

impl PreparationSource<'_> {
    pub fn named(name: &str) -> Result<Self, CuratorError> {
        Ok(PreparationSource::Builtin(name.parse()?))
    }

    pub fn run(
        &self,
        records: Vec<DataObjectRecord>,
        options: &PrepareOptions,
    ) -> Result<Vec<DataObjectRecord>, CuratorError> {
        match self {
            PreparationSource::Builtin(builtin) => builtin.prepare(records, options),
            PreparationSource::Custom(custom) => custom.prepare(records, options),
        }
    }
}

impl fmt::Display for PreparationSource<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreparationSource::Builtin(builtin) => write!(f, "{builtin}"),
            PreparationSource::Custom(_) => write!(f, "custom"),
        }
    }
}
