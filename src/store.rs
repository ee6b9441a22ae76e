use std::fs;
use std::io;

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::debug;

use crate::config::CuratorConfig;
use crate::domain::{DataObjectRecord, DatasetName, PatientId};
use crate::error::CuratorError;
use crate::manifest::Manifest;

/// A working root: the converted pool plus sibling dataset directories.
///
/// Paths written to manifests are always relative to the root, so the pool
/// and its datasets can be moved together.
#[derive(Debug, Clone)]
pub struct Store {
    root: Utf8PathBuf,
    config: CuratorConfig,
}

/// Outcome of placing one data object into a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Placement {
    pub patient_id: String,
    pub hashed_uid: String,
    pub reference: Utf8PathBuf,
    pub reference_created: bool,
    pub row_added: bool,
}

impl Store {
    pub fn new(root: impl AsRef<Utf8Path>, config: CuratorConfig) -> Result<Self, CuratorError> {
        let absolute = std::path::absolute(root.as_ref().as_std_path())
            .map_err(|err| CuratorError::Filesystem(err.to_string()))?;
        let root = Utf8PathBuf::from_path_buf(absolute)
            .map_err(|_| CuratorError::Filesystem("invalid working root path".to_string()))?;
        Ok(Self { root, config })
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn config(&self) -> &CuratorConfig {
        &self.config
    }

    pub fn pool_dir(&self) -> Utf8PathBuf {
        self.root.join(&self.config.converted_dir_name)
    }

    pub fn pool_manifest_path(&self, patient: &PatientId) -> Utf8PathBuf {
        self.pool_dir()
            .join(patient.as_str())
            .join(&self.config.manifest_file_name)
    }

    /// Directory of a dataset. The pool itself is not a valid dataset.
    pub fn dataset_dir(&self, dataset: &DatasetName) -> Result<Utf8PathBuf, CuratorError> {
        if dataset.as_str() == self.config.converted_dir_name {
            return Err(CuratorError::InvalidDatasetName(format!(
                "{dataset} is reserved for the converted pool"
            )));
        }
        Ok(self.root.join(dataset.as_str()))
    }

    pub fn dataset_manifest_path(
        &self,
        dataset: &DatasetName,
        patient: &PatientId,
    ) -> Result<Utf8PathBuf, CuratorError> {
        Ok(self
            .dataset_dir(dataset)?
            .join(patient.as_str())
            .join(&self.config.manifest_file_name))
    }

    /// Rewrites `path` relative to the working root. Relative input is taken
    /// as already root-relative.
    pub fn relativize(&self, path: &str) -> Result<Utf8PathBuf, CuratorError> {
        let candidate = Utf8Path::new(path);
        let relative = if candidate.is_absolute() {
            candidate
                .strip_prefix(&self.root)
                .map_err(|_| CuratorError::OutsideWorkingRoot {
                    path: path.to_string(),
                    root: self.root.clone(),
                })?
                .to_path_buf()
        } else {
            candidate.to_path_buf()
        };

        let mut normalized = Utf8PathBuf::new();
        for component in relative.components() {
            match component {
                Utf8Component::Normal(part) => normalized.push(part),
                Utf8Component::CurDir => {}
                _ => return Err(CuratorError::ParentTraversal(path.to_string())),
            }
        }
        if normalized.as_str().is_empty() {
            return Err(CuratorError::OutsidePool {
                path: path.to_string(),
                pool: self.config.converted_dir_name.clone(),
            });
        }
        Ok(normalized)
    }

    /// Returns a copy of `record` whose path is root-relative.
    pub fn normalize_record(
        &self,
        record: &DataObjectRecord,
    ) -> Result<DataObjectRecord, CuratorError> {
        let mut normalized = record.clone();
        normalized.path = self.relativize(&record.path)?.into_string();
        Ok(normalized)
    }

    /// Reads every patient manifest of the converted pool, in patient order.
    ///
    /// Rows come back exactly as stored. Paths are only checked against the
    /// root when an object is placed, so one stale row cannot hide the rest
    /// of the pool.
    pub fn read_converted_data(
        &self,
        patients: Option<&[PatientId]>,
    ) -> Result<Vec<DataObjectRecord>, CuratorError> {
        let pool = self.pool_dir();
        let mut patient_ids = match patients {
            Some(patients) => patients.to_vec(),
            None => list_subdirs(&pool)?
                .into_iter()
                .filter_map(|name| name.parse::<PatientId>().ok())
                .collect(),
        };
        patient_ids.sort();
        patient_ids.dedup();

        let mut records = Vec::new();
        for patient in &patient_ids {
            let path = self.pool_manifest_path(patient);
            let Some(manifest) = Manifest::read_optional(&path)? else {
                debug!(patient = %patient, path = %path, "no converted manifest for patient");
                continue;
            };
            records.extend(manifest.into_records());
        }
        Ok(records)
    }

    /// Links one pool object into a dataset and merges its row into the
    /// patient's dataset manifest. Repeating the call is a no-op.
    pub fn place_object(
        &self,
        dataset: &DatasetName,
        record: &DataObjectRecord,
    ) -> Result<Placement, CuratorError> {
        let record = self.normalize_record(record)?;
        let patient: PatientId = record.patient_id.parse()?;
        let dataset_dir = self.dataset_dir(dataset)?;
        let object_path = Utf8PathBuf::from(&record.path);

        let in_pool = object_path
            .strip_prefix(&self.config.converted_dir_name)
            .ok()
            .filter(|rest| !rest.as_str().is_empty())
            .ok_or_else(|| CuratorError::OutsidePool {
                path: record.path.clone(),
                pool: self.config.converted_dir_name.clone(),
            })?;

        let link_relative = Utf8Path::new(dataset.as_str()).join(in_pool);
        let link_path = self.root.join(&link_relative);
        let depth = link_relative
            .parent()
            .map(|parent| parent.components().count())
            .unwrap_or(0);
        let mut target = Utf8PathBuf::new();
        for _ in 0..depth {
            target.push("..");
        }
        target.push(&object_path);

        if let Some(parent) = link_path.parent() {
            fs::create_dir_all(parent.as_std_path()).map_err(|err| {
                CuratorError::Filesystem(format!("create {parent}: {err}"))
            })?;
        }

        let reference_created = if fs::symlink_metadata(link_path.as_std_path()).is_ok() {
            debug!(reference = %link_path, "reference already exists");
            false
        } else {
            let target_is_dir = self.root.join(&object_path).as_std_path().is_dir();
            create_reference(&target, &link_path, target_is_dir).map_err(|err| {
                CuratorError::Filesystem(format!("link {link_path} -> {target}: {err}"))
            })?;
            true
        };

        let manifest_path = self.dataset_manifest_path(dataset, &patient)?;
        let mut manifest = Manifest::read_optional(&manifest_path)?.unwrap_or_default();
        let hashed_uid = record.hashed_uid.clone();
        let row_added = manifest.append_if_absent(record);
        if !row_added {
            debug!(patient = %patient, hashed_uid = %hashed_uid, "manifest row already present");
        }
        manifest.write(&manifest_path)?;

        Ok(Placement {
            patient_id: patient.to_string(),
            hashed_uid,
            reference: link_path,
            reference_created,
            row_added,
        })
    }

    /// Reads the merged manifest of one patient inside a dataset.
    pub fn read_dataset_manifest(
        &self,
        dataset: &DatasetName,
        patient: &PatientId,
    ) -> Result<Option<Manifest>, CuratorError> {
        Manifest::read_optional(&self.dataset_manifest_path(dataset, patient)?)
    }

    /// Dataset directories beside the pool, sorted by name.
    pub fn list_datasets(&self) -> Result<Vec<DatasetName>, CuratorError> {
        if !self.root.as_std_path().exists() {
            return Ok(Vec::new());
        }
        let mut datasets: Vec<DatasetName> = list_subdirs(&self.root)?
            .into_iter()
            .filter(|name| *name != self.config.converted_dir_name)
            .filter_map(|name| name.parse().ok())
            .collect();
        datasets.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Ok(datasets)
    }
}

fn list_subdirs(dir: &Utf8Path) -> Result<Vec<String>, CuratorError> {
    let entries = dir
        .read_dir_utf8()
        .map_err(|err| CuratorError::Filesystem(format!("read {dir}: {err}")))?;
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| CuratorError::Filesystem(err.to_string()))?;
        if entry.path().as_std_path().is_dir() {
            names.push(entry.file_name().to_string());
        }
    }
    names.sort();
    Ok(names)
}

#[cfg(unix)]
fn create_reference(target: &Utf8Path, link: &Utf8Path, _target_is_dir: bool) -> io::Result<()> {
    std::os::unix::fs::symlink(target.as_std_path(), link.as_std_path())
}

#[cfg(windows)]
fn create_reference(target: &Utf8Path, link: &Utf8Path, target_is_dir: bool) -> io::Result<()> {
    if target_is_dir {
        std::os::windows::fs::symlink_dir(target.as_std_path(), link.as_std_path())
    } else {
        std::os::windows::fs::symlink_file(target.as_std_path(), link.as_std_path())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn store() -> Store {
        Store::new("/work", CuratorConfig::default()).unwrap()
    }

    #[test]
    fn layout_paths() {
        let store = store();
        let dataset: DatasetName = "clean".parse().unwrap();
        let patient: PatientId = "P1".parse().unwrap();
        let path = store.dataset_manifest_path(&dataset, &patient).unwrap();
        assert!(path.ends_with("clean/P1/converted.csv"));
        assert!(store.pool_manifest_path(&patient).ends_with("converted/P1/converted.csv"));
    }

    #[test]
    fn relativize_paths() {
        let store = store();
        assert_eq!(
            store.relativize("/work/converted/P1/images/a").unwrap(),
            "converted/P1/images/a"
        );
        assert_eq!(
            store.relativize("./converted/P1").unwrap(),
            "converted/P1"
        );
        assert_matches!(
            store.relativize("/elsewhere/converted/P1").unwrap_err(),
            CuratorError::OutsideWorkingRoot { .. }
        );
        assert_matches!(
            store.relativize("converted/../../etc").unwrap_err(),
            CuratorError::ParentTraversal(_)
        );
    }

    #[test]
    fn pool_is_not_a_dataset() {
        let dataset: DatasetName = "converted".parse().unwrap();
        assert_matches!(
            store().dataset_dir(&dataset).unwrap_err(),
            CuratorError::InvalidDatasetName(_)
        );
    }
}
