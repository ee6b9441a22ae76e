use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::CuratorConfig;
use crate::domain::{DataObjectRecord, MappingLevel, RTSTRUCT};
use crate::error::CuratorError;
use crate::fs_util::write_bytes_atomic;
use crate::volume::VolumeReader;

/// Canonical structure name -> institution specific variants.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StructureMapping(BTreeMap<String, Vec<String>>);

impl StructureMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, canonical: impl Into<String>, variants: Vec<String>) {
        self.0.insert(canonical.into(), variants);
    }

    pub fn canonical_names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn variants(&self, canonical: &str) -> &[String] {
        self.0.get(canonical).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn contains_canonical(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn load(path: &Utf8Path) -> Result<Self, CuratorError> {
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|_| CuratorError::ConfigRead(path.to_path_buf()))?;
        let document: MappingDocument = serde_json::from_str(&content)
            .map_err(|err| CuratorError::ConfigParse(format!("{path}: {err}")))?;
        Ok(document.structures)
    }
}

impl FromIterator<(String, Vec<String>)> for StructureMapping {
    fn from_iter<I: IntoIterator<Item = (String, Vec<String>)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Envelope persisted to `structures_map.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingDocument {
    pub structures: StructureMapping,
}

/// Turns a requested structure name into the name used for lookup.
pub trait StructureNameResolver {
    fn resolve(&self, requested: &str, mapping: &StructureMapping) -> String;
}

impl<F> StructureNameResolver for F
where
    F: Fn(&str, &StructureMapping) -> String,
{
    fn resolve(&self, requested: &str, mapping: &StructureMapping) -> String {
        self(requested, mapping)
    }
}

/// Canonical names resolve to themselves; a variant resolves to its
/// canonical name, matched exactly first and then ignoring case and
/// surrounding whitespace. Anything else is returned unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactNameResolver;

impl StructureNameResolver for ExactNameResolver {
    fn resolve(&self, requested: &str, mapping: &StructureMapping) -> String {
        if mapping.contains_canonical(requested) {
            return requested.to_string();
        }
        if let Some((canonical, _)) = mapping
            .iter()
            .find(|(_, variants)| variants.iter().any(|v| v == requested))
        {
            return canonical.to_string();
        }
        let folded = requested.trim().to_lowercase();
        mapping
            .iter()
            .find(|(canonical, variants)| {
                canonical.to_lowercase() == folded
                    || variants.iter().any(|v| v.trim().to_lowercase() == folded)
            })
            .map(|(canonical, _)| canonical.to_string())
            .unwrap_or_else(|| requested.to_string())
    }
}

/// Name-keyed view over the label volumes of one structure set.
///
/// Construction only lists the directory. Volumes are read on first access
/// and cached for the lifetime of the view, keyed by resolved name.
pub struct StructureSet<R: VolumeReader, N: StructureNameResolver = ExactNameResolver> {
    path: Utf8PathBuf,
    config: CuratorConfig,
    names: BTreeSet<String>,
    mapping: Option<StructureMapping>,
    resolver: N,
    reader: R,
    cache: HashMap<String, R::Volume>,
}

impl<R: VolumeReader> StructureSet<R> {
    /// Opens the structure set of `row`. A relative row path is resolved
    /// against `working_root`.
    pub fn new(
        row: &DataObjectRecord,
        working_root: &Utf8Path,
        config: &CuratorConfig,
        mapping: Option<StructureMapping>,
        reader: R,
    ) -> Result<Self, CuratorError> {
        if row.modality != RTSTRUCT {
            return Err(CuratorError::WrongModality(row.modality.clone()));
        }

        let path = working_root.join(&row.path);
        let names = match &mapping {
            Some(mapping) => mapping.canonical_names().map(str::to_string).collect(),
            None => list_structure_names(&path, &config.structure_suffix)?,
        };

        Ok(Self {
            path,
            config: config.clone(),
            names,
            mapping,
            resolver: ExactNameResolver,
            reader,
            cache: HashMap::new(),
        })
    }
}

impl<R: VolumeReader, N: StructureNameResolver> StructureSet<R, N> {
    pub fn with_resolver<M: StructureNameResolver>(self, resolver: M) -> StructureSet<R, M> {
        StructureSet {
            path: self.path,
            config: self.config,
            names: self.names,
            mapping: self.mapping,
            resolver,
            reader: self.reader,
            cache: self.cache,
        }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn keys(&self) -> &BTreeSet<String> {
        &self.names
    }

    pub fn mapping(&self) -> Option<&StructureMapping> {
        self.mapping.as_ref()
    }

    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }

    pub fn get(&mut self, name: &str) -> Result<&R::Volume, CuratorError> {
        let resolved = match &self.mapping {
            Some(mapping) => self.resolver.resolve(name, mapping),
            None => name.to_string(),
        };
        if !self.names.contains(&resolved) {
            return Err(CuratorError::StructureNotFound(name.to_string()));
        }

        match self.cache.entry(resolved) {
            Entry::Occupied(entry) => Ok(&*entry.into_mut()),
            Entry::Vacant(entry) => {
                let file = locate_volume(
                    &self.path,
                    &self.config.structure_suffix,
                    self.mapping.as_ref(),
                    entry.key(),
                )
                .ok_or_else(|| CuratorError::StructureNotFound(name.to_string()))?;
                debug!(structure = %entry.key(), path = %file, "loading structure volume");
                let volume = self.reader.read(&file)?;
                Ok(&*entry.insert(volume))
            }
        }
    }

    /// Directory a mapping document for `level` lives in.
    pub fn mapping_dir(&self, level: MappingLevel) -> Result<Utf8PathBuf, CuratorError> {
        mapping_dir(&self.path, &self.config, level)
    }

    pub fn mapping_path(&self, level: MappingLevel) -> Result<Utf8PathBuf, CuratorError> {
        Ok(self.mapping_dir(level)?.join(&self.config.mapping_file_name))
    }

    /// Writes `mapping` as `{"structures": mapping}` at the given scope. The
    /// view's own mapping is left untouched.
    pub fn create_mapping_json(
        &self,
        mapping: &StructureMapping,
        level: MappingLevel,
    ) -> Result<(), CuratorError> {
        let path = self.mapping_path(level)?;
        let document = MappingDocument {
            structures: mapping.clone(),
        };
        let content = serde_json::to_vec_pretty(&document)
            .map_err(|err| CuratorError::Filesystem(err.to_string()))?;
        write_bytes_atomic(&path, ".structures_map", &content)
            .map_err(|err| CuratorError::Filesystem(format!("write {path}: {err}")))
    }
}

/// Looks for a mapping document at structure-set, patient and then project
/// scope and loads the first one found.
pub fn discover_mapping(
    structure_set_path: &Utf8Path,
    config: &CuratorConfig,
) -> Result<Option<StructureMapping>, CuratorError> {
    for level in [
        MappingLevel::CurrentStructureSet,
        MappingLevel::Patient,
        MappingLevel::Project,
    ] {
        let Ok(dir) = mapping_dir(structure_set_path, config, level) else {
            continue;
        };
        let candidate = dir.join(&config.mapping_file_name);
        if candidate.as_std_path().is_file() {
            debug!(level = %level, path = %candidate, "using structure mapping");
            return StructureMapping::load(&candidate).map(Some);
        }
    }
    Ok(None)
}

fn mapping_dir(
    structure_set_path: &Utf8Path,
    config: &CuratorConfig,
    level: MappingLevel,
) -> Result<Utf8PathBuf, CuratorError> {
    let ancestor = |depth: usize| {
        structure_set_path
            .ancestors()
            .nth(depth)
            .filter(|dir| !dir.as_str().is_empty())
            .map(Utf8Path::to_path_buf)
            .ok_or_else(|| CuratorError::ShallowStructureSet {
                path: structure_set_path.to_path_buf(),
                depth,
            })
    };
    match level {
        MappingLevel::CurrentStructureSet => Ok(structure_set_path.to_path_buf()),
        MappingLevel::Patient => ancestor(config.patient_depth),
        MappingLevel::Project => {
            Ok(ancestor(config.project_depth)?.join(&config.project_dir_name))
        }
    }
}

fn list_structure_names(dir: &Utf8Path, suffix: &str) -> Result<BTreeSet<String>, CuratorError> {
    let entries = dir
        .read_dir_utf8()
        .map_err(|err| CuratorError::Filesystem(format!("read {dir}: {err}")))?;
    let mut names = BTreeSet::new();
    for entry in entries {
        let entry = entry.map_err(|err| CuratorError::Filesystem(err.to_string()))?;
        if let Some(name) = entry.file_name().strip_suffix(suffix) {
            if !name.is_empty() {
                names.insert(name.to_string());
            }
        }
    }
    Ok(names)
}

/// Without a mapping the file is `<name><suffix>`. With one, the canonical
/// file is preferred and the first variant present on disk is the fallback.
fn locate_volume(
    dir: &Utf8Path,
    suffix: &str,
    mapping: Option<&StructureMapping>,
    name: &str,
) -> Option<Utf8PathBuf> {
    let canonical = dir.join(format!("{name}{suffix}"));
    let Some(mapping) = mapping else {
        return Some(canonical);
    };
    if canonical.as_std_path().is_file() {
        return Some(canonical);
    }
    mapping
        .variants(name)
        .iter()
        .map(|variant| dir.join(format!("{variant}{suffix}")))
        .find(|path| path.as_std_path().is_file())
}
