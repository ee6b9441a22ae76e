use camino::Utf8PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// Broad failure category, used to decide whether a failure is isolated to a
/// single row or aborts the whole operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Integrity,
    Io,
}

#[derive(Debug, Error, Diagnostic)]
pub enum CuratorError {
    #[error("invalid dataset name: {0}")]
    #[diagnostic(help("use a single directory name made of letters, digits, '.', '_' or '-'"))]
    InvalidDatasetName(String),

    #[error("invalid patient id: {0}")]
    InvalidPatientId(String),

    #[error("unknown preparation function: {0}")]
    #[diagnostic(help("known functions: all, modality, structures_with_images"))]
    UnknownPreparation(String),

    #[error("preparation option {name} is required: {message}")]
    InvalidOption { name: String, message: String },

    #[error("structure set row must have modality RTSTRUCT, found {0}")]
    WrongModality(String),

    #[error("structure name {0} not found in structure set")]
    StructureNotFound(String),

    #[error("invalid mapping level: {0}")]
    #[diagnostic(help("level must be one of project, patient or current_structure_set"))]
    InvalidMappingLevel(String),

    #[error("structure set {path} has fewer than {depth} parent directories")]
    #[diagnostic(help("lower patient_depth or project_depth in the config"))]
    ShallowStructureSet { path: Utf8PathBuf, depth: usize },

    #[error("failed to read config file at {0}")]
    ConfigRead(Utf8PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("path {path} is not inside working root {root}")]
    OutsideWorkingRoot { path: String, root: Utf8PathBuf },

    #[error("path {path} is not inside the converted pool {pool}")]
    OutsidePool { path: String, pool: String },

    #[error("path {0} must not contain parent directory components")]
    ParentTraversal(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("failed to read manifest {path}: {message}")]
    ManifestRead { path: Utf8PathBuf, message: String },

    #[error("failed to write manifest {path}: {message}")]
    ManifestWrite { path: Utf8PathBuf, message: String },

    #[error("failed to read volume {path}: {message}")]
    VolumeRead { path: Utf8PathBuf, message: String },
}

impl CuratorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CuratorError::InvalidDatasetName(_)
            | CuratorError::InvalidPatientId(_)
            | CuratorError::UnknownPreparation(_)
            | CuratorError::InvalidOption { .. }
            | CuratorError::WrongModality(_)
            | CuratorError::StructureNotFound(_)
            | CuratorError::InvalidMappingLevel(_)
            | CuratorError::ShallowStructureSet { .. }
            | CuratorError::ConfigRead(_)
            | CuratorError::ConfigParse(_) => ErrorKind::Configuration,
            CuratorError::OutsideWorkingRoot { .. }
            | CuratorError::OutsidePool { .. }
            | CuratorError::ParentTraversal(_) => ErrorKind::Integrity,
            CuratorError::Filesystem(_)
            | CuratorError::ManifestRead { .. }
            | CuratorError::ManifestWrite { .. }
            | CuratorError::VolumeRead { .. } => ErrorKind::Io,
        }
    }
}
