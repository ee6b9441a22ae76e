use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::domain::{DataObjectRecord, DatasetName, PatientId};
use crate::error::{CuratorError, ErrorKind};
use crate::preparation::{PrepareOptions, PreparationSource};
use crate::store::{Placement, Store};

#[derive(Debug, Clone, Serialize)]
pub struct PrepareResult {
    pub dataset: String,
    pub function: String,
    pub prepared_at: String,
    pub placed: Vec<Placement>,
    pub skipped: Vec<SkippedItem>,
}

/// A row that could not be placed because its path does not resolve into
/// the pool.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedItem {
    pub patient_id: String,
    pub hashed_uid: String,
    pub path: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatasetsResult {
    pub datasets: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn event(&self, _event: ProgressEvent) {}
}

/// Materializes datasets out of the converted pool.
#[derive(Debug, Clone)]
pub struct App {
    store: Store,
}

impl App {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Filters the pool with `preparation` and merges the selection into
    /// `dataset`. Previously placed objects are never removed.
    pub fn prepare(
        &self,
        dataset: &DatasetName,
        preparation: PreparationSource<'_>,
        patients: Option<&[PatientId]>,
        options: &PrepareOptions,
        sink: &dyn ProgressSink,
    ) -> Result<PrepareResult, CuratorError> {
        info!(dataset = %dataset, function = %preparation, "preparing dataset");
        sink.event(ProgressEvent {
            message: "phase=Resolve; reading converted manifests".to_string(),
            elapsed: None,
        });
        let converted = self.store.read_converted_data(patients)?;

        sink.event(ProgressEvent {
            message: format!(
                "phase=Filter; {} rows through {preparation}",
                converted.len()
            ),
            elapsed: None,
        });
        let selected = preparation.run(converted, options)?;

        let mut result = self.prepare_from_records(dataset, selected, sink)?;
        result.function = preparation.to_string();
        Ok(result)
    }

    /// Places an already filtered selection into `dataset`, in order.
    ///
    /// Rows whose path does not resolve into the pool are skipped and
    /// reported; I/O failures abort the run.
    pub fn prepare_from_records(
        &self,
        dataset: &DatasetName,
        records: Vec<DataObjectRecord>,
        sink: &dyn ProgressSink,
    ) -> Result<PrepareResult, CuratorError> {
        let dataset_dir = self.store.dataset_dir(dataset)?;
        if dataset_dir.as_std_path().exists() {
            warn!(
                dataset = %dataset,
                "dataset directory already exists; new objects will be merged into it"
            );
        }

        let start = Instant::now();
        let mut placed = Vec::new();
        let mut skipped = Vec::new();

        for record in &records {
            let outcome = self
                .store
                .normalize_record(record)
                .and_then(|normalized| self.store.place_object(dataset, &normalized));
            match outcome {
                Ok(placement) => placed.push(placement),
                Err(err) if err.kind() == ErrorKind::Integrity => {
                    warn!(
                        patient = %record.patient_id,
                        hashed_uid = %record.hashed_uid,
                        error = %err,
                        "skipping data object"
                    );
                    skipped.push(SkippedItem {
                        patient_id: record.patient_id.clone(),
                        hashed_uid: record.hashed_uid.clone(),
                        path: record.path.clone(),
                        reason: err.to_string(),
                    });
                }
                Err(err) => return Err(err),
            }
        }

        sink.event(ProgressEvent {
            message: format!(
                "phase=Store; placed {} objects, skipped {}",
                placed.len(),
                skipped.len()
            ),
            elapsed: Some(start.elapsed()),
        });

        Ok(PrepareResult {
            dataset: dataset.to_string(),
            function: "records".to_string(),
            prepared_at: Utc::now().to_rfc3339(),
            placed,
            skipped,
        })
    }

    pub fn list_datasets(&self) -> Result<DatasetsResult, CuratorError> {
        Ok(DatasetsResult {
            datasets: self
                .store
                .list_datasets()?
                .into_iter()
                .map(|name| name.to_string())
                .collect(),
        })
    }
}
