use std::fs;

use camino::Utf8Path;

pub use crate::domain::CORE_COLUMNS;
use crate::domain::DataObjectRecord;
use crate::error::CuratorError;
use crate::fs_util::write_bytes_atomic;

/// Headers pandas-style writers use for the row index column.
const INDEX_HEADERS: [&str; 2] = ["", "Unnamed: 0"];

/// Ordered table of data object records for one patient.
///
/// On disk this is a CSV file whose first column is an unnamed, contiguous
/// row index. Every value is kept as a string, so identifier-like values such
/// as `00123` are never coerced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    columns: Vec<String>,
    records: Vec<DataObjectRecord>,
}

impl Default for Manifest {
    fn default() -> Self {
        Self::new()
    }
}

impl Manifest {
    pub fn new() -> Self {
        Self {
            columns: CORE_COLUMNS.iter().map(|c| c.to_string()).collect(),
            records: Vec::new(),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn records(&self) -> &[DataObjectRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<DataObjectRecord> {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, hashed_uid: &str) -> bool {
        self.records.iter().any(|r| r.hashed_uid == hashed_uid)
    }

    /// Appends `record` unless a row with the same `hashed_uid` exists. The
    /// existing row always wins. Returns whether the record was appended.
    pub fn append_if_absent(&mut self, record: DataObjectRecord) -> bool {
        if self.contains(&record.hashed_uid) {
            return false;
        }
        let incoming = record.column_names();
        if self.records.is_empty() {
            // A fresh manifest takes the header order of its first row.
            let previous = std::mem::replace(&mut self.columns, incoming);
            for column in previous {
                if !self.columns.contains(&column) {
                    self.columns.push(column);
                }
            }
        } else {
            for column in incoming {
                if !self.columns.contains(&column) {
                    self.columns.push(column);
                }
            }
        }
        self.records.push(record);
        true
    }

    /// Reads a manifest, or returns `None` when the file does not exist.
    pub fn read_optional(path: &Utf8Path) -> Result<Option<Self>, CuratorError> {
        if !path.as_std_path().exists() {
            return Ok(None);
        }
        Self::read(path).map(Some)
    }

    pub fn read(path: &Utf8Path) -> Result<Self, CuratorError> {
        let read_err = |message: String| CuratorError::ManifestRead {
            path: path.to_path_buf(),
            message,
        };
        let content = fs::read(path.as_std_path()).map_err(|err| read_err(err.to_string()))?;
        Self::from_csv_bytes(&content).map_err(read_err)
    }

    pub fn from_csv_bytes(content: &[u8]) -> Result<Self, String> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(content);
        let headers = reader.headers().map_err(|err| err.to_string())?.clone();

        let skip_index = headers
            .get(0)
            .map(|h| INDEX_HEADERS.contains(&h))
            .unwrap_or(false);
        let columns: Vec<String> = headers
            .iter()
            .skip(usize::from(skip_index))
            .map(str::to_string)
            .collect();
        for required in CORE_COLUMNS {
            if !columns.iter().any(|c| c == required) {
                return Err(format!("missing column {required}"));
            }
        }

        let mut records = Vec::new();
        for row in reader.records() {
            let row = row.map_err(|err| err.to_string())?;
            let mut record = DataObjectRecord {
                columns: columns.clone(),
                ..DataObjectRecord::default()
            };
            for (column, value) in columns.iter().zip(row.iter().skip(usize::from(skip_index))) {
                match column.as_str() {
                    "patient_id" => record.patient_id = value.to_string(),
                    "hashed_uid" => record.hashed_uid = value.to_string(),
                    "modality" => record.modality = value.to_string(),
                    "path" => record.path = value.to_string(),
                    other => record.extra.push((other.to_string(), value.to_string())),
                }
            }
            records.push(record);
        }

        Ok(Self { columns, records })
    }

    /// Serializes with a fresh `0..n` row index; prior index values are
    /// never carried over.
    pub fn to_csv_bytes(&self) -> Result<Vec<u8>, String> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        let mut header = vec![""];
        header.extend(self.columns.iter().map(String::as_str));
        writer.write_record(&header).map_err(|err| err.to_string())?;

        for (index, record) in self.records.iter().enumerate() {
            let mut row = Vec::with_capacity(self.columns.len() + 1);
            row.push(index.to_string());
            for column in &self.columns {
                row.push(record.column(column).unwrap_or_default().to_string());
            }
            writer.write_record(&row).map_err(|err| err.to_string())?;
        }

        writer.into_inner().map_err(|err| err.to_string())
    }

    /// Replaces the file at `path` atomically.
    pub fn write(&self, path: &Utf8Path) -> Result<(), CuratorError> {
        let write_err = |message: String| CuratorError::ManifestWrite {
            path: path.to_path_buf(),
            message,
        };
        let content = self.to_csv_bytes().map_err(write_err)?;
        write_bytes_atomic(path, ".manifest", &content).map_err(|err| write_err(err.to_string()))
    }
}

impl FromIterator<DataObjectRecord> for Manifest {
    fn from_iter<I: IntoIterator<Item = DataObjectRecord>>(iter: I) -> Self {
        let mut manifest = Manifest::new();
        for record in iter {
            manifest.append_if_absent(record);
        }
        manifest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_existing_row_on_duplicate_uid() {
        let mut manifest = Manifest::new();
        assert!(manifest.append_if_absent(DataObjectRecord::new("P1", "a", "CT", "x")));
        assert!(!manifest.append_if_absent(DataObjectRecord::new("P1", "a", "MR", "y")));
        assert_eq!(manifest.len(), 1);
        assert_eq!(manifest.records()[0].modality, "CT");
    }

    #[test]
    fn reads_index_column_and_string_ids() {
        let csv = ",sop_instance_uid,hashed_uid,modality,patient_id,path\n\
                   7,1.2.3,00042,CT,007,converted/007/images/00042\n";
        let manifest = Manifest::from_csv_bytes(csv.as_bytes()).unwrap();
        assert_eq!(manifest.len(), 1);
        let record = &manifest.records()[0];
        assert_eq!(record.patient_id, "007");
        assert_eq!(record.hashed_uid, "00042");
        assert_eq!(record.column("sop_instance_uid"), Some("1.2.3"));
        assert_eq!(
            manifest.columns(),
            ["sop_instance_uid", "hashed_uid", "modality", "patient_id", "path"]
        );
    }

    #[test]
    fn writes_fresh_index() {
        let csv = ",patient_id,hashed_uid,modality,path\n\
                   4,P1,a,CT,converted/P1/images/a\n\
                   9,P1,b,CT,converted/P1/images/b\n";
        let manifest = Manifest::from_csv_bytes(csv.as_bytes()).unwrap();
        let written = String::from_utf8(manifest.to_csv_bytes().unwrap()).unwrap();
        assert_eq!(
            written,
            ",patient_id,hashed_uid,modality,path\n\
             0,P1,a,CT,converted/P1/images/a\n\
             1,P1,b,CT,converted/P1/images/b\n"
        );
    }

    #[test]
    fn fresh_manifest_takes_first_row_order() {
        let pool = Manifest::from_csv_bytes(
            b",sop_instance_uid,hashed_uid,modality,patient_id,path\n0,1.1,a,CT,P1,x\n",
        )
        .unwrap();
        let mut merged: Manifest = pool.records().iter().cloned().collect();
        merged.append_if_absent(
            DataObjectRecord::new("P1", "b", "CT", "y").with_extra("for_uid", "2.2"),
        );
        assert_eq!(
            merged.columns(),
            ["sop_instance_uid", "hashed_uid", "modality", "patient_id", "path", "for_uid"]
        );
    }

    #[test]
    fn rejects_missing_core_column() {
        let err = Manifest::from_csv_bytes(b",patient_id,path\n0,P1,x\n").unwrap_err();
        assert!(err.contains("hashed_uid"));
    }
}
