#![cfg(unix)]

use std::fs;

use assert_matches::assert_matches;
use camino::{Utf8Path, Utf8PathBuf};

use rt_curator::config::CuratorConfig;
use rt_curator::domain::{DataObjectRecord, DatasetName, PatientId, RTSTRUCT};
use rt_curator::error::{CuratorError, ErrorKind};
use rt_curator::manifest::Manifest;
use rt_curator::store::Store;

fn working_root() -> (tempfile::TempDir, Utf8PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
    (dir, root)
}

fn pool_object(root: &Utf8Path, relative: &str) {
    let dir = root.join(relative);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("heart.nii.gz"), b"mask").unwrap();
}

fn structure_row(uid: &str) -> DataObjectRecord {
    DataObjectRecord::new(
        "P1",
        uid,
        RTSTRUCT,
        format!("converted/P1/structures/{uid}"),
    )
}

#[test]
fn place_object_is_idempotent() {
    let (_dir, root) = working_root();
    pool_object(&root, "converted/P1/structures/a");
    let store = Store::new(&root, CuratorConfig::default()).unwrap();
    let dataset: DatasetName = "clean".parse().unwrap();
    let patient: PatientId = "P1".parse().unwrap();

    let first = store.place_object(&dataset, &structure_row("a")).unwrap();
    assert!(first.reference_created);
    assert!(first.row_added);
    let manifest_path = store.dataset_manifest_path(&dataset, &patient).unwrap();
    let after_first = fs::read(&manifest_path).unwrap();

    let second = store.place_object(&dataset, &structure_row("a")).unwrap();
    assert!(!second.reference_created);
    assert!(!second.row_added);
    let after_second = fs::read(&manifest_path).unwrap();
    assert_eq!(after_first, after_second);

    let manifest = Manifest::read(&manifest_path).unwrap();
    assert_eq!(manifest.len(), 1);

    let link = root.join("clean/P1/structures/a");
    let meta = fs::symlink_metadata(&link).unwrap();
    assert!(meta.file_type().is_symlink());
    assert_eq!(
        fs::read_link(&link).unwrap(),
        std::path::PathBuf::from("../../../converted/P1/structures/a")
    );
    assert!(link.join("heart.nii.gz").as_std_path().is_file());
}

#[test]
fn dangling_reference_counts_as_present() {
    let (_dir, root) = working_root();
    pool_object(&root, "converted/P1/structures/a");
    let store = Store::new(&root, CuratorConfig::default()).unwrap();
    let dataset: DatasetName = "clean".parse().unwrap();
    let link = root.join("clean/P1/structures/a");
    fs::create_dir_all(link.parent().unwrap()).unwrap();
    std::os::unix::fs::symlink("nowhere", &link).unwrap();

    let placement = store.place_object(&dataset, &structure_row("a")).unwrap();
    assert!(!placement.reference_created);
    assert!(placement.row_added);
    assert_eq!(
        fs::read_link(&link).unwrap(),
        std::path::PathBuf::from("nowhere")
    );
}

#[test]
fn manifest_never_holds_duplicate_uids() {
    let (_dir, root) = working_root();
    for uid in ["a", "b"] {
        pool_object(&root, &format!("converted/P1/structures/{uid}"));
    }
    let store = Store::new(&root, CuratorConfig::default()).unwrap();
    let dataset: DatasetName = "clean".parse().unwrap();

    for uid in ["a", "b", "a", "b", "a"] {
        store.place_object(&dataset, &structure_row(uid)).unwrap();
    }

    let patient: PatientId = "P1".parse().unwrap();
    let manifest = store
        .read_dataset_manifest(&dataset, &patient)
        .unwrap()
        .unwrap();
    let uids: Vec<&str> = manifest
        .records()
        .iter()
        .map(|r| r.hashed_uid.as_str())
        .collect();
    assert_eq!(uids, ["a", "b"]);
}

#[test]
fn existing_row_wins_over_incoming() {
    let (_dir, root) = working_root();
    pool_object(&root, "converted/P1/structures/a");
    let store = Store::new(&root, CuratorConfig::default()).unwrap();
    let dataset: DatasetName = "clean".parse().unwrap();

    store.place_object(&dataset, &structure_row("a")).unwrap();
    let altered = structure_row("a").with_extra("for_uid", "9.9");
    store.place_object(&dataset, &altered).unwrap();

    let patient: PatientId = "P1".parse().unwrap();
    let manifest = store
        .read_dataset_manifest(&dataset, &patient)
        .unwrap()
        .unwrap();
    assert_eq!(manifest.len(), 1);
    assert_eq!(manifest.records()[0].column("for_uid"), None);
}

#[test]
fn absolute_path_is_recorded_relative() {
    let (_dir, root) = working_root();
    pool_object(&root, "converted/P1/structures/a");
    let store = Store::new(&root, CuratorConfig::default()).unwrap();
    let dataset: DatasetName = "clean".parse().unwrap();

    let mut record = structure_row("a");
    record.path = root.join("converted/P1/structures/a").into_string();
    let original = record.clone();
    store.place_object(&dataset, &record).unwrap();
    assert_eq!(record, original);

    let patient: PatientId = "P1".parse().unwrap();
    let manifest = store
        .read_dataset_manifest(&dataset, &patient)
        .unwrap()
        .unwrap();
    assert_eq!(manifest.records()[0].path, "converted/P1/structures/a");
}

#[test]
fn path_outside_root_is_integrity_error() {
    let (_dir, root) = working_root();
    let store = Store::new(&root, CuratorConfig::default()).unwrap();
    let dataset: DatasetName = "clean".parse().unwrap();

    let mut record = structure_row("a");
    record.path = "/somewhere/else/converted/P1/structures/a".to_string();
    let err = store.place_object(&dataset, &record).unwrap_err();
    assert_matches!(err, CuratorError::OutsideWorkingRoot { .. });
    assert_eq!(err.kind(), ErrorKind::Integrity);
    assert!(!root.join("clean").as_std_path().exists());
}

#[test]
fn path_outside_pool_is_integrity_error() {
    let (_dir, root) = working_root();
    let store = Store::new(&root, CuratorConfig::default()).unwrap();
    let dataset: DatasetName = "clean".parse().unwrap();

    let mut record = structure_row("a");
    record.path = "other/P1/structures/a".to_string();
    let err = store.place_object(&dataset, &record).unwrap_err();
    assert_matches!(err, CuratorError::OutsidePool { .. });
}

#[test]
fn extra_columns_survive_merge() {
    let (_dir, root) = working_root();
    pool_object(&root, "converted/P1/structures/a");
    pool_object(&root, "converted/P1/images/ct");
    let store = Store::new(&root, CuratorConfig::default()).unwrap();
    let dataset: DatasetName = "clean".parse().unwrap();

    let image = DataObjectRecord::new("P1", "ct", "CT", "converted/P1/images/ct")
        .with_extra("sop_instance_uid", "1.2.3");
    store.place_object(&dataset, &structure_row("a")).unwrap();
    store.place_object(&dataset, &image).unwrap();

    let patient: PatientId = "P1".parse().unwrap();
    let manifest = store
        .read_dataset_manifest(&dataset, &patient)
        .unwrap()
        .unwrap();
    assert_eq!(
        manifest.columns(),
        ["patient_id", "hashed_uid", "modality", "path", "sop_instance_uid"]
    );
    assert_eq!(manifest.records()[0].column("sop_instance_uid"), Some(""));
    assert_eq!(manifest.records()[1].column("sop_instance_uid"), Some("1.2.3"));
}

#[test]
fn reads_converted_pool() {
    let (_dir, root) = working_root();
    let store = Store::new(&root, CuratorConfig::default()).unwrap();
    for patient in ["P2", "P1"] {
        let record = DataObjectRecord::new(
            patient,
            format!("{patient}-rs"),
            RTSTRUCT,
            root.join(format!("converted/{patient}/structures/rs")).into_string(),
        );
        let id: PatientId = patient.parse().unwrap();
        Manifest::from_iter([record])
            .write(&store.pool_manifest_path(&id))
            .unwrap();
    }

    let all = store.read_converted_data(None).unwrap();
    let uids: Vec<&str> = all.iter().map(|r| r.hashed_uid.as_str()).collect();
    assert_eq!(uids, ["P1-rs", "P2-rs"]);
    assert_eq!(all[0].path, root.join("converted/P1/structures/rs").as_str());

    let only: Vec<PatientId> = vec!["P2".parse().unwrap(), "P9".parse().unwrap()];
    let some = store.read_converted_data(Some(only.as_slice())).unwrap();
    assert_eq!(some.len(), 1);
    assert_eq!(some[0].patient_id, "P2");
}

#[test]
fn converted_rows_are_returned_unchecked() {
    let (_dir, root) = working_root();
    let store = Store::new(&root, CuratorConfig::default()).unwrap();
    let patient: PatientId = "P1".parse().unwrap();
    Manifest::from_iter([
        DataObjectRecord::new("P1", "x", RTSTRUCT, "/moved/elsewhere/converted/P1/structures/x"),
        structure_row("a"),
    ])
    .write(&store.pool_manifest_path(&patient))
    .unwrap();

    let rows = store.read_converted_data(None).unwrap();
    let paths: Vec<&str> = rows.iter().map(|r| r.path.as_str()).collect();
    assert_eq!(
        paths,
        ["/moved/elsewhere/converted/P1/structures/x", "converted/P1/structures/a"]
    );
}

#[test]
fn lists_datasets_beside_pool() {
    let (_dir, root) = working_root();
    fs::create_dir_all(root.join("converted")).unwrap();
    fs::create_dir_all(root.join("clean")).unwrap();
    fs::create_dir_all(root.join(".curator")).unwrap();
    fs::create_dir_all(root.join("atlas")).unwrap();
    let store = Store::new(&root, CuratorConfig::default()).unwrap();

    let names: Vec<String> = store
        .list_datasets()
        .unwrap()
        .into_iter()
        .map(|d| d.to_string())
        .collect();
    assert_eq!(names, ["atlas", "clean"]);
}
