use assert_matches::assert_matches;

use rt_curator::domain::{DatasetName, MappingLevel, PatientId};
use rt_curator::error::CuratorError;

#[test]
fn dataset_names() {
    for valid in ["clean", "clean-2024", "atlas_v1.2"] {
        let name: DatasetName = valid.parse().unwrap();
        assert_eq!(name.as_str(), valid);
    }
    for invalid in ["", ".", "..", "a/b", "../escape", ".hidden", "with space"] {
        let err = invalid.parse::<DatasetName>().unwrap_err();
        assert_matches!(err, CuratorError::InvalidDatasetName(_));
    }
}

#[test]
fn patient_ids() {
    let id: PatientId = "HN-CHUM-001".parse().unwrap();
    assert_eq!(id.to_string(), "HN-CHUM-001");
    for invalid in ["", "..", "a/b", "a\\b"] {
        let err = invalid.parse::<PatientId>().unwrap_err();
        assert_matches!(err, CuratorError::InvalidPatientId(_));
    }
}

#[test]
fn mapping_levels() {
    assert_eq!(
        "current_structure_set".parse::<MappingLevel>().unwrap(),
        MappingLevel::CurrentStructureSet
    );
    assert_eq!("patient".parse::<MappingLevel>().unwrap(), MappingLevel::Patient);
    assert_eq!(MappingLevel::Project.to_string(), "project");
}
