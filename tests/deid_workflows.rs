//
// deid_workflows.rs
// dicom-deid
//
// Integration-style tests covering file anonymization, pseudonym consistency, encryption recovery and batch runs.
//
// Thales Matheus Mendonça Santos - November 2025

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use dicom::core::{DataElement, PrimitiveValue, Tag, VR};
use dicom::dictionary_std::StandardDataDictionary;
use dicom::object::{open_file, FileDicomObject, FileMetaTableBuilder, InMemDicomObject};
use dicom::transfer_syntax::entries::EXPLICIT_VR_LITTLE_ENDIAN;
use dicom_deid::anonymize::{self, Anonymizer, Method};
use dicom_deid::dicom_access::{PatientField, PatientRecord};
use dicom_deid::models::FieldOutcome;
use dicom_deid::recover::{self, DECRYPTION_FAILED};
use dicom_deid::storage::FileStore;
use dicom_deid::{batch, cipher, DeidError, KeyMaterial, KeyStore, PseudonymRegistry};
use tempfile::{tempdir, TempDir};

fn write_patient_dicom(path: &Path, name: &str, id: &str, age: &str) {
    let mut obj = InMemDicomObject::new_empty_with_dict(StandardDataDictionary);
    obj.put(DataElement::new(Tag(0x0010, 0x0010), VR::PN, PrimitiveValue::from(name)));
    obj.put(DataElement::new(Tag(0x0010, 0x0020), VR::LO, PrimitiveValue::from(id)));
    obj.put(DataElement::new(
        Tag(0x0010, 0x0030),
        VR::DA,
        PrimitiveValue::from("19800101"),
    ));
    obj.put(DataElement::new(Tag(0x0010, 0x0040), VR::CS, PrimitiveValue::from("M")));
    obj.put(DataElement::new(Tag(0x0010, 0x1010), VR::AS, PrimitiveValue::from(age)));
    obj.put(DataElement::new(Tag(0x0008, 0x0060), VR::CS, PrimitiveValue::from("MR")));
    obj.put(DataElement::new(
        Tag(0x0008, 0x0016),
        VR::UI,
        PrimitiveValue::from("1.2.840.10008.5.1.4.1.1.7"),
    ));
    obj.put(DataElement::new(
        Tag(0x0008, 0x0018),
        VR::UI,
        PrimitiveValue::from("1.2.826.0.1.3680043.2.1125.1"),
    ));

    let meta = FileMetaTableBuilder::new()
        .transfer_syntax(EXPLICIT_VR_LITTLE_ENDIAN.uid())
        .media_storage_sop_class_uid("1.2.840.10008.5.1.4.1.1.7")
        .media_storage_sop_instance_uid("1.2.826.0.1.3680043.2.1125.1")
        .build()
        .expect("meta");

    let mut file_obj = FileDicomObject::new_empty_with_dict_and_meta(StandardDataDictionary, meta);
    for elem in obj {
        file_obj.put(elem);
    }
    file_obj.write_to_file(path).expect("write test dicom");
}

fn build_test_dicom() -> (TempDir, PathBuf) {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("sample.dcm");
    write_patient_dicom(&path, "Test^Patient", "PAT123", "045Y");
    (dir, path)
}

fn engine() -> Anonymizer {
    Anonymizer::new(Arc::new(PseudonymRegistry::new()))
}

fn text(path: &Path, field: PatientField) -> Option<String> {
    open_file(path).expect("open").read_field(field)
}

#[test]
fn encryption_roundtrip_through_files() {
    let (dir, path) = build_test_dicom();
    let key = KeyStore::new(dir.path().join("secret.key"))
        .load_or_create()
        .expect("key");

    let anon = anonymize::process_file(&path, None, Method::Encryption, &engine(), &key)
        .expect("anonymize");
    assert_eq!(anon, dir.path().join("sample_anon.dcm"));
    let sealed_name = text(&anon, PatientField::Name).expect("name");
    assert_ne!(sealed_name, "Test^Patient");
    assert!(sealed_name.len() <= cipher::MAX_FIELD_LEN);
    assert_eq!(text(&anon, PatientField::Sex).as_deref(), Some("O"));

    let restored = dir.path().join("restored.dcm");
    let (fields, report) =
        recover::recover_file(&anon, Some(restored.clone()), &key).expect("recover");
    assert!(report.all_recovered());
    assert_eq!(fields.name.as_deref(), Some("Test^Patient"));
    assert_eq!(fields.id.as_deref(), Some("PAT123"));
    assert_eq!(text(&restored, PatientField::Id).as_deref(), Some("PAT123"));
}

#[test]
fn recovery_with_foreign_key_reports_failures() {
    let (_dir, path) = build_test_dicom();
    let key = KeyMaterial::generate();
    let anon = anonymize::process_file(&path, None, Method::Encryption, &engine(), &key)
        .expect("anonymize");

    let (fields, report) =
        recover::recover_file(&anon, None, &KeyMaterial::generate()).expect("recover");
    assert_eq!(report.name, FieldOutcome::Failed);
    assert_eq!(report.id, FieldOutcome::Failed);
    assert_eq!(fields.name.as_deref(), Some(DECRYPTION_FAILED));
}

#[test]
fn pseudonyms_are_shared_between_files() {
    let dir = tempdir().expect("tempdir");
    let first = dir.path().join("first.dcm");
    let second = dir.path().join("second.dcm");
    write_patient_dicom(&first, "Doe^Jane", "PAT9", "030Y");
    write_patient_dicom(&second, "Doe^Jane", "PAT9", "031Y");

    let engine = engine();
    let key = KeyMaterial::generate();
    let a = anonymize::process_file(&first, None, Method::Pseudonymization, &engine, &key)
        .expect("first");
    let b = anonymize::process_file(&second, None, Method::Pseudonymization, &engine, &key)
        .expect("second");

    let name_a = text(&a, PatientField::Name).expect("name a");
    assert_ne!(name_a, "Doe^Jane");
    assert_eq!(Some(name_a), text(&b, PatientField::Name));
    assert_eq!(text(&a, PatientField::Id), text(&b, PatientField::Id));
    assert_eq!(text(&a, PatientField::BirthDate).as_deref(), Some(""));
}

#[test]
fn bucketization_understands_dicom_age_strings() {
    let (_dir, path) = build_test_dicom();
    let out = path.with_file_name("bucketed.dcm");
    anonymize::process_file(
        &path,
        Some(out.clone()),
        Method::Bucketization,
        &engine(),
        &KeyMaterial::generate(),
    )
    .expect("bucketize");

    assert_eq!(text(&out, PatientField::Age).as_deref(), Some("90+"));
    assert_eq!(text(&out, PatientField::Name).as_deref(), Some(""));
}

#[test]
fn malformed_age_fails_the_file_without_output() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("weeks.dcm");
    write_patient_dicom(&path, "Baby^Doe", "PAT1", "006W");

    let out = dir.path().join("weeks_out.dcm");
    let err = anonymize::process_file(
        &path,
        Some(out.clone()),
        Method::Bucketization,
        &engine(),
        &KeyMaterial::generate(),
    )
    .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<DeidError>(),
        Some(DeidError::MalformedAge(_))
    ));
    assert!(!out.exists());
}

#[test]
fn unknown_method_leaves_dicom_object_unchanged() {
    let (_dir, path) = build_test_dicom();
    let mut obj = open_file(&path).expect("open");
    let err = engine()
        .anonymize_named(&mut obj, "bogus", &KeyMaterial::generate())
        .unwrap_err();
    assert!(matches!(err, DeidError::InvalidMethod(_)));
    assert_eq!(obj.read_field(PatientField::Name).as_deref(), Some("Test^Patient"));
    assert_eq!(obj.read_field(PatientField::Sex).as_deref(), Some("M"));
}

#[test]
fn batch_anonymizes_every_file_consistently() {
    let dir = tempdir().expect("tempdir");
    let nested = dir.path().join("series");
    fs::create_dir_all(&nested).expect("mkdir");
    for (i, folder) in [dir.path(), nested.as_path(), nested.as_path()].iter().enumerate() {
        write_patient_dicom(&folder.join(format!("img{i}.dcm")), "Same^Patient", "PAT7", "020Y");
    }
    fs::write(dir.path().join("notes.txt"), b"ignored").expect("write txt");

    let summary = batch::process_directory(
        dir.path(),
        Method::Pseudonymization,
        &engine(),
        &KeyMaterial::generate(),
    )
    .expect("batch");
    assert_eq!(summary.processed, 3);
    assert_eq!(summary.failed, 0);

    let ids: Vec<_> = [
        dir.path().join("img0_anon.dcm"),
        nested.join("img1_anon.dcm"),
        nested.join("img2_anon.dcm"),
    ]
    .iter()
    .map(|p| text(p, PatientField::Id).expect("id"))
    .collect();
    assert!(ids.iter().all(|id| id == &ids[0] && id != "PAT7"));
}

#[test]
fn recovering_uploaded_bytes_keeps_stored_copy() {
    let (dir, path) = build_test_dicom();
    let key = KeyMaterial::generate();
    let anon = anonymize::process_file(&path, None, Method::Encryption, &engine(), &key)
        .expect("anonymize");
    let bytes = fs::read(&anon).expect("read anon");

    // Same bytes were uploaded earlier for download/anonymize.
    let store = FileStore::new(dir.path().join("uploads")).expect("store");
    let stored = store.save(Some("scan.dcm"), &bytes).expect("save");

    let (fields, report) = recover::recover_bytes(&bytes, &key).expect("recover");
    assert!(report.all_recovered());
    assert_eq!(fields.name.as_deref(), Some("Test^Patient"));

    let resolved = store.resolve(&stored.name).expect("upload still present");
    assert_eq!(fs::read(resolved).expect("read stored"), bytes);
}

#[test]
fn concurrent_recoveries_of_one_file_both_succeed() {
    let (_dir, path) = build_test_dicom();
    let key = KeyMaterial::generate();
    let anon = anonymize::process_file(&path, None, Method::Encryption, &engine(), &key)
        .expect("anonymize");
    let bytes = Arc::new(fs::read(&anon).expect("read anon"));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let bytes = Arc::clone(&bytes);
            let key = key.clone();
            thread::spawn(move || recover::recover_bytes(&bytes, &key).expect("recover"))
        })
        .collect();
    for handle in handles {
        let (fields, report) = handle.join().expect("join");
        assert!(report.all_recovered());
        assert_eq!(fields.id.as_deref(), Some("PAT123"));
    }
}
