//
// recover.rs
// dicom-deid
//
// Restores encrypted patient fields, reporting success or failure for each field independently.
//
// Thales Matheus Mendonça Santos - November 2025

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result as AnyResult};
use dicom::object::open_file;

use crate::cipher::ReversibleCipher;
use crate::dicom_access::{PatientField, PatientRecord};
use crate::error::Result;
use crate::keystore::KeyMaterial;
use crate::models::{FieldOutcome, PatientFields, RecoveryReport};

/// Written in place of a field whose token could not be decrypted.
pub const DECRYPTION_FAILED: &str = "Decryption failed";

/// Decrypts Name and ID in place. Birth date and sex were destroyed at
/// anonymization time and are left as they are.
///
/// Only unusable key material fails the call; a bad field becomes
/// [`DECRYPTION_FAILED`] and the next field is still attempted.
pub fn recover<R: PatientRecord + ?Sized>(record: &mut R, key: &KeyMaterial) -> Result<RecoveryReport> {
    let cipher = ReversibleCipher::new(key)?;
    Ok(RecoveryReport {
        name: recover_field(record, &cipher, PatientField::Name),
        id: recover_field(record, &cipher, PatientField::Id),
    })
}

fn recover_field<R: PatientRecord + ?Sized>(
    record: &mut R,
    cipher: &ReversibleCipher,
    field: PatientField,
) -> FieldOutcome {
    let token = match record.read_field(field).filter(|v| !v.is_empty()) {
        Some(token) => token,
        None => return FieldOutcome::Absent,
    };

    match cipher.decrypt(&token) {
        Ok(plain) => {
            record.write_field(field, &plain);
            tracing::debug!(field = ?field, "field recovered");
            FieldOutcome::Recovered
        }
        Err(err) => {
            tracing::warn!(field = ?field, error = %err, "field could not be recovered");
            record.write_field(field, DECRYPTION_FAILED);
            FieldOutcome::Failed
        }
    }
}

/// Opens a DICOM file, recovers it and optionally writes the restored copy.
pub fn recover_file(
    input: &Path,
    output: Option<PathBuf>,
    key: &KeyMaterial,
) -> AnyResult<(PatientFields, RecoveryReport)> {
    let mut obj = open_file(input).context("Failed to open DICOM file")?;
    let report = recover(&mut obj, key).context("Failed to load decryption key")?;

    if let Some(path) = output {
        obj.write_to_file(&path)
            .context("Failed to write recovered DICOM file")?;
        tracing::info!(output = ?path, "recovered file written");
    }

    Ok((PatientFields::from_record(&obj), report))
}

/// Recovers an uploaded DICOM held in memory. The bytes go to a private
/// scratch file that is removed when the call returns.
pub fn recover_bytes(bytes: &[u8], key: &KeyMaterial) -> AnyResult<(PatientFields, RecoveryReport)> {
    let mut scratch = tempfile::Builder::new()
        .prefix("dicom-deid-")
        .suffix(".dcm")
        .tempfile()
        .context("Failed to create scratch file")?;
    scratch
        .write_all(bytes)
        .and_then(|()| scratch.flush())
        .context("Failed to buffer uploaded DICOM")?;
    recover_file(scratch.path(), None, key)
}
