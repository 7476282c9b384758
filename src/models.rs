//
// models.rs
// dicom-deid
//
// Serializable patient record and recovery report used by the CLI and API responses.
//
// Thales Matheus Mendonça Santos - November 2025

use serde::{Deserialize, Serialize};

use crate::dicom_access::{PatientField, PatientRecord};

/// Plain patient fields, keyed like the DICOM attribute keywords in JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientFields {
    #[serde(rename = "PatientName")]
    pub name: Option<String>,
    #[serde(rename = "PatientID")]
    pub id: Option<String>,
    #[serde(rename = "PatientBirthDate")]
    pub birth_date: Option<String>,
    #[serde(rename = "PatientSex")]
    pub sex: Option<String>,
    #[serde(rename = "PatientAge")]
    pub age: Option<String>,
}

impl PatientFields {
    /// Snapshot of any record's patient fields.
    pub fn from_record<R: PatientRecord + ?Sized>(record: &R) -> Self {
        let mut fields = Self::default();
        for field in PatientField::ALL {
            *fields.slot(field) = record.read_field(field);
        }
        fields
    }

    fn slot(&mut self, field: PatientField) -> &mut Option<String> {
        match field {
            PatientField::Name => &mut self.name,
            PatientField::Id => &mut self.id,
            PatientField::BirthDate => &mut self.birth_date,
            PatientField::Sex => &mut self.sex,
            PatientField::Age => &mut self.age,
        }
    }
}

impl PatientRecord for PatientFields {
    fn read_field(&self, field: PatientField) -> Option<String> {
        match field {
            PatientField::Name => self.name.clone(),
            PatientField::Id => self.id.clone(),
            PatientField::BirthDate => self.birth_date.clone(),
            PatientField::Sex => self.sex.clone(),
            PatientField::Age => self.age.clone(),
        }
    }

    fn write_field(&mut self, field: PatientField, value: &str) {
        *self.slot(field) = Some(value.to_string());
    }
}

/// Result of one field's recovery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldOutcome {
    Recovered,
    Failed,
    /// Field missing or empty; nothing to decrypt.
    Absent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryReport {
    pub name: FieldOutcome,
    pub id: FieldOutcome,
}

impl RecoveryReport {
    pub fn all_recovered(&self) -> bool {
        self.name != FieldOutcome::Failed && self.id != FieldOutcome::Failed
    }
}
