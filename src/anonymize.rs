use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result as AnyResult};
use dicom::object::open_file;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::cipher::{CiphertextPolicy, ReversibleCipher};
use crate::dicom_access::{PatientField, PatientRecord};
use crate::error::{DeidError, Result};
use crate::keystore::KeyMaterial;
use crate::pseudonym::{random_token, PseudonymRegistry};

/// De-identification strategies. Exactly one runs per request.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Suppression,
    Randomization,
    Pseudonymization,
    Bucketization,
    Slicing,
    Encryption,
}

impl Method {
    pub const ALL: [Method; 6] = [
        Method::Suppression,
        Method::Randomization,
        Method::Pseudonymization,
        Method::Bucketization,
        Method::Slicing,
        Method::Encryption,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Method::Suppression => "suppression",
            Method::Randomization => "randomization",
            Method::Pseudonymization => "pseudonymization",
            Method::Bucketization => "bucketization",
            Method::Slicing => "slicing",
            Method::Encryption => "encryption",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = DeidError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim();
        Method::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| DeidError::InvalidMethod(s.to_string()))
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Sex {
    Male,
    Female,
    Other,
}

impl Sex {
    pub const ALL: [Sex; 3] = [Sex::Male, Sex::Female, Sex::Other];

    /// DICOM (0010,0040) code string.
    pub fn code(self) -> &'static str {
        match self {
            Sex::Male => "M",
            Sex::Female => "F",
            Sex::Other => "O",
        }
    }
}

pub const SLICE_NAME: &str = "SliceA";
pub const SLICE_ID: &str = "SliceB";
pub const SLICE_BIRTH_DATE: &str = "SliceC";

/// Coarse age label. Ages 30..90 fall into the top bucket as well.
pub fn age_to_bucket(age: u32) -> &'static str {
    match age {
        0..=9 => "0-10",
        10..=19 => "11-20",
        20..=29 => "21-30",
        _ => "90+",
    }
}

/// Accepts a bare integer or a DICOM Age String in years (`045Y`).
pub fn parse_age(raw: &str) -> Result<u32> {
    let trimmed = raw.trim();
    let digits = trimmed
        .strip_suffix('Y')
        .or_else(|| trimmed.strip_suffix('y'))
        .unwrap_or(trimmed);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(DeidError::MalformedAge(raw.to_string()));
    }
    digits
        .parse()
        .map_err(|_| DeidError::MalformedAge(raw.to_string()))
}

/// Applies de-identification methods, sharing one pseudonym registry.
#[derive(Clone)]
pub struct Anonymizer {
    registry: Arc<PseudonymRegistry>,
    policy: CiphertextPolicy,
}

impl Anonymizer {
    pub fn new(registry: Arc<PseudonymRegistry>) -> Self {
        Self {
            registry,
            policy: CiphertextPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: CiphertextPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn registry(&self) -> &PseudonymRegistry {
        &self.registry
    }

    /// Parses `method` first so an unknown name never touches the record.
    pub fn anonymize_named<R: PatientRecord + ?Sized>(
        &self,
        record: &mut R,
        method: &str,
        key: &KeyMaterial,
    ) -> Result<()> {
        let method: Method = method.parse()?;
        self.anonymize(record, method, key)
    }

    /// Rewrites the patient fields of `record` according to `method`.
    ///
    /// Every fallible step runs before the first write, so on error the
    /// record is left exactly as it was.
    pub fn anonymize<R: PatientRecord + ?Sized>(
        &self,
        record: &mut R,
        method: Method,
        key: &KeyMaterial,
    ) -> Result<()> {
        let sex = match method {
            Method::Suppression => {
                record.clear_field(PatientField::Name);
                record.clear_field(PatientField::Id);
                record.clear_field(PatientField::BirthDate);
                Sex::Other
            }
            Method::Randomization => {
                let mut rng = rand::thread_rng();
                record.write_field(PatientField::Name, &random_token(&mut rng));
                record.write_field(PatientField::Id, &random_token(&mut rng));
                record.clear_field(PatientField::BirthDate);
                Sex::ALL.choose(&mut rng).copied().unwrap_or(Sex::Other)
            }
            Method::Pseudonymization => {
                for field in [PatientField::Name, PatientField::Id] {
                    if let Some(original) = record.read_field(field).filter(|v| !v.is_empty()) {
                        let pseudonym = self.registry.pseudonym_for(&original);
                        record.write_field(field, &pseudonym);
                    }
                }
                record.clear_field(PatientField::BirthDate);
                Sex::Other
            }
            Method::Bucketization => {
                let bucket = record
                    .read_field(PatientField::Age)
                    .filter(|v| !v.is_empty())
                    .map(|raw| parse_age(&raw).map(age_to_bucket))
                    .transpose()?;
                if let Some(bucket) = bucket {
                    record.write_field(PatientField::Age, bucket);
                }
                record.clear_field(PatientField::Name);
                record.clear_field(PatientField::Id);
                record.clear_field(PatientField::BirthDate);
                Sex::Other
            }
            Method::Slicing => {
                record.write_field(PatientField::Name, SLICE_NAME);
                record.write_field(PatientField::Id, SLICE_ID);
                record.write_field(PatientField::BirthDate, SLICE_BIRTH_DATE);
                Sex::Other
            }
            Method::Encryption => {
                let cipher = ReversibleCipher::new(key)?;
                let mut sealed = Vec::with_capacity(2);
                for field in [PatientField::Name, PatientField::Id] {
                    if let Some(value) = record.read_field(field).filter(|v| !v.is_empty()) {
                        sealed.push((field, cipher.encrypt_for_field(&value, self.policy)?));
                    }
                }
                for (field, token) in sealed {
                    record.write_field(field, &token);
                }
                record.clear_field(PatientField::BirthDate);
                Sex::Other
            }
        };

        record.write_field(PatientField::Sex, sex.code());
        tracing::debug!(method = %method, "record anonymized");
        Ok(())
    }
}

/// Anonymizes a DICOM file on disk, writing `<stem>_anon.dcm` unless `output` is given.
pub fn process_file(
    input: &Path,
    output: Option<PathBuf>,
    method: Method,
    engine: &Anonymizer,
    key: &KeyMaterial,
) -> AnyResult<PathBuf> {
    let mut obj = open_file(input).context("Failed to open DICOM file")?;
    engine
        .anonymize(&mut obj, method, key)
        .with_context(|| format!("Failed to anonymize {:?}", input))?;

    let output_path = output.unwrap_or_else(|| default_output(input));
    obj.write_to_file(&output_path)
        .context("Failed to write anonymized DICOM file")?;
    tracing::info!(input = ?input, output = ?output_path, method = %method, "anonymized file");

    Ok(output_path)
}

fn default_output(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "dicom".to_string());
    input.with_file_name(format!("{}_anon.dcm", stem))
}
