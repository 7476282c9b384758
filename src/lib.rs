//
// lib.rs
// dicom-deid
//
// Exposes the de-identification core plus the CLI and web layers built on top of it.
//
// Thales Matheus Mendonça Santos - November 2025

// Core: key handling, pseudonyms, cipher, anonymization and recovery.
pub mod anonymize;
pub mod cipher;
pub mod dicom_access;
pub mod error;
pub mod keystore;
pub mod models;
pub mod pseudonym;
pub mod recover;

// Collaborators around the core.
pub mod batch;
pub mod cli;
pub mod storage;
pub mod web;

pub use anonymize::{age_to_bucket, Anonymizer, Method};
pub use cli::{run as run_cli, Cli, Commands};
pub use error::{DeidError, Result};
pub use keystore::{load_or_create_key, KeyMaterial, KeyStore};
pub use pseudonym::PseudonymRegistry;
pub use recover::recover;
