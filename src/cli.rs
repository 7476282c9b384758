//
// cli.rs
// dicom-deid
//
// Defines the CLI surface with Clap and dispatches user-selected commands to the corresponding modules.
//
// Thales Matheus Mendonça Santos - November 2025

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use dicom::object::open_file;
use serde_json::json;

use crate::anonymize::{self, Anonymizer, Method};
use crate::cipher::CiphertextPolicy;
use crate::keystore::{KeyMaterial, KeyStore, DEFAULT_KEY_PATH};
use crate::models::PatientFields;
use crate::pseudonym::PseudonymRegistry;
use crate::{batch, recover, web};

#[derive(Parser)]
#[command(name = "dicom-deid")]
#[command(about = "De-identify and re-identify DICOM patient data", long_about = None)]
pub struct Cli {
    /// Location of the encryption key, created on first use
    #[arg(long, global = true, env = "DICOM_DEID_KEY_FILE", default_value = DEFAULT_KEY_PATH)]
    pub key_file: PathBuf,

    /// Cut oversized ciphertexts to 64 characters instead of failing (they will not decrypt)
    #[arg(long, global = true)]
    pub lossy_truncate: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Anonymize a DICOM file
    Anonymize {
        input: PathBuf,
        #[arg(short, long, value_enum)]
        method: MethodArg,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Restore patient fields of a file anonymized with the encryption method
    Recover {
        input: PathBuf,
        /// Key file to use instead of --key-file
        #[arg(short, long)]
        key: Option<PathBuf>,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Ensure the key exists and print its location, or copy it elsewhere
    Key {
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Print the patient fields of a DICOM file as JSON
    Info { input: PathBuf },
    /// Anonymize every .dcm file under a directory
    Batch {
        #[arg(short, long)]
        directory: PathBuf,
        #[arg(short, long, value_enum)]
        method: MethodArg,
    },
    /// Start the web server
    Web {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(short, long, default_value_t = 5000)]
        port: u16,
        #[arg(long, default_value = "target/uploads")]
        uploads: PathBuf,
    },
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum MethodArg {
    Suppression,
    Randomization,
    Pseudonymization,
    Bucketization,
    Slicing,
    Encryption,
}

impl From<MethodArg> for Method {
    fn from(value: MethodArg) -> Self {
        match value {
            MethodArg::Suppression => Method::Suppression,
            MethodArg::Randomization => Method::Randomization,
            MethodArg::Pseudonymization => Method::Pseudonymization,
            MethodArg::Bucketization => Method::Bucketization,
            MethodArg::Slicing => Method::Slicing,
            MethodArg::Encryption => Method::Encryption,
        }
    }
}

impl Cli {
    fn policy(&self) -> CiphertextPolicy {
        if self.lossy_truncate {
            CiphertextPolicy::Truncate
        } else {
            CiphertextPolicy::Reject
        }
    }
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let key_store = KeyStore::new(&cli.key_file);
    let engine = Anonymizer::new(Arc::new(PseudonymRegistry::new())).with_policy(cli.policy());

    match cli.command {
        Commands::Anonymize {
            input,
            method,
            output,
        } => {
            let key = key_store.load_or_create()?;
            let out = anonymize::process_file(&input, output, method.into(), &engine, &key)?;
            println!("Anonymized file saved to: {:?}", out);
        }
        Commands::Recover { input, key, output } => {
            let key = match key {
                Some(path) => KeyMaterial::from_bytes(
                    fs::read(&path).with_context(|| format!("Failed to read key file {:?}", path))?,
                ),
                None => key_store.load_or_create()?,
            };
            let (fields, report) = recover::recover_file(&input, output, &key)?;
            let body = json!({ "fields": fields, "report": report });
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
        Commands::Key { output } => {
            key_store.load_or_create()?;
            match output {
                Some(path) => {
                    if path.exists() {
                        bail!("Refusing to overwrite existing file {:?}", path);
                    }
                    fs::copy(key_store.path(), &path).context("Failed to export key")?;
                    println!("Key exported to: {:?}", path);
                }
                None => println!("{}", key_store.path().display()),
            }
        }
        Commands::Info { input } => {
            let obj = open_file(&input).context("Failed to open DICOM file")?;
            let fields = PatientFields::from_record(&obj);
            println!("{}", serde_json::to_string_pretty(&fields)?);
        }
        Commands::Batch { directory, method } => {
            let key = key_store.load_or_create()?;
            let summary = batch::process_directory(&directory, method.into(), &engine, &key)?;
            println!(
                "Batch finished: {} succeeded, {} failed",
                summary.processed, summary.failed
            );
        }
        Commands::Web {
            host,
            port,
            uploads,
        } => web::start_server(&host, port, &uploads, key_store, engine).await?,
    }

    Ok(())
}
