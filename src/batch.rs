use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use rayon::prelude::*;
use walkdir::WalkDir;

use crate::anonymize::{self, Anonymizer, Method};
use crate::keystore::KeyMaterial;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub processed: usize,
    pub failed: usize,
}

/// Anonymizes every `.dcm` under `dir` in parallel. All files share the
/// engine's registry, so a patient keeps one pseudonym across the batch.
pub fn process_directory(
    dir: &Path,
    method: Method,
    engine: &Anonymizer,
    key: &KeyMaterial,
) -> Result<BatchSummary> {
    println!("Processing directory: {:?} | Method: {}", dir, method);

    let files: Vec<_> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().map_or(false, |ext| ext == "dcm"))
        // Skip outputs of an earlier run.
        .filter(|e| {
            !e.path()
                .file_stem()
                .and_then(|s| s.to_str())
                .map_or(false, |s| s.ends_with("_anon"))
        })
        .collect();

    println!("Found {} files.", files.len());

    let failed = AtomicUsize::new(0);
    files.par_iter().for_each(|entry| {
        let path = entry.path();
        match anonymize::process_file(path, None, method, engine, key) {
            Ok(out) => println!("Done: {:?}", out.file_name().unwrap_or_default()),
            Err(e) => {
                failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!(path = ?path, error = %format!("{:#}", e), "batch item failed");
                eprintln!("Error in {:?}: {:#}", path, e);
            }
        }
    });

    let failed = failed.into_inner();
    Ok(BatchSummary {
        processed: files.len() - failed,
        failed,
    })
}
