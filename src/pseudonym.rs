//
// pseudonym.rs
// dicom-deid
//
// In-memory registry mapping original identifiers to stable random pseudonyms.
//
// Thales Matheus Mendonça Santos - November 2025

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};

use rand::Rng;

pub const TOKEN_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
pub const TOKEN_LEN: usize = 8;

/// Random uppercase-alphanumeric token, also used by the randomization method.
pub fn random_token<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..TOKEN_LEN)
        .map(|_| TOKEN_ALPHABET[rng.gen_range(0..TOKEN_ALPHABET.len())] as char)
        .collect()
}

#[derive(Default)]
struct RegistryState {
    by_original: HashMap<String, String>,
    issued: HashSet<String>,
}

/// Original value -> pseudonym mapping that only grows.
///
/// Mappings live as long as the registry does and are never written to disk,
/// so a new process hands out new pseudonyms for the same patients. Callers
/// that need cross-run consistency should use the encryption method instead.
#[derive(Default)]
pub struct PseudonymRegistry {
    state: Mutex<RegistryState>,
}

impl PseudonymRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pseudonym_for(&self, original: &str) -> String {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = state.by_original.get(original) {
            return existing.clone();
        }

        let mut rng = rand::thread_rng();
        let token = loop {
            let candidate = random_token(&mut rng);
            if !state.issued.contains(&candidate) {
                break candidate;
            }
        };
        state.issued.insert(token.clone());
        state.by_original.insert(original.to_string(), token.clone());
        tracing::debug!(total = state.by_original.len(), "issued new pseudonym");
        token
    }

    pub fn len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .by_original
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn same_original_maps_to_same_pseudonym() {
        let registry = PseudonymRegistry::new();
        let a = registry.pseudonym_for("Doe^John");
        let b = registry.pseudonym_for("Doe^John");
        assert_eq!(a, b);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn tokens_use_uppercase_alphanumerics() {
        let registry = PseudonymRegistry::new();
        let token = registry.pseudonym_for("PAT123");
        assert_eq!(token.len(), TOKEN_LEN);
        assert!(token.bytes().all(|b| TOKEN_ALPHABET.contains(&b)));
    }

    #[test]
    fn ten_thousand_distinct_inputs_do_not_collide() {
        let registry = PseudonymRegistry::new();
        let tokens: HashSet<String> = (0..10_000)
            .map(|i| registry.pseudonym_for(&format!("patient-{i}")))
            .collect();
        assert_eq!(tokens.len(), 10_000);
    }

    #[test]
    fn separate_registries_are_isolated() {
        let first = PseudonymRegistry::new();
        let second = PseudonymRegistry::new();
        first.pseudonym_for("PAT123");
        assert!(second.is_empty());
    }

    #[test]
    fn concurrent_lookups_agree() {
        let registry = Arc::new(PseudonymRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || registry.pseudonym_for("shared"))
            })
            .collect();
        let tokens: HashSet<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(tokens.len(), 1);
        assert_eq!(registry.len(), 1);
    }
}
