//
// error.rs
// dicom-deid
//
// Error taxonomy shared by the de-identification core.
//
// Thales Matheus Mendonça Santos - November 2025

use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeidError {
    /// Method name that does not match any anonymization strategy.
    #[error("unknown anonymization method `{0}`")]
    InvalidMethod(String),

    /// Wrong key, tampered token or a value that was never a token.
    #[error("decryption failed")]
    DecryptionFailed,

    #[error("key file {path:?} is not accessible: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("encryption failed")]
    EncryptionFailed,

    #[error("patient age `{0}` is not an integer")]
    MalformedAge(String),

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    /// The encrypted value does not fit in the destination field.
    #[error("ciphertext of {len} characters exceeds the {max}-character field limit")]
    CiphertextTooLong { len: usize, max: usize },
}

impl DeidError {
    pub(crate) fn storage(path: impl Into<PathBuf>, source: io::Error) -> Self {
        DeidError::Storage {
            path: path.into(),
            source,
        }
    }

    /// True for errors caused by the request itself. Key and cipher
    /// problems on the server side are not the caller's fault.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            DeidError::InvalidMethod(_)
                | DeidError::MalformedAge(_)
                | DeidError::CiphertextTooLong { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, DeidError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_request_errors_are_client_errors() {
        assert!(DeidError::InvalidMethod("bogus".into()).is_client_error());
        assert!(DeidError::MalformedAge("forty".into()).is_client_error());
        assert!(DeidError::CiphertextTooLong { len: 66, max: 64 }.is_client_error());

        assert!(!DeidError::InvalidKey("expected 32 key bytes, found 3".into()).is_client_error());
        assert!(!DeidError::EncryptionFailed.is_client_error());
        assert!(!DeidError::DecryptionFailed.is_client_error());
        let io = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        assert!(!DeidError::storage("secret.key", io).is_client_error());
    }
}
