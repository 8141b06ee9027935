use mesh_controller_core::CommonName;
use mesh_controller_k8s_api::{duration::ParseError, SecretReference};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("certificate spec must specify at least one subject alternative name")]
    NoSubjectAltNames,

    #[error("invalid validity duration {value:?}: {source}")]
    InvalidDuration {
        value: String,
        #[source]
        source: ParseError,
    },

    #[error("secret name and namespace must be set, got {0}")]
    InvalidSecret(SecretReference),

    #[error("failed to issue a certificate for {cn}: {error}")]
    Issue { cn: CommonName, error: anyhow::Error },

    #[error("failed to store the certificate in secret {secret}: {error}")]
    Store {
        secret: SecretReference,
        error: anyhow::Error,
    },

    #[error("failed to delete secret {secret}: {error}")]
    Delete {
        secret: SecretReference,
        error: anyhow::Error,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidSpec,
    IssuanceFailure,
    StoreFailure,
}

// === impl Error ===

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoSubjectAltNames | Self::InvalidDuration { .. } | Self::InvalidSecret(_) => {
                ErrorKind::InvalidSpec
            }
            Self::Issue { .. } => ErrorKind::IssuanceFailure,
            Self::Store { .. } | Self::Delete { .. } => ErrorKind::StoreFailure,
        }
    }
}
