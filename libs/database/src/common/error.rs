use thiserror::Error;

/// Failure of a readiness probe.
///
/// Failures inside a transaction are [`super::StoreError`]s; this type only reports whether a
/// backend answered a probe, and which one did not.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("{backend} is unreachable: {message}")]
    Unreachable { backend: &'static str, message: String },

    #[error("{backend} answered the probe with '{response}'")]
    UnexpectedResponse { backend: &'static str, response: String },
}

impl DatabaseError {
    pub fn unreachable(backend: &'static str, err: impl std::fmt::Display) -> Self {
        DatabaseError::Unreachable {
            backend,
            message: err.to_string(),
        }
    }

    pub fn backend(&self) -> &'static str {
        match self {
            DatabaseError::Unreachable { backend, .. }
            | DatabaseError::UnexpectedResponse { backend, .. } => backend,
        }
    }
}
