//! Error types for registry operations

use ecr_driver::{DriverError, DriverErrorKind};
use thiserror::Error;

/// Errors returned by repository and image operations.
#[derive(Debug, Error)]
pub enum EcrError {
    /// The backing registry service failed.
    #[error(transparent)]
    Driver(#[from] DriverError),

    /// The service returned a record without a field the entity requires.
    #[error("{entity} record is missing {field}")]
    MissingField {
        /// The entity kind, e.g. `image`
        entity: &'static str,
        /// The missing field
        field: &'static str,
    },

    /// A policy document could not be serialized.
    #[error("Policy document: {0}")]
    Policy(#[from] serde_json::Error),
}

impl EcrError {
    pub(crate) fn missing(entity: &'static str, field: &'static str) -> Self {
        EcrError::MissingField { entity, field }
    }

    /// The driver error kind, if this error came from the registry service.
    pub fn kind(&self) -> Option<DriverErrorKind> {
        match self {
            EcrError::Driver(error) => Some(error.kind()),
            _ => None,
        }
    }

    /// Whether the registry reported a missing repository or image.
    pub fn is_not_found(&self) -> bool {
        self.kind().is_some_and(|kind| kind.is_not_found())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    static_assertions::assert_impl_all!(EcrError: Send, Sync);

    #[test]
    fn missing_field_message() {
        let error = EcrError::missing("image", "imageDigest");
        assert_eq!(error.to_string(), "image record is missing imageDigest");
        assert!(error.kind().is_none());
        assert!(!error.is_not_found());
    }

    #[test]
    fn driver_errors_keep_their_kind() {
        let error: EcrError =
            DriverError::new("memory", DriverErrorKind::RepositoryNotFound, "gone").into();
        assert_eq!(error.kind(), Some(DriverErrorKind::RepositoryNotFound));
        assert!(error.is_not_found());
    }
}
