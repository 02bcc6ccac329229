use std::backtrace::Backtrace;
use std::error::Error as StdError;
use std::fmt;

use tracing_error::SpanTrace;

/// Categorizes registry errors by their meaning, independent of the
/// driver that produced them.
///
/// The entity layer relies on these kinds to tell "absent" apart from
/// "broken": only the not-found kinds are ever turned into an empty result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    /// The named repository does not exist in the registry.
    ///
    /// **Retryable:** No.
    RepositoryNotFound,

    /// The requested image (by tag or digest) does not exist in the repository.
    ///
    /// **Retryable:** No.
    ImageNotFound,

    /// The service rejected the request because of its rate limits.
    ///
    /// **Retryable:** Yes, with backoff.
    Throttled,

    /// The caller lacks permission to perform the requested operation.
    ///
    /// **Retryable:** No - unless credentials are updated.
    PermissionDenied,

    /// The request was invalid (bad parameters, malformed policy, etc.).
    ///
    /// **Retryable:** No - the request itself is invalid.
    InvalidRequest,

    /// The backing service is temporarily unavailable.
    ///
    /// **Retryable:** Yes - the service should recover.
    ServiceUnavailable,

    /// The request could not be dispatched or the response was lost.
    ///
    /// **Retryable:** Maybe - depends on whether the issue is transient.
    Io,

    /// A response could not be decoded into the expected shape.
    ///
    /// **Retryable:** No.
    SerializationError,

    /// An unexpected or uncategorized error occurred.
    Other,
}

impl DriverErrorKind {
    /// Returns whether this error kind typically indicates a retryable condition.
    ///
    /// Retrying is opt-in: only a caller-supplied `Backoff` in the `ecr`
    /// crate acts on this.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DriverErrorKind::Throttled | DriverErrorKind::ServiceUnavailable | DriverErrorKind::Io
        )
    }

    /// Returns whether this kind reports a missing repository or image.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            DriverErrorKind::RepositoryNotFound | DriverErrorKind::ImageNotFound
        )
    }
}

impl fmt::Display for DriverErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverErrorKind::RepositoryNotFound => write!(f, "repository not found"),
            DriverErrorKind::ImageNotFound => write!(f, "image not found"),
            DriverErrorKind::Throttled => write!(f, "throttled"),
            DriverErrorKind::PermissionDenied => write!(f, "permission denied"),
            DriverErrorKind::InvalidRequest => write!(f, "invalid request"),
            DriverErrorKind::ServiceUnavailable => write!(f, "service unavailable"),
            DriverErrorKind::Io => write!(f, "I/O error"),
            DriverErrorKind::SerializationError => write!(f, "serialization error"),
            DriverErrorKind::Other => write!(f, "other error"),
        }
    }
}

#[derive(Debug)]
struct ErrorTrace {
    /// Controlled by RUST_BACKTRACE.
    backtrace: Backtrace,

    /// Span context at the point where the error was created.
    span_trace: SpanTrace,
}

impl ErrorTrace {
    #[track_caller]
    fn capture() -> Self {
        ErrorTrace {
            backtrace: Backtrace::capture(),
            span_trace: SpanTrace::capture(),
        }
    }
}

/// An error returned by a registry driver.
///
/// Carries the semantic [`DriverErrorKind`], the driver that produced it, the
/// operation and repository involved (when known), and the underlying error.
///
/// # Example
///
/// ```rust
/// use ecr_driver::{DriverError, DriverErrorKind};
///
/// let error = DriverError::builder("memory", DriverErrorKind::RepositoryNotFound, "no such repository")
///     .operation("DescribeRepositories")
///     .repository("demo")
///     .build();
///
/// assert!(error.is_not_found());
/// ```
#[derive(Debug)]
pub struct DriverError {
    kind: DriverErrorKind,
    engine: &'static str,
    operation: Option<&'static str>,
    repository: Option<String>,
    source: Box<dyn StdError + Send + Sync + 'static>,
    traces: Box<ErrorTrace>,
}

impl StdError for DriverError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.source.as_ref())
    }
}

impl DriverError {
    /// Create a new driver error with the minimum required information.
    pub fn new<E>(engine: &'static str, kind: DriverErrorKind, error: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        Self {
            kind,
            engine,
            operation: None,
            repository: None,
            source: error.into(),
            traces: Box::new(ErrorTrace::capture()),
        }
    }

    /// Create a builder for a driver error with operation context.
    pub fn builder<E>(engine: &'static str, kind: DriverErrorKind, error: E) -> DriverErrorBuilder
    where
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        DriverErrorBuilder {
            engine,
            kind,
            source: error.into(),
            operation: None,
            repository: None,
        }
    }

    /// Returns the error kind.
    pub fn kind(&self) -> DriverErrorKind {
        self.kind
    }

    /// Returns the driver name.
    pub fn engine(&self) -> &'static str {
        self.engine
    }

    /// Returns the registry operation which failed, if available.
    pub fn operation(&self) -> Option<&'static str> {
        self.operation
    }

    /// Returns the repository name, if available.
    pub fn repository(&self) -> Option<&str> {
        self.repository.as_deref()
    }

    /// Returns whether this error reports a missing repository or image.
    pub fn is_not_found(&self) -> bool {
        self.kind.is_not_found()
    }

    /// Returns whether this error is likely retryable.
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// Returns a reference to the captured backtrace.
    pub fn backtrace(&self) -> &Backtrace {
        &self.traces.backtrace
    }

    /// Returns a reference to the captured span trace.
    pub fn span_trace(&self) -> &SpanTrace {
        &self.traces.span_trace
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Registry error [{}] from {}", self.kind, self.engine)?;

        if let Some(operation) = self.operation {
            write!(f, " (operation: {})", operation)?;
        }

        if let Some(repository) = &self.repository {
            write!(f, " (repository: {})", repository)?;
        }

        write!(f, ": {}", self.source)
    }
}

/// Builder for a [`DriverError`] with optional context fields.
#[derive(Debug)]
pub struct DriverErrorBuilder {
    kind: DriverErrorKind,
    engine: &'static str,
    source: Box<dyn StdError + Send + Sync + 'static>,
    operation: Option<&'static str>,
    repository: Option<String>,
}

impl DriverErrorBuilder {
    /// Set the registry operation name.
    pub fn operation(mut self, operation: &'static str) -> Self {
        self.operation = Some(operation);
        self
    }

    /// Set the repository name.
    pub fn repository(mut self, repository: impl Into<String>) -> Self {
        self.repository = Some(repository.into());
        self
    }

    /// Build the `DriverError`.
    pub fn build(self) -> DriverError {
        DriverError {
            kind: self.kind,
            engine: self.engine,
            operation: self.operation,
            repository: self.repository,
            source: self.source,
            traces: Box::new(ErrorTrace::capture()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    static_assertions::assert_impl_all!(DriverError: Send, Sync, StdError);

    #[test]
    fn display_includes_context() {
        let error = DriverError::builder("memory", DriverErrorKind::ImageNotFound, "missing")
            .operation("DescribeImages")
            .repository("demo")
            .build();

        assert_eq!(
            error.to_string(),
            "Registry error [image not found] from memory (operation: DescribeImages) (repository: demo): missing"
        );
        assert!(error.is_not_found());
        assert!(!error.is_retryable());
    }

    #[test]
    fn throttling_is_retryable_but_not_missing() {
        let error = DriverError::new("memory", DriverErrorKind::Throttled, "slow down");
        assert!(error.is_retryable());
        assert!(!error.is_not_found());
        assert!(error.operation().is_none());
    }
}
