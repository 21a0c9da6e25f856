//! Error type shared by every stage of the engine.
//!
//! An [`EtlError`] carries an [`ErrorKind`] used for policy decisions (skip, roll back, abort),
//! a static description, an optional dynamic detail, the originating error and the call site
//! that raised it. Failures of several independent units can be folded into one error.

use std::backtrace::Backtrace;
use std::borrow::Cow;
use std::error;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::panic::Location;
use std::sync::Arc;

/// Result alias used throughout the crate.
pub type EtlResult<T> = Result<T, EtlError>;

#[derive(Debug, Clone)]
struct ErrorPayload {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
    backtrace: Arc<Backtrace>,
}

/// Error raised by extract, transform, state and load code.
#[derive(Debug, Clone)]
pub struct EtlError {
    repr: ErrorRepr,
}

#[derive(Debug, Clone)]
enum ErrorRepr {
    Single(ErrorPayload),
    /// Errors of independent units, e.g. several transform workers.
    Many {
        errors: Vec<EtlError>,
        location: &'static Location<'static>,
    },
}

/// Classification of failures.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // Source input
    ExtractError,
    MissingField,

    // State store
    ValidationError,
    DuplicateKey,
    MissingKey,
    StateStoreError,
    IdSpaceExhausted,

    // Dispatch and row generation
    NoActionMatch,
    MultipleActionMatches,
    TableNotFound,

    // Target database
    LoadError,
    DestinationConnectionFailed,
    DestinationQueryFailed,

    // Data handling
    ConversionError,
    InvalidData,
    SerializationError,
    DeserializationError,
    EncryptionError,

    // Environment
    ConfigError,
    IoError,

    // Workflow
    InvalidState,
    TransformWorkerPanic,

    Unknown,
}

impl EtlError {
    /// Returns the [`ErrorKind`] of this error, or of the first aggregated error.
    pub fn kind(&self) -> ErrorKind {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.kind,
            ErrorRepr::Many { ref errors, .. } => errors
                .first()
                .map(|err| err.kind())
                .unwrap_or(ErrorKind::Unknown),
        }
    }

    /// Returns every [`ErrorKind`] contained in this error.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match self.repr {
            ErrorRepr::Single(ref payload) => vec![payload.kind],
            ErrorRepr::Many { ref errors, .. } => errors.iter().flat_map(|err| err.kinds()).collect(),
        }
    }

    /// Returns the static description.
    pub fn description(&self) -> &str {
        match self.repr {
            ErrorRepr::Single(ref payload) => &payload.description,
            ErrorRepr::Many { .. } => "multiple errors",
        }
    }

    /// Returns the dynamic detail, if any.
    pub fn detail(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.detail.as_deref(),
            ErrorRepr::Many { ref errors, .. } => errors.iter().find_map(|e| e.detail()),
        }
    }

    /// Returns the call site that raised the error.
    pub fn location(&self) -> &'static Location<'static> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.location,
            ErrorRepr::Many { location, .. } => location,
        }
    }

    /// Returns the backtrace captured when the error was raised.
    pub fn backtrace(&self) -> Option<&Backtrace> {
        match self.repr {
            ErrorRepr::Single(ref payload) => Some(payload.backtrace.as_ref()),
            ErrorRepr::Many { .. } => None,
        }
    }

    /// Attaches the originating error.
    ///
    /// Aggregated errors ignore the call and keep forwarding their first error as source.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        if let ErrorRepr::Single(ref mut payload) = self.repr {
            payload.source = Some(Arc::new(source));
        }
        self
    }

    /// Returns a copy of this error with a different kind, keeping every other field.
    ///
    /// Used by the loaders to reclassify database failures of a transaction as
    /// [`ErrorKind::LoadError`].
    pub fn with_kind(mut self, kind: ErrorKind) -> Self {
        match self.repr {
            ErrorRepr::Single(ref mut payload) => payload.kind = kind,
            ErrorRepr::Many { ref mut errors, .. } => {
                *errors = errors.drain(..).map(|err| err.with_kind(kind)).collect();
            }
        }
        self
    }

    #[track_caller]
    fn from_components(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    ) -> Self {
        EtlError {
            repr: ErrorRepr::Single(ErrorPayload {
                kind,
                description,
                detail,
                source,
                location: Location::caller(),
                backtrace: Arc::new(Backtrace::capture()),
            }),
        }
    }

    #[track_caller]
    fn from_source<E>(kind: ErrorKind, description: &'static str, err: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        let detail = err.to_string();
        EtlError::from_components(
            kind,
            Cow::Borrowed(description),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

impl PartialEq for EtlError {
    fn eq(&self, other: &EtlError) -> bool {
        match (&self.repr, &other.repr) {
            (ErrorRepr::Single(a), ErrorRepr::Single(b)) => a.kind == b.kind,
            (ErrorRepr::Many { errors: a, .. }, ErrorRepr::Many { errors: b, .. }) => a == b,
            _ => false,
        }
    }
}

impl Eq for EtlError {}

impl Hash for EtlError {
    /// Hashes the kind and static description only, so repeated failures group together.
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(&self.repr).hash(state);
        match &self.repr {
            ErrorRepr::Single(payload) => {
                payload.kind.hash(state);
                payload.description.hash(state);
            }
            ErrorRepr::Many { errors, .. } => {
                errors.len().hash(state);
                for error in errors {
                    error.hash(state);
                }
            }
        }
    }
}

impl fmt::Display for EtlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            ErrorRepr::Single(payload) => {
                let location = payload.location;
                write!(
                    f,
                    "[{:?}] {} @ {}:{}",
                    payload.kind,
                    payload.description,
                    location.file(),
                    location.line()
                )?;

                if let Some(detail) = payload.detail.as_deref() {
                    write_indented(f, "Detail", detail)?;
                }

                let backtrace = payload.backtrace.to_string();
                if !backtrace.trim().is_empty() && !backtrace.starts_with("disabled") {
                    write_indented(f, "Backtrace", &backtrace)?;
                }

                Ok(())
            }
            ErrorRepr::Many { errors, location } => {
                write!(
                    f,
                    "[Many] {} error{} @ {}:{}",
                    errors.len(),
                    if errors.len() == 1 { "" } else { "s" },
                    location.file(),
                    location.line()
                )?;

                for (index, error) in errors.iter().enumerate() {
                    let rendered = error.to_string();
                    let mut lines = rendered.lines();
                    write!(f, "\n  {}. {}", index + 1, lines.next().unwrap_or_default())?;
                    for line in lines {
                        write!(f, "\n     {line}")?;
                    }
                }

                Ok(())
            }
        }
    }
}

fn write_indented(f: &mut fmt::Formatter<'_>, title: &str, body: &str) -> fmt::Result {
    write!(f, "\n  {title}:")?;
    for line in body.lines() {
        if line.trim().is_empty() {
            write!(f, "\n    ")?;
        } else {
            write!(f, "\n    {line}")?;
        }
    }

    Ok(())
}

impl error::Error for EtlError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.repr {
            ErrorRepr::Single(payload) => payload
                .source
                .as_ref()
                .map(|source| source.as_ref() as &(dyn error::Error + 'static)),
            ErrorRepr::Many { errors, .. } => errors
                .first()
                .map(|error| error as &(dyn error::Error + 'static)),
        }
    }
}

impl From<(ErrorKind, &'static str)> for EtlError {
    #[track_caller]
    fn from((kind, desc): (ErrorKind, &'static str)) -> EtlError {
        EtlError::from_components(kind, Cow::Borrowed(desc), None, None)
    }
}

impl<D> From<(ErrorKind, &'static str, D)> for EtlError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, desc, detail): (ErrorKind, &'static str, D)) -> EtlError {
        EtlError::from_components(kind, Cow::Borrowed(desc), Some(detail.into()), None)
    }
}

/// Folds several errors into one; a single error is returned unchanged.
impl<E> From<Vec<E>> for EtlError
where
    E: Into<EtlError>,
{
    #[track_caller]
    fn from(errors: Vec<E>) -> EtlError {
        let location = Location::caller();
        let mut errors: Vec<EtlError> = errors.into_iter().map(Into::into).collect();

        if errors.len() == 1 {
            if let Some(error) = errors.pop() {
                return error;
            }
        }

        EtlError {
            repr: ErrorRepr::Many { errors, location },
        }
    }
}

impl From<std::io::Error> for EtlError {
    #[track_caller]
    fn from(err: std::io::Error) -> EtlError {
        EtlError::from_source(ErrorKind::IoError, "I/O operation failed", err)
    }
}

impl From<serde_json::Error> for EtlError {
    #[track_caller]
    fn from(err: serde_json::Error) -> EtlError {
        let (kind, description) = match err.classify() {
            serde_json::error::Category::Io => (ErrorKind::IoError, "JSON I/O operation failed"),
            serde_json::error::Category::Syntax
            | serde_json::error::Category::Data
            | serde_json::error::Category::Eof => {
                (ErrorKind::DeserializationError, "JSON deserialization failed")
            }
        };

        EtlError::from_source(kind, description, err)
    }
}

impl From<std::num::ParseIntError> for EtlError {
    #[track_caller]
    fn from(err: std::num::ParseIntError) -> EtlError {
        EtlError::from_source(ErrorKind::ConversionError, "Integer parsing failed", err)
    }
}

impl From<uuid::Error> for EtlError {
    #[track_caller]
    fn from(err: uuid::Error) -> EtlError {
        EtlError::from_source(ErrorKind::InvalidData, "UUID parsing failed", err)
    }
}

impl From<chrono::ParseError> for EtlError {
    #[track_caller]
    fn from(err: chrono::ParseError) -> EtlError {
        EtlError::from_source(ErrorKind::ConversionError, "Datetime parsing failed", err)
    }
}

impl From<base64::DecodeError> for EtlError {
    #[track_caller]
    fn from(err: base64::DecodeError) -> EtlError {
        EtlError::from_source(ErrorKind::EncryptionError, "Base64 decoding failed", err)
    }
}

impl From<csv::Error> for EtlError {
    #[track_caller]
    fn from(err: csv::Error) -> EtlError {
        let kind = if err.is_io_error() {
            ErrorKind::IoError
        } else {
            ErrorKind::SerializationError
        };

        EtlError::from_source(kind, "CSV staging failed", err)
    }
}

impl From<sqlx::Error> for EtlError {
    #[track_caller]
    fn from(err: sqlx::Error) -> EtlError {
        let description = match &err {
            sqlx::Error::Io(_) => "State snapshot I/O failed",
            sqlx::Error::Database(_) => "State snapshot query failed",
            _ => "State snapshot operation failed",
        };

        EtlError::from_source(ErrorKind::StateStoreError, description, err)
    }
}

impl From<postgres::types::ValueConversionError> for EtlError {
    #[track_caller]
    fn from(err: postgres::types::ValueConversionError) -> EtlError {
        EtlError::from_source(ErrorKind::ConversionError, "Value rendering failed", err)
    }
}

impl From<postgres::sql::StatementError> for EtlError {
    #[track_caller]
    fn from(err: postgres::sql::StatementError) -> EtlError {
        let kind = match &err {
            postgres::sql::StatementError::Conversion(_) => ErrorKind::ConversionError,
            _ => ErrorKind::InvalidData,
        };

        EtlError::from_source(kind, "Statement building failed", err)
    }
}

impl From<postgres::client::ConnectError> for EtlError {
    #[track_caller]
    fn from(err: postgres::client::ConnectError) -> EtlError {
        EtlError::from_source(
            ErrorKind::DestinationConnectionFailed,
            "PostgreSQL connection failed",
            err,
        )
    }
}

/// Classifies target database errors by SQLSTATE class.
impl From<tokio_postgres::Error> for EtlError {
    #[track_caller]
    fn from(err: tokio_postgres::Error) -> EtlError {
        use tokio_postgres::error::SqlState;

        let (kind, description) = match err.code() {
            None => (
                ErrorKind::DestinationConnectionFailed,
                "PostgreSQL connection failed",
            ),
            Some(code) if *code == SqlState::UNIQUE_VIOLATION => {
                (ErrorKind::DuplicateKey, "PostgreSQL unique violation")
            }
            Some(code) => match &code.code()[..2] {
                "08" | "28" | "53" | "57" => (
                    ErrorKind::DestinationConnectionFailed,
                    "PostgreSQL connection unavailable",
                ),
                "22" => (
                    ErrorKind::ConversionError,
                    "PostgreSQL data conversion failed",
                ),
                "23" => (
                    ErrorKind::ValidationError,
                    "PostgreSQL constraint violation",
                ),
                "25" | "40" | "55" => (ErrorKind::InvalidState, "PostgreSQL transaction failed"),
                "42" => (
                    ErrorKind::DestinationQueryFailed,
                    "PostgreSQL syntax or schema error",
                ),
                _ => (ErrorKind::DestinationQueryFailed, "PostgreSQL error"),
            },
        };

        EtlError::from_source(kind, description, err)
    }
}
