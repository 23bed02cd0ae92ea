use std::borrow::Cow;

/// All possible error kinds.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// The definition is missing, malformed, or inconsistent.
    Validation,
    /// A collaborator answered with a non-success response.
    Remote,
    /// A collaborator does not know the requested entity.
    NotFound,
    /// A request could not be sent or its response could not be read.
    Network,
    /// Invalid `JSON` data.
    Json,
    /// Invalid `YAML` data.
    Yaml,
    /// A local file could not be read or written.
    Io,
    /// A bulk registry operation reported per-device failures.
    BulkOperation,
    /// A wait exceeded its ceiling.
    Timeout,
    /// A registry job ended without completing.
    Job,
}

impl ErrorKind {
    pub(crate) const fn description(self) -> &'static str {
        match self {
            Self::Validation => "Validation",
            Self::Remote => "Remote Call",
            Self::NotFound => "Not Found",
            Self::Network => "Network",
            Self::Json => "Json",
            Self::Yaml => "Yaml",
            Self::Io => "Input/Output",
            Self::BulkOperation => "Bulk Operation",
            Self::Timeout => "Timeout",
            Self::Job => "Registry Job",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.description().fmt(f)
    }
}

/// A provisioning error.
#[derive(PartialEq)]
pub struct Error {
    kind: ErrorKind,
    description: Cow<'static, str>,
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.error().fmt(f)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.error().fmt(f)
    }
}

impl std::error::Error for Error {}

impl Error {
    /// Creates an [`Error`] from an [`ErrorKind`] and a description.
    #[must_use]
    #[inline]
    pub fn new(kind: ErrorKind, description: impl Into<Cow<'static, str>>) -> Self {
        Self {
            kind,
            description: description.into(),
        }
    }

    /// Returns the [`ErrorKind`].
    #[must_use]
    #[inline]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error description.
    #[must_use]
    #[inline]
    pub fn description(&self) -> &str {
        &self.description
    }

    fn error(&self) -> String {
        format!("{}: {}", self.kind, self.description)
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        let kind = if e.is_timeout() {
            ErrorKind::Timeout
        } else if e.is_decode() {
            ErrorKind::Json
        } else {
            ErrorKind::Network
        };
        Self::new(kind, e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::new(ErrorKind::Io, e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::new(ErrorKind::Json, e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Self::new(ErrorKind::Yaml, e.to_string())
    }
}

/// A specialized [`Result`] type for [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
