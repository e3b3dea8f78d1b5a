//! Error taxonomy shared by the container engine, the format plugins and the
//! operation dispatcher.
//!
//! Every variant maps to a short, stable [`ArfxError::kind`] string.  Fatal
//! messages are printed as `<path>: <kind>: <detail>`; per-item failures are
//! collected in the dispatcher's report and do not abort the invocation.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub type Result<T, E = ArfxError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum ArfxError {
    #[error("{}: no such file or directory", path.display())]
    NotFound { path: PathBuf },
    #[error("{}: permission denied", path.display())]
    AccessDenied { path: PathBuf },
    /// No format plugin is registered for the path's extension.
    #[error("{}: no format plugin registered for this extension", path.display())]
    UnsupportedFormat { path: PathBuf },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Read attempted on a writer, or write on a reader.
    #[error("operation not permitted in {mode} mode")]
    WrongMode { mode: &'static str },
    #[error("type mismatch: {0}")]
    TypeMismatch(String),
    #[error("entry '{name}' already exists")]
    NameConflict { name: String },
    #[error("cannot resolve field '{field}' in template '{template}'")]
    TemplateResolution { template: String, field: String },
    #[error("no such entry: {0}")]
    NoSuchEntry(String),
    /// Corrupt container bytes, checksum mismatch, or an unparseable
    /// external file.
    #[error("{}: malformed data: {reason}", path.display())]
    Malformed { path: PathBuf, reason: String },
    #[error("format registry: {0}")]
    Registry(String),
    #[error("index error: {0}")]
    Index(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl ArfxError {
    /// Map an `io::Error` raised while opening `path` onto the taxonomy.
    pub fn open_failed(path: &Path, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound         => ArfxError::NotFound { path: path.to_owned() },
            io::ErrorKind::PermissionDenied => ArfxError::AccessDenied { path: path.to_owned() },
            _                               => ArfxError::Io(err),
        }
    }

    pub fn malformed(path: &Path, reason: impl Into<String>) -> Self {
        ArfxError::Malformed { path: path.to_owned(), reason: reason.into() }
    }

    /// Stable short name of the failure kind.
    pub fn kind(&self) -> &'static str {
        match self {
            ArfxError::NotFound { .. }           => "NotFound",
            ArfxError::AccessDenied { .. }       => "AccessDenied",
            ArfxError::UnsupportedFormat { .. }  => "UnsupportedFormat",
            ArfxError::InvalidArgument(_)        => "InvalidArgument",
            ArfxError::WrongMode { .. }          => "WrongMode",
            ArfxError::TypeMismatch(_)           => "TypeMismatch",
            ArfxError::NameConflict { .. }       => "NameConflict",
            ArfxError::TemplateResolution { .. } => "TemplateResolutionError",
            ArfxError::NoSuchEntry(_)            => "NoSuchEntry",
            ArfxError::Malformed { .. }          => "Malformed",
            ArfxError::Registry(_)               => "RegistryError",
            ArfxError::Index(_)                  => "IndexError",
            ArfxError::Io(_)                     => "IoError",
        }
    }
}
