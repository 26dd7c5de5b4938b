//! Error taxonomy for the build engine.
//!
//! Resolution and loader failures are module-scoped: they are collected per
//! build as [`BuildIssue`]s and reported together, so one bad import does not
//! hide the rest. Config and emit failures abort the operation that raised
//! them.

use std::path::PathBuf;
use thiserror::Error;

/// Failure to map an import specifier to a module on disk.
#[derive(Error, Debug, Clone)]
pub enum ResolutionError {
    #[error("cannot resolve '{specifier}' from {from}: no candidate file exists")]
    NotFound { specifier: String, from: PathBuf },

    /// A candidate exists, but only under a different case. Raised even on
    /// case-insensitive filesystems so builds behave the same everywhere.
    #[error("cannot resolve '{specifier}' from {from}: '{requested}' exists on disk as '{found}'")]
    CaseMismatch {
        specifier: String,
        from: PathBuf,
        requested: String,
        found: String,
    },
}

/// Failure inside a module's transform chain.
#[derive(Error, Debug, Clone)]
pub enum LoaderError {
    #[error("transform '{transform}' failed for {module}: {cause}")]
    TransformFailure {
        transform: String,
        module: String,
        cause: String,
    },

    #[error("transform chain for {module} did not finish within {timeout_ms} ms")]
    Timeout { module: String, timeout_ms: u64 },
}

/// Failure while writing output artifacts.
#[derive(Error, Debug)]
pub enum EmitError {
    #[error("failed to write {path}: {source}")]
    WriteFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("output name collision for '{name}' could not be resolved")]
    NamingCollision { name: String },
}

/// Invalid configuration. Fatal at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid rule #{index}: {reason}")]
    InvalidRule { index: usize, reason: String },

    #[error("invalid asset threshold: {0}")]
    InvalidThreshold(String),

    #[error("config declares no entry points")]
    NoEntries,
}

/// One module-scoped problem collected during a build.
#[derive(Debug)]
pub enum BuildIssue {
    /// An import could not be resolved. `importer` is the module that holds
    /// the failing specifier.
    Resolution {
        importer: String,
        error: ResolutionError,
    },
    /// A module's transform chain failed or timed out.
    Loader(LoaderError),
    /// A module's backing file could not be read.
    Read { path: PathBuf, message: String },
    /// An emitted asset could not be assigned an output name.
    Naming(EmitError),
}

impl std::fmt::Display for BuildIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildIssue::Resolution { importer, error } => {
                write!(f, "{error} (imported by {importer})")
            }
            BuildIssue::Loader(e) => write!(f, "{e}"),
            BuildIssue::Read { path, message } => {
                write!(f, "failed to read {}: {message}", path.display())
            }
            BuildIssue::Naming(e) => write!(f, "{e}"),
        }
    }
}

impl BuildIssue {
    /// Stable machine-readable code for JSON output.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            BuildIssue::Resolution {
                error: ResolutionError::NotFound { .. },
                ..
            } => "RESOLVE_NOT_FOUND",
            BuildIssue::Resolution {
                error: ResolutionError::CaseMismatch { .. },
                ..
            } => "RESOLVE_CASE_MISMATCH",
            BuildIssue::Loader(LoaderError::TransformFailure { .. }) => "LOADER_TRANSFORM_FAILURE",
            BuildIssue::Loader(LoaderError::Timeout { .. }) => "LOADER_TIMEOUT",
            BuildIssue::Read { .. } => "MODULE_READ_ERROR",
            BuildIssue::Naming(_) => "EMIT_NAMING_COLLISION",
        }
    }
}

/// Top-level error for core operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Emit(#[from] EmitError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("build failed with {count} error(s)")]
    BuildFailed { count: usize },
}
