//! Error types for the template service.
//!
//! Two layers are exposed:
//!
//! - [`RenderError`]: anything that goes wrong while locating or executing a
//!   template. It always carries the underlying cause.
//! - [`Error`]: the crate-level error returned by [`TemplateService`](crate::TemplateService)
//!   operations. It adds configuration build failures, hashing failures and
//!   service configuration problems on top of [`RenderError`].
//!
//! Neither type is retried internally. A failed render never yields partial
//! output.

use std::io;
use std::path::PathBuf;

use crate::hash::HashingUnavailable;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Crate-level error for template service operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The root path of a configuration could not be used as a template source.
    ///
    /// Nothing is cached when this happens; the next request for the same root
    /// attempts the build again.
    #[error("cannot build template configuration for `{path}`: {source}")]
    ConfigurationBuild {
        /// The root path that was requested.
        path: String,
        /// The I/O failure that prevented rooting the source.
        #[source]
        source: io::Error,
    },

    /// No digest is available to key anonymous templates.
    #[error(transparent)]
    HashingUnavailable(#[from] HashingUnavailable),

    /// Locating or executing a template failed.
    #[error(transparent)]
    Render(#[from] RenderError),

    /// An operation needed the default root but `init` was never called.
    #[error("template service has no default root; call `init` first")]
    NotInitialized,

    /// The service configuration document could not be parsed.
    #[error("invalid template service configuration: {0}")]
    Config(#[from] serde_yaml::Error),

    /// The service configuration file could not be read.
    #[error("cannot read template service configuration `{}`: {source}", path.display())]
    ConfigRead {
        /// Path of the configuration file.
        path: PathBuf,
        /// The underlying read failure.
        #[source]
        source: io::Error,
    },
}

impl Error {
    /// Create a configuration build error for `path`.
    pub fn configuration_build(path: impl Into<String>, source: io::Error) -> Self {
        Self::ConfigurationBuild {
            path: path.into(),
            source,
        }
    }

    /// Returns the wrapped render error, if this is one.
    pub fn as_render(&self) -> Option<&RenderError> {
        match self {
            Error::Render(err) => Some(err),
            _ => None,
        }
    }
}

/// Error raised while locating or executing a template.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    /// The requested template (or one of the configuration's auto-includes)
    /// does not exist in any source.
    #[error("template not found: {name}")]
    TemplateNotFound {
        /// Name that was looked up.
        name: String,
    },

    /// The engine failed to compile or execute the template.
    ///
    /// This includes templates pulled in transitively through `include`,
    /// `import` or `extends` that could not be found.
    #[error("template `{name}` failed: {source}")]
    Engine {
        /// The entry template being rendered.
        name: String,
        /// The engine error.
        #[source]
        source: minijinja::Error,
    },

    /// A template source could not be read.
    #[error("failed to read template `{name}`: {source}")]
    Source {
        /// Name that was being read.
        name: String,
        /// The I/O failure.
        #[source]
        source: io::Error,
    },

    /// The data model could not be serialized.
    #[error("template model could not be serialized: {0}")]
    Model(#[from] serde_json::Error),

    /// The data model serialized to something other than a map.
    #[error("template model must serialize to a map, got {kind}")]
    InvalidModel {
        /// Kind of JSON value the model produced.
        kind: &'static str,
    },
}

impl RenderError {
    pub(crate) fn not_found(name: impl Into<String>) -> Self {
        Self::TemplateNotFound { name: name.into() }
    }

    pub(crate) fn engine(name: impl Into<String>, source: minijinja::Error) -> Self {
        Self::Engine {
            name: name.into(),
            source,
        }
    }

    pub(crate) fn read_failure(name: impl Into<String>, source: io::Error) -> Self {
        Self::Source {
            name: name.into(),
            source,
        }
    }

    /// Returns true if the failure was a missing template, either the entry
    /// template itself or one it references.
    pub fn is_not_found(&self) -> bool {
        match self {
            RenderError::TemplateNotFound { .. } => true,
            RenderError::Engine { source, .. } => {
                source.kind() == minijinja::ErrorKind::TemplateNotFound
            }
            _ => false,
        }
    }

    /// Returns true if the engine rejected the template syntax or failed
    /// while evaluating it.
    pub fn is_template_error(&self) -> bool {
        use minijinja::ErrorKind;

        match self {
            RenderError::Engine { source, .. } => matches!(
                source.kind(),
                ErrorKind::SyntaxError
                    | ErrorKind::BadEscape
                    | ErrorKind::UndefinedError
                    | ErrorKind::UnknownTest
                    | ErrorKind::UnknownFunction
                    | ErrorKind::UnknownFilter
                    | ErrorKind::UnknownMethod
                    | ErrorKind::InvalidOperation
            ),
            _ => false,
        }
    }
}
