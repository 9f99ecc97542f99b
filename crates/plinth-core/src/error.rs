//! Error types for plinth-core

use thiserror::Error;

/// Result type alias using plinth-core's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed underlying cause carried by script failures
pub type BoxedCause = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Core error types for plinth
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Invalid configuration format
    #[error("Invalid configuration format: {message}")]
    InvalidConfig { message: String },

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    YamlParse(#[from] serde_yaml_ng::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed or duplicate-keyed version file
    #[error("Invalid version manifest for {extension}: {detail}")]
    InvalidManifest { extension: String, detail: String },

    /// A script's up or down unit failed
    #[error("Migration script {script} ({direction}) failed for {extension} at version {version}: {source}")]
    ScriptExecution {
        extension: String,
        version: String,
        script: String,
        direction: &'static str,
        #[source]
        source: BoxedCause,
    },

    /// Dependency ordering made no progress
    #[error("Circular dependency detected after {bound} passes, unresolved: {unresolved}")]
    CircularDependency { bound: usize, unresolved: String },

    /// Identifier does not resolve to a known extension
    #[error("Unknown extension: {identifier}")]
    UnknownExtension { identifier: String },

    /// Transport or response-shape failure from the catalog
    #[error("Remote catalog error: {message}")]
    RemoteCatalog { message: String },

    /// Rollback target is not present in history
    #[error("Version {version} not found in history of {extension}")]
    TargetVersionNotFound { extension: String, version: String },

    /// Archive could not be extracted or packed
    #[error("Unable to {action} archive {archive}")]
    Archive { archive: String, action: &'static str },

    /// Downloaded file failed its integrity check
    #[error("Downloaded file is corrupt: {file}")]
    CorruptDownload { file: String },

    /// Operation not offered by this extension kind
    #[error("{kind} extensions do not support {operation}")]
    UnsupportedOperation {
        kind: &'static str,
        operation: &'static str,
    },

    /// Operation refused in the current state
    #[error("{message}")]
    InvalidOperation { message: String },

    /// Persistent storage could not be read or written
    #[error("Storage error: {message}")]
    Storage { message: String },
}

impl Error {
    /// Create a config not found error
    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::ConfigNotFound { path: path.into() }
    }

    /// Create an invalid config error
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Create an invalid manifest error
    pub fn invalid_manifest(extension: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::InvalidManifest {
            extension: extension.into(),
            detail: detail.into(),
        }
    }

    /// Create a script execution error from any underlying cause
    pub fn script_execution(
        extension: impl Into<String>,
        version: impl Into<String>,
        script: impl Into<String>,
        direction: &'static str,
        source: impl Into<BoxedCause>,
    ) -> Self {
        Self::ScriptExecution {
            extension: extension.into(),
            version: version.into(),
            script: script.into(),
            direction,
            source: source.into(),
        }
    }

    /// Create a circular dependency error
    pub fn circular_dependency(bound: usize, unresolved: &[String]) -> Self {
        Self::CircularDependency {
            bound,
            unresolved: unresolved.join(", "),
        }
    }

    /// Create an unknown extension error
    pub fn unknown_extension(identifier: impl Into<String>) -> Self {
        Self::UnknownExtension {
            identifier: identifier.into(),
        }
    }

    /// Create a remote catalog error
    pub fn remote_catalog(message: impl Into<String>) -> Self {
        Self::RemoteCatalog {
            message: message.into(),
        }
    }

    /// Create a target version not found error
    pub fn target_version_not_found(
        extension: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self::TargetVersionNotFound {
            extension: extension.into(),
            version: version.into(),
        }
    }

    /// Create an extract failure naming the archive
    pub fn extract_failed(archive: impl Into<String>) -> Self {
        Self::Archive {
            archive: archive.into(),
            action: "extract",
        }
    }

    /// Create a pack failure naming the archive
    pub fn pack_failed(archive: impl Into<String>) -> Self {
        Self::Archive {
            archive: archive.into(),
            action: "pack",
        }
    }

    /// Create a corrupt download error
    pub fn corrupt_download(file: impl Into<String>) -> Self {
        Self::CorruptDownload { file: file.into() }
    }

    /// Create an unsupported operation error
    pub fn unsupported(kind: &'static str, operation: &'static str) -> Self {
        Self::UnsupportedOperation { kind, operation }
    }

    /// Create an invalid operation error
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Whether this error came from the remote catalog
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::RemoteCatalog { .. } | Self::CorruptDownload { .. })
    }
}
