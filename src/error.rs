//! Domain-specific error types for hostprep.
//!
//! This module defines `ProvisionError`, a `thiserror`-based enum with one
//! variant per failure kind the orchestrator distinguishes. Typed APIs
//! (configuration resolution, fact gathering, document parsing) return
//! `Result<T, ProvisionError>`, while step and executor trait boundaries use
//! `anyhow::Result`.
//!
//! `ProvisionError` implements `Into<anyhow::Error>`, so the `?` operator
//! converts it automatically at those boundaries. The orchestrator downcasts
//! back to `ProvisionError` to decide whether a failure is fatal.

use std::io;

/// Formats an IO error kind into a human-readable message.
///
/// Provides consistent messages for common IO error kinds (e.g.,
/// "I/O error: not found") instead of the OS-level messages (e.g.,
/// "No such file or directory (os error 2)"). Unrecognized kinds fall back
/// to the OS-level message.
pub(crate) fn io_error_kind_message(err: &io::Error) -> String {
    match err.kind() {
        io::ErrorKind::NotFound => "I/O error: not found".to_string(),
        io::ErrorKind::PermissionDenied => "I/O error: permission denied".to_string(),
        io::ErrorKind::IsADirectory => "I/O error: is a directory".to_string(),
        _ => format!("I/O error: {}", err),
    }
}

/// Domain-specific error type for hostprep.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ProvisionError {
    /// A required setting is missing or a setting has an invalid value.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Nobody could be identified as the owner of the installed keys.
    #[error("ambiguous target user: {0}")]
    AmbiguousTargetUser(String),

    /// The resolved user has no usable home directory on the host.
    #[error("cannot resolve user '{user}': {reason}")]
    UserResolution {
        /// The username that was looked up.
        user: String,
        /// Why the lookup failed.
        reason: String,
    },

    /// No authorized-keys source was configured and none was discovered.
    #[error(
        "no authorized-keys source: set AUTHORIZED_KEYS_URL or GITHUB_KEYS_USER, \
        or provide an existing authorized_keys file"
    )]
    NoKeySource,

    /// Key material was obtained but contains no recognized public key.
    #[error("invalid key data from {source_name}: no line starts with a recognized key type")]
    InvalidKeyData {
        /// Human-readable description of where the keys came from.
        source_name: String,
    },

    /// An external command exited unsuccessfully.
    #[error("command execution failed: {command}: {status}")]
    ExternalTool {
        /// The command that was executed (sensitive arguments redacted).
        command: String,
        /// Exit status or other reason for the failure.
        status: String,
    },

    /// A service that is not required to complete provisioning failed.
    #[error("non-critical service '{service}' failed: {message}")]
    NonCriticalService {
        /// The service that could not be enabled.
        service: String,
        /// Underlying cause.
        message: String,
    },

    /// A file on the host did not have the expected structure.
    #[error("malformed {document}: {message}")]
    Document {
        /// Which document failed to parse (e.g. "/etc/passwd").
        document: String,
        /// What was wrong.
        message: String,
    },

    /// An I/O operation failed with contextual information.
    #[error("{context}: {message}")]
    Io {
        /// What was being done when the error occurred, usually including a path.
        context: String,
        /// Human-readable description derived from [`io_error_kind_message`].
        message: String,
        /// The underlying I/O error, preserved for programmatic inspection.
        #[source]
        source: std::io::Error,
    },
}

impl ProvisionError {
    /// Creates an `Io` variant with the `message` field derived from `source`.
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            message: io_error_kind_message(&source),
            source,
        }
    }

    /// Returns true if this error must halt the provisioning run.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::NonCriticalService { .. })
    }
}
