//! Typed failures raised by the pipeline.
//!
//! Library functions return `anyhow::Result`; the variants here are the
//! failures callers need to tell apart. They travel inside `anyhow::Error`
//! and are recovered with [`PipelineError::find`].

use std::path::PathBuf;
use thiserror::Error;

/// Broad class of a failure, used for reporting and exit handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad switch value or combination. Nothing on disk was touched.
    Validation,
    /// Loop device, mount or partition table trouble.
    Resource,
    /// An external tool exited non-zero.
    Collaborator,
    /// A referenced input does not exist.
    NotFound,
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Unrecognized value(s) for --{option}: {}", tokens.join(", "))]
    UnrecognizedOptions { option: String, tokens: Vec<String> },

    #[error("Conflicting switches: --{first} and --{second}")]
    ConflictingSwitches { first: String, second: String },

    #[error("--{option} must be numeric, got '{value}'")]
    NotNumeric { option: String, value: String },

    #[error("--{given} requires --{missing}")]
    MissingPairedOption { given: String, missing: String },

    #[error("Invalid value for {option}: {message}")]
    InvalidValue { option: String, message: String },

    #[error("{0} must be run as root")]
    NotRoot(String),

    #[error("Mount point {} is already in use", path.display())]
    DeviceBusy { path: PathBuf },

    #[error("Cannot attach {}: {message}", image.display())]
    AttachFailed { image: PathBuf, message: String },

    #[error("Cannot mount {device} on {}: {message}", target.display())]
    MountFailed {
        device: String,
        target: PathBuf,
        message: String,
    },

    #[error("{} is not a file-backed image", path.display())]
    NotFileBacked { path: PathBuf },

    #[error("Partition tool error: {0}")]
    PartitionTool(String),

    #[error("Image {} is in use by another sdmaker run", path.display())]
    ImageLocked { path: PathBuf },

    #[error("Command '{command}' failed with status {status}")]
    CommandFailed { command: String, status: i32 },

    #[error("{what} not found: {}", path.display())]
    NotFound { what: String, path: PathBuf },
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnrecognizedOptions { .. }
            | Self::ConflictingSwitches { .. }
            | Self::NotNumeric { .. }
            | Self::MissingPairedOption { .. }
            | Self::InvalidValue { .. }
            | Self::NotRoot(_) => ErrorKind::Validation,
            Self::DeviceBusy { .. }
            | Self::AttachFailed { .. }
            | Self::MountFailed { .. }
            | Self::NotFileBacked { .. }
            | Self::PartitionTool(_)
            | Self::ImageLocked { .. } => ErrorKind::Resource,
            Self::CommandFailed { .. } => ErrorKind::Collaborator,
            Self::NotFound { .. } => ErrorKind::NotFound,
        }
    }

    /// Find the first typed pipeline failure in an error chain.
    pub fn find(err: &anyhow::Error) -> Option<&PipelineError> {
        err.chain().find_map(|cause| cause.downcast_ref::<PipelineError>())
    }

    pub fn not_found(what: &str, path: impl Into<PathBuf>) -> Self {
        Self::NotFound {
            what: what.to_string(),
            path: path.into(),
        }
    }

    pub fn invalid(option: &str, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            option: option.to_string(),
            message: message.into(),
        }
    }
}
