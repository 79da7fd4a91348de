//! Error types for infra-verify

use crate::verify::StatusMismatch;
use thiserror::Error;

/// Errors that can occur while provisioning or verifying a scenario
#[derive(Error, Debug)]
pub enum HarnessError {
    /// Secret could not be fetched from the parameter store
    #[error("failed to resolve parameter {parameter}: {message}")]
    Resolution { parameter: String, message: String },

    /// Terraform init/apply/destroy failed
    #[error("terraform {action} failed: {message}")]
    Provisioning { action: String, message: String },

    /// Requested output was not produced by the apply
    #[error("terraform output not found: {0}")]
    OutputMissing(String),

    /// Cloud describe call failed
    #[error("describe {resource} failed: {message}")]
    Describe { resource: String, message: String },

    /// Described resource does not exist or has no members
    #[error("not found: {0}")]
    NotFound(String),

    /// Structured output could not be decoded
    #[error("failed to decode {what}: {source}")]
    Decode {
        what: String,
        #[source]
        source: serde_json::Error,
    },

    /// A value that must be non-empty was empty
    #[error("empty result: {0}")]
    EmptyResult(String),

    /// One or more resources reported an unexpected status
    #[error("{} status mismatch(es): {}", .0.len(), render_mismatches(.0))]
    AssertionMismatch(Vec<StatusMismatch>),

    /// Invalid harness configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn render_mismatches(mismatches: &[StatusMismatch]) -> String {
    mismatches
        .iter()
        .map(|m| m.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl HarnessError {
    pub(crate) fn provisioning(action: &str, message: impl Into<String>) -> Self {
        HarnessError::Provisioning {
            action: action.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn describe(resource: impl Into<String>, message: impl Into<String>) -> Self {
        HarnessError::Describe {
            resource: resource.into(),
            message: message.into(),
        }
    }
}

/// Result type for harness operations.
pub type Result<T> = std::result::Result<T, HarnessError>;
