//! Error type definitions for the proxy application
//!
//! This module defines all error types used throughout the application,
//! providing a hierarchical error system that makes debugging and error
//! handling more straightforward.

use thiserror::Error;

/// Top-level application error type
///
/// This enum represents all possible errors that can occur in the
/// application. It uses `thiserror` to provide automatic error trait
/// implementations and proper error chaining.
#[derive(Error, Debug)]
pub enum AppError {
    /// Bad configuration document (unparsable YAML, bad regex, etc).
    #[error("configuration error: {message}")]
    Config { message: String },

    /// A rule lists a `dependsOn` target that isn't a sibling data source.
    #[error("missing dependency: {0}")]
    MissingDependency(String),

    /// A rule's data sources form a dependency cycle.
    #[error("circular dependency: {0}")]
    CircularDependency(String),

    /// Raised by a data source's `Setup`/`GetData`/`GetTemplateData`.
    #[error("data source error: {0}")]
    DataSource(String),

    /// A header template failed to compile or render.
    #[error("template error: {0}")]
    Template(String),

    /// The upstream transport failed, or replied with a 5xx status.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// `proxy.mode` in the config names a mode this binary doesn't implement.
    #[error("unknown proxy mode '{0}'")]
    UnknownMode(String),

    /// Resolution was abandoned because the client disconnected.
    #[error("request cancelled")]
    Cancelled,

    #[error("invalid regular expression: {0}")]
    Regex(#[from] regex::Error),

    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn data_source<S: Into<String>>(message: S) -> Self {
        Self::DataSource(message.into())
    }

    pub fn template<S: Into<String>>(message: S) -> Self {
        Self::Template(message.into())
    }

    /// The HTTP status code a client should see for this error, per the
    /// error-handling table: data-source and template failures are 500s,
    /// upstream failures are 504s. Errors that only ever occur at startup
    /// (config, dependency validation, unknown mode) have no client-facing
    /// status; they abort the process before any request is served.
    pub fn http_status(&self) -> u16 {
        match self {
            AppError::DataSource(_) | AppError::Template(_) => 500,
            AppError::Upstream(_) => 504,
            AppError::Http(_) => 504,
            _ => 500,
        }
    }
}
