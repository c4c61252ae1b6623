//! Error types for routing, rendering and serving.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Template file and, when known, the line an error was raised on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub path: String,
    pub line: Option<usize>,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, " at {}:{}", self.path, line),
            None => write!(f, " in {}", self.path),
        }
    }
}

/// Errors raised while building routes, running actions or rendering views.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Template '{name}' not found in {}", .dir.display())]
    TemplateNotFound { name: String, dir: PathBuf },

    /// Syntax or evaluation error, with the template it came from once known.
    #[error("{message}{}", .location.as_ref().map(ToString::to_string).unwrap_or_default())]
    Template {
        message: String,
        location: Option<Location>,
    },

    #[error("Unknown controller '{0}'")]
    UnknownController(String),

    #[error("Controller '{controller}' has no action '{action}'")]
    UnknownAction { controller: String, action: String },

    #[error("Invalid route for {controller}#{action}: {message}")]
    InvalidRoute {
        controller: String,
        action: String,
        message: String,
    },

    #[error("Duplicate controller '{0}'")]
    DuplicateController(String),

    #[error("Action failed: {0}")]
    Action(String),

    #[error("Failed to read '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid settings in '{}': {message}", .path.display())]
    Settings { path: PathBuf, message: String },

    #[error("Server error: {0}")]
    Server(String),
}

impl Error {
    pub fn template(message: impl Into<String>) -> Self {
        Self::Template {
            message: message.into(),
            location: None,
        }
    }

    /// Convenience for controller code that wants to fail a request.
    pub fn action(message: impl Into<String>) -> Self {
        Self::Action(message.into())
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn invalid_route(
        controller: impl Into<String>,
        action: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidRoute {
            controller: controller.into(),
            action: action.into(),
            message: message.into(),
        }
    }

    /// Attach a template location to a syntax/evaluation error that does not
    /// have one yet. Other variants pass through untouched.
    pub fn at(self, path: &str, line: Option<usize>) -> Self {
        match self {
            Self::Template {
                message,
                location: None,
            } => Self::Template {
                message,
                location: Some(Location {
                    path: path.to_string(),
                    line,
                }),
            },
            other => other,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
