//! Error types for the slide watermark library

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the slide watermark library
///
/// Every variant is fatal to the current invocation. Missing glyph coverage
/// is not represented here: it only degrades the rendered text.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid watermark options or page geometry
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// An explicitly requested font could not be used
    #[error("Failed to load font {}: {reason}", .path.display())]
    FontLoad { path: PathBuf, reason: String },

    /// The external document converter failed or produced nothing
    #[error("Document conversion failed: {0}")]
    Conversion(String),

    /// Input PDF missing, unreadable, corrupt or without pages
    #[error("Invalid input: {0}")]
    Input(String),

    /// Layer rendering or page merge failure
    #[error("Render error: {0}")]
    Render(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    pub(crate) fn render(msg: impl Into<String>) -> Self {
        Error::Render(msg.into())
    }
}
