//! Error Handling Module
//!
//! This module defines custom error types for dmarcview using the `thiserror` crate.
//! Every error falls into one of two kinds: the report bytes could not be obtained
//! (`ErrorKind::Io`) or they could not be turned into a report (`ErrorKind::Parse`).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DmarcError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("Malformed integer in <{field}>: {value:?}")]
    MalformedInteger { field: &'static str, value: String },

    #[error("Invalid format: {0}")]
    Format(String),

    #[error("File too large: {0}")]
    FileTooLarge(String),

    #[error("Unsupported file type: {0}")]
    UnsupportedFile(String),
}

/// Coarse classification of a [`DmarcError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The source bytes could not be read.
    Io,
    /// The bytes are not a well-formed report.
    Parse,
}

impl DmarcError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DmarcError::Io(_)
            | DmarcError::Zip(_)
            | DmarcError::FileTooLarge(_)
            | DmarcError::UnsupportedFile(_) => ErrorKind::Io,
            DmarcError::Xml(_) | DmarcError::MalformedInteger { .. } | DmarcError::Format(_) => {
                ErrorKind::Parse
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, DmarcError>;
