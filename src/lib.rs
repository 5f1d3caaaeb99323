//! dmarcview Library
//!
//! This library parses DMARC aggregate reports into an immutable [`Feedback`] tree.
//! It provides the data model, the XML parser and writer, a loader for XML, GZIP and
//! ZIP report files, configuration, and error handling.

pub mod config;
pub mod error;
pub mod loader;
pub mod models;
pub mod xml_parser;
pub mod xml_writer;

pub use config::Config;
pub use error::{DmarcError, ErrorKind};
pub use loader::{extract_reports, load_feedback};
pub use models::Feedback;
pub use xml_parser::{parse_feedback, read_feedback};
