//! Log line grammars and format detection

pub mod apache;

pub use apache::ApacheLogParser;

use crate::models::{AccessRecord, ErrorRecord};
use thiserror::Error;

/// Errors that can occur while reading a log file
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Records recovered from one log file
#[derive(Debug, Clone, Default)]
pub struct ParsedBatch {
    pub access: Vec<AccessRecord>,
    pub errors: Vec<ErrorRecord>,
    /// Non-blank lines no grammar accepted
    pub skipped: usize,
}

impl ParsedBatch {
    pub fn is_empty(&self) -> bool {
        self.access.is_empty() && self.errors.is_empty()
    }
}
