/// Access status definitions for fetched pages
///
/// This module defines the outcome stored with each access record.
use std::fmt;

/// Outcome of a successful fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessStatus {
    /// A scraping rule matched and extraction ran
    Processed,

    /// No scraping rule matched the page; nothing was extracted
    Skipped,

    /// The page was unchanged since the previous session (incremental crawl)
    NotModified,

    /// The page was fetched but its content tree could not be built
    ExtractionFailed,
}

impl AccessStatus {
    /// Returns true if documents may have been written for this access
    pub fn is_extracted(&self) -> bool {
        matches!(self, Self::Processed)
    }

    /// Returns true if the page content was not looked at
    pub fn is_unchanged(&self) -> bool {
        matches!(self, Self::NotModified)
    }

    /// Converts the status to its database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Processed => "processed",
            Self::Skipped => "skipped",
            Self::NotModified => "not_modified",
            Self::ExtractionFailed => "extraction_failed",
        }
    }

    /// Parses a status from its database string representation
    ///
    /// Returns None if the string doesn't match any known status.
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "processed" => Some(Self::Processed),
            "skipped" => Some(Self::Skipped),
            "not_modified" => Some(Self::NotModified),
            "extraction_failed" => Some(Self::ExtractionFailed),
            _ => None,
        }
    }

    /// Returns all possible statuses
    pub fn all() -> [Self; 4] {
        [
            Self::Processed,
            Self::Skipped,
            Self::NotModified,
            Self::ExtractionFailed,
        ]
    }
}

impl fmt::Display for AccessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
