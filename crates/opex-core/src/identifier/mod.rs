//! Initiative identifier allocation and formatting

pub mod allocator;
pub mod formatter;

pub use allocator::SequenceAllocator;
pub use formatter::{format_identifier, is_valid_code, parse_identifier, IdentifierParts};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Composite key of one counting sequence
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CounterKey {
    pub site_code: String,
    /// `None` for the site-wide overall sequence
    pub discipline_code: Option<String>,
    pub year: i32,
}

impl CounterKey {
    /// Key of the discipline-scoped sequence
    pub fn discipline(site_code: impl Into<String>, discipline_code: impl Into<String>, year: i32) -> Self {
        Self {
            site_code: site_code.into(),
            discipline_code: Some(discipline_code.into()),
            year,
        }
    }

    /// Key of the site-wide sequence
    pub fn overall(site_code: impl Into<String>, year: i32) -> Self {
        Self {
            site_code: site_code.into(),
            discipline_code: None,
            year,
        }
    }

    /// File-system safe name; codes are alphanumeric so `_` cannot collide
    pub fn file_stem(&self) -> String {
        match &self.discipline_code {
            Some(discipline) => format!("{}_{}_{}", self.site_code, discipline, self.year),
            None => format!("{}__{}", self.site_code, self.year),
        }
    }
}

impl fmt::Display for CounterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.discipline_code {
            Some(discipline) => write!(f, "{}/{}/{}", self.site_code, discipline, self.year),
            None => write!(f, "{}/*/{}", self.site_code, self.year),
        }
    }
}
