//! The plan singleton: metadata and the current date.

use crate::dates::Date;
use chrono::Utc;

/// Top-level metadata of the model. A single instance lives on the
/// [`crate::Model`]; the current date drives before-current and
/// before-fence detection.
#[derive(Debug, Clone)]
pub struct Plan {
    pub name: String,
    pub description: String,
    pub(crate) current: Date,
}

impl Plan {
    pub(crate) fn new() -> Self {
        Plan {
            name: String::new(),
            description: String::new(),
            current: Utc::now(),
        }
    }

    /// The current date of the plan.
    pub fn current(&self) -> Date {
        self.current
    }
}
