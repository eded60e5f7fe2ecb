//! Core subject classification of upstream class names.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Year code the upstream API uses for students who are not enrolled.
pub const NOT_ENROLLED_YEAR_CODE: &str = "40";

/// One of the four core learning areas a classroom can belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LearningAreaKind {
    Mathematics,
    English,
    Science,
    Technology,
}

impl LearningAreaKind {
    /// Name as stored in the LearningArea lookup table.
    pub fn area_name(&self) -> &'static str {
        match self {
            LearningAreaKind::Mathematics => "Mathematics",
            LearningAreaKind::English => "English",
            LearningAreaKind::Science => "Science",
            LearningAreaKind::Technology => "Technology",
        }
    }

    /// Classifies a class name by case-insensitive substring.
    ///
    /// Rules are checked in order, so "Maths and Science" is Mathematics.
    ///
    /// # Examples
    ///
    /// ```
    /// use roster_core::subject::LearningAreaKind;
    ///
    /// assert_eq!(
    ///     LearningAreaKind::classify("IT Applications 9"),
    ///     Some(LearningAreaKind::Technology)
    /// );
    /// assert_eq!(LearningAreaKind::classify("Homeroom 3"), None);
    /// ```
    pub fn classify(class_name: &str) -> Option<Self> {
        let upper = class_name.to_uppercase();
        if upper.contains("MATH") {
            Some(LearningAreaKind::Mathematics)
        } else if upper.contains("ENGL") {
            Some(LearningAreaKind::English)
        } else if upper.contains("SCI") {
            Some(LearningAreaKind::Science)
        } else if upper.contains("TECHN") || upper.contains("IT APP") {
            Some(LearningAreaKind::Technology)
        } else {
            None
        }
    }
}

impl fmt::Display for LearningAreaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.area_name())
    }
}

/// Returns true if a student with this year code is synced at all.
pub fn is_enrolled_year(year_code: &str) -> bool {
    year_code != NOT_ENROLLED_YEAR_CODE
}

/// Numeric sort key for a year code; non-numeric codes sort last.
pub fn year_sort_key(year_code: &str) -> i64 {
    year_code.trim().parse::<i64>().unwrap_or(i64::MAX)
}
