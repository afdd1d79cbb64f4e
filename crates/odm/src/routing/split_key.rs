//! Split keys.

use std::fmt;

use chrono::Datelike;

/// A runtime value selecting one physical collection of a split entity.
///
/// # Examples
///
/// ```
/// use chrono::NaiveDate;
/// use helios_odm::routing::SplitKey;
///
/// let date = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
/// assert_eq!(SplitKey::quarter(&date).as_str(), "2024Q1");
/// assert_eq!(SplitKey::month(&date).as_str(), "2024_02");
///
/// assert_eq!(SplitKey::new("us/east 1").normalized(), "us_east_1");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SplitKey(String);

impl SplitKey {
    /// Wraps a raw key.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Builds a calendar-quarter bucket such as `2024Q1`.
    pub fn quarter(date: &impl Datelike) -> Self {
        Self(format!("{}Q{}", date.year(), date.month0() / 3 + 1))
    }

    /// Builds a calendar-month bucket such as `2024_03`.
    pub fn month(date: &impl Datelike) -> Self {
        Self(format!("{}_{:02}", date.year(), date.month()))
    }

    /// Returns the raw key.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the form used as a collection suffix.
    ///
    /// Surrounding whitespace is trimmed, path separators, dots and inner
    /// whitespace become `_`, and any other character outside
    /// `[A-Za-z0-9_-]` is dropped. Case is preserved.
    pub fn normalized(&self) -> String {
        normalize(&self.0)
    }
}

pub(crate) fn normalize(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | '.' => '_',
            c if c.is_whitespace() => '_',
            c => c,
        })
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

impl fmt::Display for SplitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SplitKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SplitKey {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for SplitKey {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, TimeZone, Utc};

    use super::*;

    #[test]
    fn test_quarter_boundaries() {
        let q = |m| SplitKey::quarter(&NaiveDate::from_ymd_opt(2023, m, 1).unwrap());
        assert_eq!(q(1).as_str(), "2023Q1");
        assert_eq!(q(3).as_str(), "2023Q1");
        assert_eq!(q(4).as_str(), "2023Q2");
        assert_eq!(q(12).as_str(), "2023Q4");
    }

    #[test]
    fn test_month_from_datetime() {
        let at = Utc.with_ymd_and_hms(2024, 11, 5, 8, 0, 0).unwrap();
        assert_eq!(SplitKey::month(&at).to_string(), "2024_11");
    }

    #[test]
    fn test_normalization() {
        assert_eq!(normalize("  east "), "east");
        assert_eq!(normalize("eu.west/2"), "eu_west_2");
        assert_eq!(normalize("tenant-A"), "tenant-A");
        assert_eq!(normalize("a$b%c"), "abc");
        assert_eq!(normalize("$$"), "");
    }
}
