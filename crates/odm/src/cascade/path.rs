//! Fetch paths.

use std::convert::Infallible;
use std::str::FromStr;

/// A tree of reference fields to resolve during a cascade fetch.
///
/// Parsed from comma-separated, dot-delimited paths. `"x.target,y.target"`
/// resolves `x` and `y` on the root, then `target` on each of them.
/// Shared prefixes are merged and empty segments are skipped.
///
/// # Example
///
/// ```
/// use helios_odm::cascade::FetchPath;
///
/// let path = FetchPath::parse("x.target, y.target, x.owner");
/// let x = path.child("x").unwrap();
/// assert!(x.child("target").is_some());
/// assert!(x.child("owner").is_some());
/// assert_eq!(path.children().count(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchPath {
    children: Vec<(String, FetchPath)>,
}

pub(crate) static EMPTY_PATH: FetchPath = FetchPath::empty();

impl FetchPath {
    /// A path that names no fields. Eager fields are still resolved.
    pub const fn empty() -> Self {
        Self {
            children: Vec::new(),
        }
    }

    /// Parses a comma-separated list of dotted paths.
    pub fn parse(paths: &str) -> Self {
        paths.split(',')
            .fold(Self::empty(), |path, dotted| path.field(dotted))
    }

    /// Adds one dotted path.
    pub fn field(mut self, dotted: &str) -> Self {
        let mut node = &mut self;
        for segment in dotted.split('.').map(str::trim).filter(|s| !s.is_empty()) {
            let index = match node.children.iter().position(|(name, _)| name == segment) {
                Some(index) => index,
                None => {
                    node.children.push((segment.to_string(), Self::empty()));
                    node.children.len() - 1
                }
            };
            node = &mut node.children[index].1;
        }
        self
    }

    /// Returns the sub-path below a field.
    pub fn child(&self, field: &str) -> Option<&FetchPath> {
        self.children
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, path)| path)
    }

    /// Iterates over the named fields and their sub-paths.
    pub fn children(&self) -> impl Iterator<Item = (&str, &FetchPath)> {
        self.children.iter().map(|(name, path)| (name.as_str(), path))
    }

    /// Returns `true` if no fields are named.
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

impl FromStr for FetchPath {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl From<&str> for FetchPath {
    fn from(paths: &str) -> Self {
        Self::parse(paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_segments_skipped() {
        assert!(FetchPath::parse("").is_empty());
        assert!(FetchPath::parse(" , .").is_empty());
        let path = FetchPath::parse("a..b,");
        assert!(path.child("a").unwrap().child("b").is_some());
    }

    #[test]
    fn test_shared_prefix_merged_in_order() {
        let path: FetchPath = "b.x,a,b.y".parse().unwrap();
        let names: Vec<_> = path.children().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["b", "a"]);
        let b: Vec<_> = path.child("b").unwrap().children().map(|(n, _)| n).collect();
        assert_eq!(b, vec!["x", "y"]);
    }
}
