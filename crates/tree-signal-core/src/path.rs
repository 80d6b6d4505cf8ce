//! Channel paths for addressing nodes in the channel tree
//!
//! Provides [`ChannelPath`], the dot-separated hierarchical address that every
//! message carries (`app.api.auth`).

use crate::error::PathError;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// Separator between channel segments
pub const SEPARATOR: char = '.';

/// Hierarchical channel address
///
/// # Examples
/// - `["app", "api", "auth"]` → `app.api.auth`
/// - `[]` → the synthetic root
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct ChannelPath(Vec<String>);

impl ChannelPath {
    /// Empty path (root)
    #[inline]
    #[must_use]
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Parse and validate a dotted channel string
    ///
    /// # Errors
    /// - [`PathError::Empty`] when no segment remains (`""`, `"."`)
    /// - [`PathError::EmptySegment`] for `a..b`
    /// - [`PathError::InvalidSegment`] for characters outside `[A-Za-z0-9_-]`
    /// - [`PathError::TooDeep`] when the depth exceeds `max_depth`
    pub fn parse(s: &str, max_depth: usize) -> Result<Self, PathError> {
        let path: Self = s.parse()?;
        if path.len() > max_depth {
            return Err(PathError::TooDeep {
                depth: path.len(),
                max: max_depth,
            });
        }
        Ok(path)
    }

    /// Get path segments
    #[inline]
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Get number of segments
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if path is empty (root)
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Get parent path (if not root)
    #[inline]
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.0.is_empty() {
            None
        } else {
            Some(Self(self.0[..self.0.len() - 1].to_vec()))
        }
    }

    /// Get last segment (if not root)
    #[inline]
    #[must_use]
    pub fn last(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    /// Append a segment, returning new path
    ///
    /// # Errors
    /// [`PathError::EmptySegment`] or [`PathError::InvalidSegment`]
    pub fn child(&self, segment: impl Into<String>) -> Result<Self, PathError> {
        let segment = segment.into();
        validate_segment(&segment)?;
        let mut new = self.clone();
        new.0.push(segment);
        Ok(new)
    }

    /// Check if this path is a prefix of another
    #[inline]
    #[must_use]
    pub fn is_prefix_of(&self, other: &Self) -> bool {
        self.0.len() <= other.0.len() && self.0 == other.0[..self.0.len()]
    }

    /// Strict prefix
    #[inline]
    #[must_use]
    pub fn is_ancestor_of(&self, other: &Self) -> bool {
        self.0.len() < other.0.len() && self.is_prefix_of(other)
    }

    /// Every proper ancestor, shortest first, root excluded
    pub fn ancestors(&self) -> impl Iterator<Item = Self> + '_ {
        (1..self.0.len()).map(move |n| Self(self.0[..n].to_vec()))
    }

    /// Iterator over segments from root to leaf
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

fn valid_segment_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// Check one segment against the allowed alphabet
///
/// # Errors
/// [`PathError::EmptySegment`] or [`PathError::InvalidSegment`]
pub fn validate_segment(segment: &str) -> Result<(), PathError> {
    if segment.is_empty() {
        Err(PathError::EmptySegment)
    } else if !segment.chars().all(valid_segment_char) {
        Err(PathError::InvalidSegment(segment.to_string()))
    } else {
        Ok(())
    }
}

impl Display for ChannelPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

impl FromStr for ChannelPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.split(SEPARATOR).all(str::is_empty) {
            return Err(PathError::Empty);
        }

        let segments: Vec<String> = trimmed
            .split(SEPARATOR)
            .map(|seg| validate_segment(seg).map(|()| seg.to_string()))
            .collect::<Result<_, _>>()?;

        Ok(Self(segments))
    }
}

/// Segments are validated; an empty list is the root
impl TryFrom<Vec<String>> for ChannelPath {
    type Error = PathError;

    fn try_from(segments: Vec<String>) -> Result<Self, Self::Error> {
        for segment in &segments {
            validate_segment(segment)?;
        }
        Ok(Self(segments))
    }
}

impl From<ChannelPath> for Vec<String> {
    fn from(path: ChannelPath) -> Self {
        path.0
    }
}

impl Default for ChannelPath {
    fn default() -> Self {
        Self::root()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_valid() {
        let path: ChannelPath = "app.api.auth".parse().unwrap();
        assert_eq!(path.segments(), &["app", "api", "auth"]);
        assert_eq!(path.to_string(), "app.api.auth");
    }

    #[test]
    fn parse_allows_dash_and_underscore() {
        let path: ChannelPath = "build-42.step_1".parse().unwrap();
        assert_eq!(path.len(), 2);
    }

    #[test]
    fn parse_rejects_empty() {
        assert_eq!("".parse::<ChannelPath>(), Err(PathError::Empty));
        assert_eq!(".".parse::<ChannelPath>(), Err(PathError::Empty));
        assert_eq!("  ".parse::<ChannelPath>(), Err(PathError::Empty));
    }

    #[test]
    fn parse_rejects_empty_segment() {
        assert_eq!("a..b".parse::<ChannelPath>(), Err(PathError::EmptySegment));
        assert_eq!("a.".parse::<ChannelPath>(), Err(PathError::EmptySegment));
    }

    #[test]
    fn parse_rejects_bad_chars() {
        let result = "a.b c".parse::<ChannelPath>();
        assert!(matches!(result, Err(PathError::InvalidSegment(seg)) if seg == "b c"));
        assert!("a/b".parse::<ChannelPath>().is_err());
    }

    #[test]
    fn parse_enforces_depth() {
        assert!(ChannelPath::parse("a.b.c", 3).is_ok());
        assert_eq!(
            ChannelPath::parse("a.b.c.d", 3),
            Err(PathError::TooDeep { depth: 4, max: 3 })
        );
    }

    #[test]
    fn parent_and_child() {
        let path: ChannelPath = "a.b".parse().unwrap();
        assert_eq!(path.parent().unwrap().to_string(), "a");
        assert_eq!(path.child("c").unwrap().to_string(), "a.b.c");
        assert_eq!(path.child("x.y"), Err(PathError::InvalidSegment("x.y".into())));
        assert!(ChannelPath::root().parent().is_none());
    }

    #[test]
    fn ancestors_shortest_first() {
        let path: ChannelPath = "a.b.c".parse().unwrap();
        let names: Vec<String> = path.ancestors().map(|p| p.to_string()).collect();
        assert_eq!(names, vec!["a", "a.b"]);
    }

    #[test]
    fn prefix_relations() {
        let a: ChannelPath = "a".parse().unwrap();
        let ab: ChannelPath = "a.b".parse().unwrap();
        assert!(a.is_prefix_of(&ab));
        assert!(a.is_ancestor_of(&ab));
        assert!(!ab.is_ancestor_of(&a));
        assert!(!a.is_ancestor_of(&a));
    }

    #[test]
    fn serializes_as_segment_list() {
        let path: ChannelPath = "a.b".parse().unwrap();
        assert_eq!(serde_json::to_string(&path).unwrap(), r#"["a","b"]"#);
        let back: ChannelPath = serde_json::from_str(r#"["a","b"]"#).unwrap();
        assert_eq!(back, path);
    }

    #[test]
    fn segment_lists_are_validated() {
        let bad = vec!["has space".to_string(), "x.y".to_string()];
        assert_eq!(
            ChannelPath::try_from(bad),
            Err(PathError::InvalidSegment("has space".into()))
        );
        assert_eq!(
            ChannelPath::try_from(vec!["a".to_string(), String::new()]),
            Err(PathError::EmptySegment)
        );
        assert!(serde_json::from_str::<ChannelPath>(r#"["ok","x.y"]"#).is_err());
        assert_eq!(ChannelPath::try_from(Vec::new()), Ok(ChannelPath::root()));
    }
}
