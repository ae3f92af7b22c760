//! Hierarchical operation paths.
//!
//! A [`Path`] identifies an operation's slot in the [`crate::client::Client`]
//! registry. Segments are opaque and hashable — strings, integers, or UUIDs —
//! mirroring how a task/session storage backend keys records by a plain
//! `String` id, generalized here to an ordered sequence so operations
//! can be organized hierarchically (e.g. `["mountains", mountain_id, "climbs"]`).

use std::fmt;
use uuid::Uuid;

/// One opaque, hashable segment of a [`Path`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    Str(String),
    Int(i64),
    Uuid(Uuid),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Str(s) => write!(f, "{s}"),
            PathSegment::Int(i) => write!(f, "{i}"),
            PathSegment::Uuid(u) => write!(f, "{u}"),
        }
    }
}

impl From<&str> for PathSegment {
    fn from(s: &str) -> Self {
        PathSegment::Str(s.to_string())
    }
}

impl From<String> for PathSegment {
    fn from(s: String) -> Self {
        PathSegment::Str(s)
    }
}

impl From<i64> for PathSegment {
    fn from(i: i64) -> Self {
        PathSegment::Int(i)
    }
}

impl From<i32> for PathSegment {
    fn from(i: i32) -> Self {
        PathSegment::Int(i as i64)
    }
}

impl From<Uuid> for PathSegment {
    fn from(u: Uuid) -> Self {
        PathSegment::Uuid(u)
    }
}

/// An ordered sequence of [`PathSegment`]s identifying an operation in the
/// client registry.
///
/// Two `Path`s are equal iff their segments are equal in order. Hashing
/// follows the same rule so `Path` can key a `HashMap`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Path {
    segments: Vec<PathSegment>,
}

impl Path {
    pub fn new() -> Self {
        Self { segments: Vec::new() }
    }

    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<PathSegment>,
    {
        Self {
            segments: segments.into_iter().map(Into::into).collect(),
        }
    }

    pub fn single<S: Into<PathSegment>>(segment: S) -> Self {
        Self {
            segments: vec![segment.into()],
        }
    }

    /// Returns a new path with `segment` appended.
    #[must_use]
    pub fn append<S: Into<PathSegment>>(&self, segment: S) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.into());
        Self { segments }
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// True iff `self` is a prefix of `other` (including `self == other`).
    pub fn is_prefix_of(&self, other: &Path) -> bool {
        self.segments.len() <= other.segments.len()
            && self.segments.iter().zip(other.segments.iter()).all(|(a, b)| a == b)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/")?;
        for (i, seg) in self.segments.iter().enumerate() {
            if i > 0 {
                write!(f, "/")?;
            }
            write!(f, "{seg}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_extends_without_mutating_original() {
        let base = Path::single("mountains");
        let child = base.append(42i64);

        assert_eq!(base.len(), 1);
        assert_eq!(child.len(), 2);
        assert_eq!(child.segments()[1], PathSegment::Int(42));
    }

    #[test]
    fn prefix_matching() {
        let a = Path::from_segments(vec![PathSegment::from(1i64)]);
        let ab = Path::from_segments(vec![PathSegment::from(1i64), PathSegment::from(2i64)]);
        let ac = Path::from_segments(vec![PathSegment::from(1i64), PathSegment::from(3i64)]);

        assert!(a.is_prefix_of(&ab));
        assert!(a.is_prefix_of(&a));
        assert!(!ab.is_prefix_of(&a));
        assert!(!ab.is_prefix_of(&ac));
    }

    #[test]
    fn equal_paths_hash_equal() {
        use std::collections::HashSet;
        let mut set = HashSet::new();
        set.insert(Path::single("a"));
        assert!(set.contains(&Path::single("a")));
    }
}
