//! Resource identities and the path identity resolver.
//!
//! A [`ResourceIdentity`] is an absolute, `/`-separated, normalized path. The
//! resolver functions ([`is_equal_or_ancestor`], [`relative_segments`],
//! [`rewrite`]) compare identities segment by segment, never as raw string
//! prefixes: `/foo/bar` is not nested under `/foo/ba`.
//!
//! Case sensitivity belongs to the host filesystem, so every comparison that
//! can match across casing takes a [`PathCasing`]. Plain `==` on identities is
//! always exact.

use std::fmt;
use std::path::{Component, Path};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ResourceError;

// ---------------------------------------------------------------------------
// Casing
// ---------------------------------------------------------------------------

/// How the host filesystem compares path segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathCasing {
    Sensitive,
    Insensitive,
}

impl PathCasing {
    /// Casing of the platform this binary was built for.
    pub fn platform() -> Self {
        if cfg!(any(target_os = "macos", target_os = "windows")) {
            PathCasing::Insensitive
        } else {
            PathCasing::Sensitive
        }
    }

    fn segment_eq(self, a: &str, b: &str) -> bool {
        match self {
            PathCasing::Sensitive => a == b,
            PathCasing::Insensitive => a == b || a.to_lowercase() == b.to_lowercase(),
        }
    }
}

impl Default for PathCasing {
    fn default() -> Self {
        Self::platform()
    }
}

impl fmt::Display for PathCasing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathCasing::Sensitive => write!(f, "sensitive"),
            PathCasing::Insensitive => write!(f, "insensitive"),
        }
    }
}

// ---------------------------------------------------------------------------
// ResourceIdentity
// ---------------------------------------------------------------------------

/// Hierarchical identifier of a file-like resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceIdentity(String);

impl ResourceIdentity {
    /// The root identity `/`.
    pub fn root() -> Self {
        Self("/".to_owned())
    }

    /// Parse and normalize an absolute `/`-separated path.
    ///
    /// Empty and `.` segments are dropped and `..` pops its parent; a trailing
    /// separator is removed.
    pub fn parse(input: &str) -> Result<Self, ResourceError> {
        if input.is_empty() {
            return Err(ResourceError::Empty);
        }
        if !input.starts_with('/') {
            return Err(ResourceError::Relative {
                input: input.to_owned(),
            });
        }
        let mut segments: Vec<&str> = Vec::new();
        for segment in input.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    segments.pop();
                }
                other => segments.push(other),
            }
        }
        Ok(Self::from_segments(segments))
    }

    /// Build an identity from a filesystem path as reported by a watcher.
    ///
    /// Windows prefixes (`C:`) become the first segment.
    pub fn from_path(path: &Path) -> Result<Self, ResourceError> {
        if path.as_os_str().is_empty() {
            return Err(ResourceError::Empty);
        }
        if !path.is_absolute() && !path.has_root() {
            return Err(ResourceError::Relative {
                input: path.display().to_string(),
            });
        }
        let mut segments: Vec<String> = Vec::new();
        for component in path.components() {
            match component {
                Component::Prefix(prefix) => {
                    segments.push(prefix.as_os_str().to_string_lossy().into_owned())
                }
                Component::RootDir | Component::CurDir => {}
                Component::ParentDir => {
                    segments.pop();
                }
                Component::Normal(name) => segments.push(name.to_string_lossy().into_owned()),
            }
        }
        Ok(Self::from_segments(segments))
    }

    fn from_segments<S: AsRef<str>>(segments: impl IntoIterator<Item = S>) -> Self {
        let mut out = String::new();
        for segment in segments {
            out.push('/');
            out.push_str(segment.as_ref());
        }
        if out.is_empty() {
            out.push('/');
        }
        Self(out)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// Path segments, root excluded.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }

    /// Last segment, `None` for the root.
    pub fn file_name(&self) -> Option<&str> {
        self.segments().last()
    }

    /// Parent identity, `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        let count = self.segments().count();
        Some(Self::from_segments(self.segments().take(count - 1)))
    }

    /// Append trailing segments verbatim.
    pub fn join<'a>(&'a self, tail: impl IntoIterator<Item = &'a str>) -> Self {
        Self::from_segments(self.segments().chain(tail))
    }

    /// Equality under the given host casing.
    pub fn eq_with(&self, other: &Self, casing: PathCasing) -> bool {
        self == other || casing.segment_eq(&self.0, &other.0)
    }
}

impl fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ResourceIdentity {
    type Err = ResourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ResourceIdentity {
    type Error = ResourceError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<ResourceIdentity> for String {
    fn from(r: ResourceIdentity) -> Self {
        r.0
    }
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// Trailing segments of `descendant` below `ancestor`, or `None` when
/// `descendant` is not equal to or nested under `ancestor`.
///
/// Equal identities yield an empty vector.
pub fn relative_segments<'a>(
    ancestor: &ResourceIdentity,
    descendant: &'a ResourceIdentity,
    casing: PathCasing,
) -> Option<Vec<&'a str>> {
    let mut tail = descendant.segments();
    for expected in ancestor.segments() {
        let actual = tail.next()?;
        if !casing.segment_eq(expected, actual) {
            return None;
        }
    }
    Some(tail.collect())
}

/// True if `b` equals `a` or `a` is a prefix of `b` at a segment boundary.
pub fn is_equal_or_ancestor(a: &ResourceIdentity, b: &ResourceIdentity, casing: PathCasing) -> bool {
    relative_segments(a, b, casing).is_some()
}

/// Replace the `old_ancestor` prefix of `descendant` with `new_ancestor`.
///
/// Identical `old_ancestor` and `descendant` return `new_ancestor` as is.
/// A `descendant` outside `old_ancestor` is returned unchanged.
pub fn rewrite(
    old_ancestor: &ResourceIdentity,
    new_ancestor: &ResourceIdentity,
    descendant: &ResourceIdentity,
    casing: PathCasing,
) -> ResourceIdentity {
    if old_ancestor.eq_with(descendant, casing) {
        return new_ancestor.clone();
    }
    match relative_segments(old_ancestor, descendant, casing) {
        Some(tail) => new_ancestor.join(tail),
        None => descendant.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(s: &str) -> ResourceIdentity {
        ResourceIdentity::parse(s).expect("valid identity")
    }

    #[test]
    fn parse_normalizes_separators_and_dots() {
        assert_eq!(r("/a//b/./c/").as_str(), "/a/b/c");
        assert_eq!(r("/a/b/../c").as_str(), "/a/c");
        assert_eq!(r("/").as_str(), "/");
        assert_eq!(r("/..").as_str(), "/");
    }

    #[test]
    fn parse_rejects_relative_and_empty() {
        assert_eq!(ResourceIdentity::parse(""), Err(ResourceError::Empty));
        assert!(matches!(
            ResourceIdentity::parse("a/b"),
            Err(ResourceError::Relative { .. })
        ));
    }

    #[test]
    fn parent_and_file_name() {
        let id = r("/proj/src/x.ts");
        assert_eq!(id.file_name(), Some("x.ts"));
        assert_eq!(id.parent(), Some(r("/proj/src")));
        assert_eq!(r("/proj").parent(), Some(ResourceIdentity::root()));
        assert_eq!(ResourceIdentity::root().parent(), None);
    }

    #[test]
    fn join_appends_segments_from_another_identity() {
        let old = r("/proj/src/deep/x.ts");
        let tail = relative_segments(&r("/proj/src"), &old, PathCasing::Sensitive).expect("nested");
        assert_eq!(r("/proj/lib").join(tail), r("/proj/lib/deep/x.ts"));
        assert_eq!(r("/").join(["a", "b"]), r("/a/b"));
    }

    #[test]
    fn relative_segments_of_equal_is_empty() {
        let id = r("/a/b");
        assert_eq!(relative_segments(&id, &id, PathCasing::Sensitive), Some(vec![]));
    }

    #[test]
    fn root_is_ancestor_of_everything() {
        assert!(is_equal_or_ancestor(
            &ResourceIdentity::root(),
            &r("/x/y"),
            PathCasing::Sensitive
        ));
    }

    #[test]
    fn serde_roundtrip_goes_through_parse() {
        let yaml = serde_yaml::to_string(&r("/a/b")).expect("serialize");
        let back: ResourceIdentity = serde_yaml::from_str(&yaml).expect("deserialize");
        assert_eq!(back, r("/a/b"));
        assert!(serde_yaml::from_str::<ResourceIdentity>("relative/path").is_err());
    }
}
