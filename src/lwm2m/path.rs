//! LwM2M resource addressing
//!
//! A [`Path`] names a node in the object tree of a device:
//!
//! ```text
//! /3/0/13/1
//!  │ │ │  └─ resource instance id
//!  │ │ └──── resource id
//!  │ └────── object instance id
//!  └──────── object id
//! ```
//!
//! Segments are validated lazily. Constructing a path never fails; asking for a
//! segment that is absent or not numeric returns [`PathError`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Errors raised when a path segment cannot be accessed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    #[error("No {0} in path {1:?}")]
    Missing(&'static str, String),

    #[error("{0} in path {1:?} is not a non-negative integer")]
    NotNumeric(&'static str, String),

    #[error("Path {0:?} is deeper than a resource instance")]
    TooDeep(String),
}

/// Depth of a path in the object tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    Root,
    Object,
    ObjectInstance,
    Resource,
    ResourceInstance,
}

impl Level {
    const SEGMENTS: [Level; 4] = [
        Level::Object,
        Level::ObjectInstance,
        Level::Resource,
        Level::ResourceInstance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Root => "root",
            Level::Object => "object",
            Level::ObjectInstance => "object_instance",
            Level::Resource => "resource",
            Level::ResourceInstance => "resource_instance",
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Level::Root => "root",
            Level::Object => "object id",
            Level::ObjectInstance => "object instance id",
            Level::Resource => "resource id",
            Level::ResourceInstance => "resource instance id",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized slash separated LwM2M path
///
/// Repeated separators collapse to one, so `"/3//0"` and `"/3/0"` are the same
/// key. A leading slash is kept as given: `"/3/0"` and `"3/0"` are distinct.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Path(String);

impl Path {
    pub fn new(path: impl AsRef<str>) -> Self {
        let raw = path.as_ref();
        let mut normalized = String::with_capacity(raw.len());
        let mut last_was_sep = false;
        for c in raw.chars() {
            if c == '/' {
                if !last_was_sep {
                    normalized.push(c);
                }
                last_was_sep = true;
            } else {
                normalized.push(c);
                last_was_sep = false;
            }
        }
        Path(normalized)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Non-empty segments, leading slash ignored
    pub fn parts(&self) -> Vec<&str> {
        self.0.split('/').filter(|p| !p.is_empty()).collect()
    }

    pub fn level(&self) -> Result<Level, PathError> {
        match self.parts().len() {
            0 => Ok(Level::Root),
            n if n <= Level::SEGMENTS.len() => Ok(Level::SEGMENTS[n - 1]),
            _ => Err(PathError::TooDeep(self.0.clone())),
        }
    }

    pub fn oid(&self) -> Result<u32, PathError> {
        self.segment(Level::Object)
    }

    pub fn iid(&self) -> Result<u32, PathError> {
        self.segment(Level::ObjectInstance)
    }

    pub fn rid(&self) -> Result<u32, PathError> {
        self.segment(Level::Resource)
    }

    pub fn riid(&self) -> Result<u32, PathError> {
        self.segment(Level::ResourceInstance)
    }

    /// Appends `child` below this path, inserting exactly one separator
    pub fn join(&self, child: impl AsRef<str>) -> Path {
        Path::new(format!("{}/{}", self.0, child.as_ref()))
    }

    /// Path with the last segment removed, `None` at the root
    pub fn parent(&self) -> Option<Path> {
        let trimmed = self.0.trim_end_matches('/');
        let idx = trimmed.rfind('/')?;
        if trimmed[idx + 1..].is_empty() {
            return None;
        }
        Some(Path::new(&trimmed[..idx]))
    }

    pub fn is_absolute(&self) -> bool {
        self.0.starts_with('/')
    }

    fn segment(&self, level: Level) -> Result<u32, PathError> {
        let index = Level::SEGMENTS
            .iter()
            .position(|l| *l == level)
            .unwrap_or_default();
        let parts = self.parts();
        let part = parts
            .get(index)
            .ok_or_else(|| PathError::Missing(level.name(), self.0.clone()))?;
        part.parse::<u32>()
            .map_err(|_| PathError::NotNumeric(level.name(), self.0.clone()))
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Path {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Path::new(s))
    }
}

impl From<&str> for Path {
    fn from(value: &str) -> Self {
        Path::new(value)
    }
}

impl From<String> for Path {
    fn from(value: String) -> Self {
        Path::new(value)
    }
}

impl From<&String> for Path {
    fn from(value: &String) -> Self {
        Path::new(value)
    }
}

impl From<&Path> for Path {
    fn from(value: &Path) -> Self {
        value.clone()
    }
}

impl From<Path> for String {
    fn from(value: Path) -> Self {
        value.0
    }
}

impl AsRef<str> for Path {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for Path {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for Path {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}
