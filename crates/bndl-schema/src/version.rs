//! Version strings and version bounds.
//!
//! Package versions are stored as authored. Ordering prefers semantic
//! versioning and falls back to lexicographic comparison so that
//! four-part installer versions (`1.0.0.0`) still order predictably.

use serde::{Deserialize, Serialize};

/// A package or product version string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(String);

impl Ord for Version {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        match (
            semver::Version::parse(&self.0),
            semver::Version::parse(&other.0),
        ) {
            (Ok(a), Ok(b)) => a.cmp(&b),
            (Ok(_), Err(_)) => std::cmp::Ordering::Less,
            (Err(_), Ok(_)) => std::cmp::Ordering::Greater,
            (Err(_), Err(_)) => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Version {
    /// Create a new version from the given string (stored as-is).
    pub fn new(v: &str) -> Self {
        Self(v.to_string())
    }

    /// Return the version string as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Version {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Version {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Version {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl PartialEq<str> for Version {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for Version {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// One end of a related-package version range, with an inclusive flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionBound {
    /// The bounding version.
    pub version: Version,
    /// Whether a version equal to the bound satisfies the range.
    pub inclusive: bool,
}

impl VersionBound {
    /// Create a bound from a version and inclusivity flag.
    pub fn new(version: Version, inclusive: bool) -> Self {
        Self { version, inclusive }
    }

    /// Whether `candidate` satisfies this bound treated as a minimum.
    pub fn admits_as_min(&self, candidate: &Version) -> bool {
        if self.inclusive {
            candidate >= &self.version
        } else {
            candidate > &self.version
        }
    }

    /// Whether `candidate` satisfies this bound treated as a maximum.
    pub fn admits_as_max(&self, candidate: &Version) -> bool {
        if self.inclusive {
            candidate <= &self.version
        } else {
            candidate < &self.version
        }
    }
}
