use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionError {
    #[error("invalid version format: '{0}' (expected MAJOR.MINOR.PATCH)")]
    InvalidVersionFormat(String),
}

/// A concrete application version, parsed as semver.
///
/// Only the numeric triple takes part in range matching. `Display` keeps the
/// pre-release suffix so image tags carry it, and drops build metadata
/// (`+...`) because `+` is not a valid image tag character.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version(semver::Version);

impl Version {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self(semver::Version::new(major, minor, patch))
    }

    pub fn major(&self) -> u64 {
        self.0.major
    }

    pub fn minor(&self) -> u64 {
        self.0.minor
    }

    pub fn patch(&self) -> u64 {
        self.0.patch
    }

    /// Pre-release identifiers, if any.
    pub fn pre(&self) -> Option<&str> {
        (!self.0.pre.is_empty()).then(|| self.0.pre.as_str())
    }

    /// The numeric triple used for comparisons.
    pub fn triple(&self) -> (u64, u64, u64) {
        (self.0.major, self.0.minor, self.0.patch)
    }

    pub fn as_semver(&self) -> &semver::Version {
        &self.0
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        semver::Version::parse(input.trim())
            .map(Self)
            .map_err(|_| VersionError::InvalidVersionFormat(input.to_owned()))
    }
}

impl From<semver::Version> for Version {
    fn from(version: semver::Version) -> Self {
        Self(version)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.0.major, self.0.minor, self.0.patch)?;
        if let Some(pre) = self.pre() {
            write!(f, "-{pre}")?;
        }
        Ok(())
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A version-range expression from a deployment's `application.version`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionConstraint {
    /// No constraint given: every version matches.
    Any,
    /// `1.2.3` or `=1.2.3`.
    Exact(Version),
    /// `^1.2.3`: compatible updates within the left-most non-zero component.
    Caret(Version),
}

impl FromStr for VersionConstraint {
    type Err = VersionError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim();
        if trimmed.is_empty() || trimmed == "*" {
            return Ok(Self::Any);
        }
        if let Some(rest) = trimmed.strip_prefix('^') {
            return rest
                .parse()
                .map(Self::Caret)
                .map_err(|_| VersionError::InvalidVersionFormat(input.to_owned()));
        }
        let exact = trimmed.strip_prefix('=').unwrap_or(trimmed);
        exact
            .parse()
            .map(Self::Exact)
            .map_err(|_| VersionError::InvalidVersionFormat(input.to_owned()))
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("*"),
            Self::Exact(v) => write!(f, "={v}"),
            Self::Caret(v) => write!(f, "^{v}"),
        }
    }
}
